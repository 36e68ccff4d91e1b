//! Gain planning and selection — pure functions over measurement snapshots.
//!
//! Nothing here touches the filesystem. Given the same inputs the plan is
//! bit-identical, which is what lets album references be computed once,
//! before any file is rewritten.

use crate::analyzer::MeasurementRecord;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// How deltas are computed across a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Each file moves toward the target using only its own measurement.
    Independent,
    /// Every file in the batch shares one delta, anchored to the loudest
    /// file, so relative levels between tracks are preserved.
    Album,
}

/// An unrecognized mode string is a contract error, not a condition to
/// recover from or silently default.
#[derive(Error, Debug)]
#[error("unknown normalization mode: {0}")]
pub struct ParseModeError(String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Independent" | "independent" => Ok(Mode::Independent),
            "Album" | "album" => Ok(Mode::Album),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Per-file signed dB deltas. Deltas stay unrounded here; rounding to the
/// working precision happens once, when a delta is applied.
pub type GainPlan = BTreeMap<PathBuf, f64>;

/// Working precision for applied deltas (2 decimal places).
pub fn round_db(db: f64) -> f64 {
    (db * 100.0).round() / 100.0
}

/// Compute per-file deltas toward `target_db`.
///
/// Failed measurements carry no usable level and are left out of the plan
/// entirely. An empty or all-invalid batch yields an empty plan — a no-op,
/// not an error.
pub fn plan(records: &[(&Path, &MeasurementRecord)], target_db: f64, mode: Mode) -> GainPlan {
    let mut deltas = GainPlan::new();
    match mode {
        Mode::Independent => {
            for (path, record) in records {
                if let Some(max_db) = record.valid_max_db() {
                    deltas.insert(path.to_path_buf(), target_db - max_db);
                }
            }
        }
        Mode::Album => {
            let album_reference = records
                .iter()
                .filter_map(|(_, r)| r.valid_max_db())
                .fold(f64::NEG_INFINITY, f64::max);
            if album_reference.is_finite() {
                let delta = target_db - album_reference;
                for (path, record) in records {
                    if record.valid_max_db().is_some() {
                        deltas.insert(path.to_path_buf(), delta);
                    }
                }
            }
        }
    }
    deltas
}

/// Strict threshold test against the file's own measurement. Unset levels
/// (including failed records) are never relevant.
fn independently_relevant(record: &MeasurementRecord, target_db: f64, threshold_db: f64) -> bool {
    match record.valid_max_db() {
        Some(max_db) => (max_db - target_db).abs() > threshold_db,
        None => false,
    }
}

/// Pick the files worth normalizing.
///
/// Album mode is all-or-nothing: one relevant file selects every measurable
/// file in the batch, because the album delta moves every track by the same
/// amount and a partial pass would break the album's relative levels.
/// Callers wanting per-track opt-out in Album mode must pre-filter the batch.
///
/// Note the album gate reuses the per-file threshold test even though the
/// album-wide delta applied afterwards differs from each file's independent
/// delta. That asymmetry is deliberate, inherited behavior.
pub fn select(
    records: &[(&Path, &MeasurementRecord)],
    target_db: f64,
    threshold_db: f64,
    mode: Mode,
) -> BTreeSet<PathBuf> {
    match mode {
        Mode::Independent => records
            .iter()
            .filter(|(_, r)| independently_relevant(r, target_db, threshold_db))
            .map(|(p, _)| p.to_path_buf())
            .collect(),
        Mode::Album => {
            let any_relevant = records
                .iter()
                .any(|(_, r)| independently_relevant(r, target_db, threshold_db));
            if any_relevant {
                records
                    .iter()
                    .filter(|(_, r)| r.valid_max_db().is_some())
                    .map(|(p, _)| p.to_path_buf())
                    .collect()
            } else {
                BTreeSet::new()
            }
        }
    }
}
