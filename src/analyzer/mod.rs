pub mod engine;
pub mod metadata;

use crate::scanner::FileRecord;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

/// Per-file analysis snapshot.
///
/// Every numeric field is explicitly optional: `None` means "not measured",
/// which is a different thing from a measured 0.0 dB. Records are immutable;
/// re-analysis after normalization produces a superseding record.
#[derive(Debug, Clone, Default)]
pub struct MeasurementRecord {
    /// Average signal level in dB (signed).
    pub avg_db: Option<f64>,
    /// Peak signal level in dB (signed).
    pub max_db: Option<f64>,
    /// Embedded replay-gain tag, opaque.
    pub replay_gain: Option<String>,
    pub duration_secs: Option<f64>,
    /// Existing free-text comment tag.
    pub comment: Option<String>,
    /// Set when the engine or its output could not be used. When set, the
    /// numeric fields are meaningless and must not feed planning/selection.
    pub failed: bool,
}

impl MeasurementRecord {
    fn failure() -> Self {
        Self { failed: true, ..Self::default() }
    }

    /// Peak level usable for planning: `None` for failed records even if a
    /// stale number somehow ended up in the field.
    pub fn valid_max_db(&self) -> Option<f64> {
        if self.failed { None } else { self.max_db }
    }
}

/// Analyze one file. Never fails the caller: any engine, spawn, or parse
/// error comes back as a record with the failure flag set and every numeric
/// field unset. Tag-read problems degrade only the tag fields.
pub fn analyze(ffmpeg: &str, path: &Path) -> MeasurementRecord {
    let levels = match engine::measure_levels(ffmpeg, path) {
        Ok(l) => l,
        Err(e) => {
            log::warn!("Analysis failed for {}: {}", path.display(), e);
            return MeasurementRecord::failure();
        }
    };

    let tags = metadata::read_tags(path);

    MeasurementRecord {
        avg_db: levels.avg_db,
        max_db: levels.max_db,
        replay_gain: tags.replay_gain,
        duration_secs: tags.duration_secs,
        comment: tags.comment,
        failed: false,
    }
}

/// Analyze a batch in parallel, one ffmpeg process per worker.
///
/// `jobs == 0` runs one worker per file, so concurrency is bounded only by
/// what the host can launch; a positive value caps the number of simultaneous
/// decode processes. Output order matches input order.
pub fn analyze_batch(ffmpeg: &str, files: &[FileRecord], jobs: usize) -> Vec<MeasurementRecord> {
    if files.is_empty() {
        return Vec::new();
    }
    let workers = if jobs > 0 { jobs } else { files.len() };
    log::info!("Analyzing {} files with {} workers", files.len(), workers);

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb.set_message("Analyzing...");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .unwrap();

    let records: Vec<MeasurementRecord> = pool.install(|| {
        use rayon::prelude::*;
        files
            .par_iter()
            .map(|file| {
                let record = analyze(ffmpeg, &file.path);
                pb.inc(1);
                record
            })
            .collect()
    });

    let failed = records.iter().filter(|r| r.failed).count();
    pb.finish_with_message(format!("Done: {} analyzed, {} failed", records.len() - failed, failed));
    records
}
