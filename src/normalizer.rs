use crate::analyzer::MeasurementRecord;
use crate::gain::round_db;
use crate::scanner::FileRecord;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("could not run ffmpeg for {}: {source}", path.display())]
    Spawn { path: PathBuf, source: std::io::Error },
    #[error("encode failed for {}: {stderr}", path.display())]
    Encode { path: PathBuf, stderr: String },
    #[error("could not replace {}: {source}", path.display())]
    Replace { path: PathBuf, source: std::io::Error },
}

/// Result of one file's normalization. Failures carry the file path and the
/// engine's message; they never abort sibling files.
#[derive(Debug)]
pub struct NormalizationOutcome {
    pub path: PathBuf,
    /// Delta actually applied (rounded to the working precision). 0.0 means
    /// the file was already at target and nothing was touched.
    pub applied_db: f64,
    pub result: Result<(), NormalizeError>,
}

impl NormalizationOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// True when the file's bytes were actually rewritten.
    pub fn mutated(&self) -> bool {
        self.succeeded() && self.applied_db != 0.0
    }
}

/// Replay-gain tags that become stale once the samples are gain-adjusted.
const STALE_GAIN_TAGS: &[&str] = &[
    "REPLAYGAIN_TRACK_GAIN",
    "REPLAYGAIN_TRACK_PEAK",
    "REPLAYGAIN_ALBUM_GAIN",
    "REPLAYGAIN_ALBUM_PEAK",
];

/// Applies a planned delta to one file via an ffmpeg re-encode, with
/// atomic replace-on-success and cleanup-on-failure.
///
/// Holds no batch state: concurrent calls against distinct files are safe.
/// The orchestrator nevertheless runs these one at a time (encode is heavy,
/// and album references must be read before any write).
pub struct Normalizer {
    ffmpeg: String,
}

impl Normalizer {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    /// Apply `delta_db` (rounded to 2 decimals) to `file`.
    ///
    /// A delta that rounds to exactly 0 is a no-op success: no engine call,
    /// no metadata rewrite, nothing to change. Otherwise the engine encodes
    /// into a sibling temp file which is renamed over the original only on
    /// success; on failure the temp is removed and the original is untouched.
    pub fn normalize(
        &self,
        file: &FileRecord,
        record: &MeasurementRecord,
        delta_db: f64,
    ) -> NormalizationOutcome {
        let delta = round_db(delta_db);
        if delta == 0.0 {
            log::debug!("{}: delta rounds to 0, nothing to do", file.path.display());
            return NormalizationOutcome { path: file.path.clone(), applied_db: delta, result: Ok(()) };
        }

        log::info!("Normalizing {} by {:+.2} dB", file.path.display(), delta);

        let tmp = temp_path(&file.path);
        let result = self.encode(file, record, delta, &tmp).and_then(|()| {
            // Same directory, same filesystem: the rename is atomic and the
            // original is never deleted before the replacement lands.
            std::fs::rename(&tmp, &file.path)
                .map_err(|source| NormalizeError::Replace { path: file.path.clone(), source })
        });

        if let Err(e) = &result {
            log::warn!("{}", e);
            if tmp.exists() {
                if let Err(rm) = std::fs::remove_file(&tmp) {
                    log::warn!("Could not remove partial file {}: {}", tmp.display(), rm);
                }
            }
        }

        NormalizationOutcome { path: file.path.clone(), applied_db: delta, result }
    }

    fn encode(
        &self,
        file: &FileRecord,
        record: &MeasurementRecord,
        delta_db: f64,
        out: &Path,
    ) -> Result<(), NormalizeError> {
        let comment = normalized_comment(delta_db, file.modified.as_deref(), record.comment.as_deref());

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-i")
            .arg(&file.path)
            .args(["-af", &format!("volume={delta_db}dB")])
            // Fixed profile: quality-scale hint plus a constant-bitrate fallback
            .args(["-codec:a", "libmp3lame", "-qscale:a", "0", "-b:a", "320k"])
            .args(["-map_metadata", "0"]);
        // Empty value deletes the tag
        for tag in STALE_GAIN_TAGS {
            cmd.arg("-metadata").arg(format!("{tag}="));
        }
        cmd.arg("-metadata").arg(format!("comment={comment}"));
        cmd.arg(out);

        let output = cmd
            .output()
            .map_err(|source| NormalizeError::Spawn { path: file.path.clone(), source })?;

        if !output.status.success() {
            return Err(NormalizeError::Encode {
                path: file.path.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Comment written onto the mutated file: the delta that was applied, the
/// file's modification time before the rewrite, and whatever comment it
/// already carried.
fn normalized_comment(delta_db: f64, prior_mtime: Option<&str>, prior_comment: Option<&str>) -> String {
    let mut comment = format!(
        "normalized {:+.2} dB (was modified {})",
        delta_db,
        prior_mtime.unwrap_or("(unknown)")
    );
    if let Some(prior) = prior_comment {
        if !prior.is_empty() {
            comment.push_str("; ");
            comment.push_str(prior);
        }
    }
    comment
}

/// Sibling path in the same directory, so the final rename never crosses a
/// filesystem boundary.
fn temp_path(path: &Path) -> PathBuf {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("mp3");
    path.with_extension(format!("lgtmp.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_for(dir: &Path, name: &str, contents: &[u8]) -> FileRecord {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        FileRecord {
            name: name.to_string(),
            path,
            size: contents.len() as u64,
            created: None,
            modified: Some("2026-08-25 12:00:00".to_string()),
            folder: dir.to_path_buf(),
            rel_folder: String::new(),
        }
    }

    #[test]
    fn test_zero_delta_is_a_no_op_success() {
        let dir = tempfile::tempdir().unwrap();
        let file = record_for(dir.path(), "a.mp3", b"original");

        // Engine binary cannot exist — proves no engine call is attempted.
        let normalizer = Normalizer::new("librarygain-test-no-such-ffmpeg");
        let outcome = normalizer.normalize(&file, &MeasurementRecord::default(), 0.0);

        assert!(outcome.succeeded());
        assert!(!outcome.mutated());
        assert_eq!(std::fs::read(&file.path).unwrap(), b"original");
    }

    #[test]
    fn test_sub_precision_delta_rounds_to_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let file = record_for(dir.path(), "a.mp3", b"original");

        let normalizer = Normalizer::new("librarygain-test-no-such-ffmpeg");
        let outcome = normalizer.normalize(&file, &MeasurementRecord::default(), 0.004);

        assert!(outcome.succeeded());
        assert_eq!(outcome.applied_db, 0.0);
        assert_eq!(std::fs::read(&file.path).unwrap(), b"original");
    }

    #[test]
    fn test_engine_failure_leaves_original_and_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let file = record_for(dir.path(), "a.mp3", b"original bytes");

        let normalizer = Normalizer::new("librarygain-test-no-such-ffmpeg");
        let outcome = normalizer.normalize(&file, &MeasurementRecord::default(), -2.0);

        assert!(!outcome.succeeded());
        let err = outcome.result.unwrap_err().to_string();
        assert!(err.contains("a.mp3"), "error should name the file: {err}");

        // Original intact, byte for byte
        assert_eq!(std::fs::read(&file.path).unwrap(), b"original bytes");
        // No temp artifact left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("a.mp3")]);
    }

    #[test]
    fn test_temp_path_is_a_sibling_with_audio_extension() {
        let tmp = temp_path(Path::new("/music/album/song.mp3"));
        assert_eq!(tmp, PathBuf::from("/music/album/song.lgtmp.mp3"));
        assert_eq!(tmp.parent(), Some(Path::new("/music/album")));
    }

    #[test]
    fn test_comment_records_delta_mtime_and_prior_comment() {
        let c = normalized_comment(-1.5, Some("2026-08-25 12:00:00"), Some("ripped from CD"));
        assert_eq!(c, "normalized -1.50 dB (was modified 2026-08-25 12:00:00); ripped from CD");

        let c = normalized_comment(3.0, None, None);
        assert_eq!(c, "normalized +3.00 dB (was modified (unknown))");

        let c = normalized_comment(3.0, Some("2026-08-25 12:00:00"), Some(""));
        assert_eq!(c, "normalized +3.00 dB (was modified 2026-08-25 12:00:00)");
    }
}
