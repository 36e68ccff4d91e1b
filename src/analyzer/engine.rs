use std::path::Path;
use std::process::{Command, ExitStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("could not run ffmpeg: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    Process { status: ExitStatus, stderr: String },
}

/// Signal levels reported by a volumedetect pass. A missing reading stays
/// `None` — 0.0 dB is a legitimate measured value and must never stand in
/// for "unknown".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Levels {
    pub avg_db: Option<f64>,
    pub max_db: Option<f64>,
}

/// Run ffmpeg's volumedetect filter over a file and pick the mean/peak
/// readings out of its stderr report.
pub fn measure_levels(ffmpeg: &str, path: &Path) -> Result<Levels, EngineError> {
    let output = Command::new(ffmpeg)
        .arg("-hide_banner")
        .arg("-i")
        .arg(path)
        .args(["-map", "a", "-af", "volumedetect", "-f", "null", "-"])
        .output()?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(EngineError::Process {
            status: output.status,
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(parse_volumedetect(&stderr))
}

/// Attribute readings by the keyword each line carries. volumedetect does not
/// guarantee line order, and other filters may interleave their own output,
/// so matching by position would misattribute values.
pub fn parse_volumedetect(stderr: &str) -> Levels {
    let mut levels = Levels::default();
    for line in stderr.lines() {
        if line.contains("mean_volume") {
            levels.avg_db = parse_db_value(line);
        } else if line.contains("max_volume") {
            levels.max_db = parse_db_value(line);
        }
    }
    levels
}

/// Lines look like `[Parsed_volumedetect_0 @ 0x...] mean_volume: -17.5 dB`.
fn parse_db_value(line: &str) -> Option<f64> {
    let value = line.rsplit_once(':')?.1;
    value.trim().trim_end_matches("dB").trim().parse().ok()
}
