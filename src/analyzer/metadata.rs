use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use std::path::Path;

/// Loudness-relevant tags pulled from a file's metadata block.
#[derive(Debug, Default)]
pub struct TagInfo {
    /// Embedded replay-gain track gain, kept opaque (e.g. "-6.50 dB").
    pub replay_gain: Option<String>,
    pub comment: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Read tags from an audio file. Returns empty tags on failure — a broken tag
/// block is not an analysis failure, the level measurement still stands.
pub fn read_tags(path: &Path) -> TagInfo {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read tags from {}: {}", path.display(), e);
            return TagInfo::default();
        }
    };

    let duration_secs = {
        let secs = tagged_file.properties().duration().as_secs_f64();
        if secs > 0.0 { Some(secs) } else { None }
    };

    // Try primary tag, then fall back
    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

    let (replay_gain, comment) = match tag {
        Some(t) => (
            t.get_string(&ItemKey::ReplayGainTrackGain).map(|s| s.to_string()),
            t.get_string(&ItemKey::Comment).map(|s| s.to_string()),
        ),
        None => (None, None),
    };

    TagInfo { replay_gain, comment, duration_secs }
}
