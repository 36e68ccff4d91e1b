pub mod analyzer;
pub mod batch;
pub mod config;
pub mod gain;
pub mod normalizer;
pub mod scanner;

/// Audio file extensions we normalize. The encode profile writes MP3, so only
/// files already in that container are candidates.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3"];

/// Application name for XDG paths
pub const APP_NAME: &str = "librarygain";
