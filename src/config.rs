use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to normalize (used when a command has no CLI args).
    pub music_dirs: Vec<PathBuf>,
    /// Target peak level in dB.
    pub target_db: f64,
    /// Deviation from target (dB) below which a file is left alone.
    pub threshold_db: f64,
    /// Analysis workers. 0 = one per file (no cap).
    pub workers: usize,
    /// ffmpeg binary to invoke for measurement and encoding.
    pub ffmpeg_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            music_dirs: Vec::new(),
            target_db: -7.0,
            threshold_db: 1.0,
            workers: 0,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/librarygain/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        match toml::from_str::<AppConfig>(&contents) {
                            Ok(config) => {
                                log::info!("Loaded config from {}", path.display());
                                config
                            }
                            Err(e) => {
                                log::warn!(
                                    "Failed to parse {}: {}. Using defaults.",
                                    path.display(),
                                    e
                                );
                                Self::default()
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to read {}: {}. Using defaults.",
                            path.display(),
                            e
                        );
                        Self::default()
                    }
                }
            }
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
