use crate::SUPPORTED_EXTENSIONS;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

/// One candidate audio file found under a scan root.
///
/// Immutable for the duration of a batch run. Timestamps are kept as sortable
/// text (`YYYY-MM-DD HH:MM:SS`) so callers can order on them directly.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub created: Option<String>,
    pub modified: Option<String>,
    /// Absolute path of the containing folder.
    pub folder: PathBuf,
    /// Containing folder relative to the scan root ("" for the root itself).
    pub rel_folder: String,
}

/// Recursively collect audio files under `root`.
///
/// Filtering is by extension only. Unreadable entries are logged and skipped;
/// the scan itself fails only if the root is unusable. Results are sorted by
/// path so batch submission order is reproducible.
pub fn scan(root: &Path) -> Result<Vec<FileRecord>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        match file_record(root, entry.path()) {
            Ok(rec) => files.push(rec),
            Err(e) => log::warn!("Skipping {}: {}", entry.path().display(), e),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    log::debug!("Scan of {} found {} files", root.display(), files.len());
    Ok(files)
}

fn file_record(root: &Path, path: &Path) -> std::io::Result<FileRecord> {
    let meta = std::fs::metadata(path)?;
    let folder = path.parent().unwrap_or(root).to_path_buf();
    let rel_folder = folder
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(FileRecord {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        size: meta.len(),
        created: meta.created().ok().map(format_timestamp),
        modified: meta.modified().ok().map(format_timestamp),
        folder,
        rel_folder,
    })
}

fn format_timestamp(t: SystemTime) -> String {
    DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        fs::write(dir.path().join("b.MP3"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("cover.jpg"), b"x").unwrap();

        let files = scan(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.name.to_lowercase().ends_with(".mp3")));
    }

    #[test]
    fn test_scan_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("disc2")).unwrap();
        fs::write(dir.path().join("disc2/track.mp3"), b"x").unwrap();
        fs::write(dir.path().join("01.mp3"), b"x").unwrap();

        let files = scan(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        // Sorted by path: root file before the subdirectory file
        assert_eq!(files[0].name, "01.mp3");
        assert_eq!(files[0].rel_folder, "");
        assert_eq!(files[1].name, "track.mp3");
        assert_eq!(files[1].rel_folder, "disc2");
        assert_eq!(files[1].folder, dir.path().join("disc2"));
    }

    #[test]
    fn test_record_has_size_and_sortable_mtime() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"12345").unwrap();

        let files = scan(dir.path()).unwrap();
        assert_eq!(files[0].size, 5);
        let mtime = files[0].modified.as_deref().unwrap();
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(mtime.len(), 19);
        assert_eq!(&mtime[4..5], "-");
        assert_eq!(&mtime[10..11], " ");
    }

    #[test]
    fn test_scan_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(scan(&missing), Err(ScanError::NotADirectory(_))));
    }
}
