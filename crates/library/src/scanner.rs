use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use common::content_key;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanSettings;

/// A candidate audio file found during one scan pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub modified_ms: i64,
    pub size: u64,
}

impl ScannedFile {
    /// Stats a single file. The path is canonicalized so the key matches the
    /// one a directory scan derives for the same file.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let path = fs::canonicalize(path)?;
        let meta = fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        Ok(Self::from_metadata(path, &meta))
    }

    fn from_metadata(path: PathBuf, meta: &fs::Metadata) -> Self {
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis().min(i64::MAX as u128) as i64)
            .unwrap_or(0);
        Self {
            path,
            modified_ms,
            size: meta.len(),
        }
    }

    pub fn content_key(&self) -> i64 {
        content_key(&self.path, self.modified_ms)
    }
}

/// Walks every configured root and returns each audio file once.
///
/// Unreadable entries and missing roots are logged and skipped.
pub fn scan_all_audio_files(settings: &ScanSettings) -> Vec<ScannedFile> {
    let mut found: BTreeMap<PathBuf, ScannedFile> = BTreeMap::new();

    for root in &settings.library_paths {
        let root = Path::new(root);
        let root = match fs::canonicalize(root) {
            Ok(path) => path,
            Err(err) => {
                warn!("Skipping library path {:?}: {}", root, err);
                continue;
            }
        };

        let walker = WalkDir::new(&root)
            .follow_links(settings.follow_links)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || settings.include_hidden || !is_hidden(entry)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry under {:?}: {}", root, err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if !is_audio_file(entry.path(), &settings.extensions) {
                continue;
            }
            if found.contains_key(entry.path()) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => {
                    let file = ScannedFile::from_metadata(entry.path().to_path_buf(), &meta);
                    found.insert(file.path.clone(), file);
                }
                Err(err) => warn!("Skipping {:?}: {}", entry.path(), err),
            }
        }
    }

    debug!("Scanner found {} audio files", found.len());
    found.into_values().collect()
}

pub fn is_audio_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            extensions
                .iter()
                .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(files: &[ScannedFile]) -> Vec<String> {
        let mut out: Vec<String> = files
            .iter()
            .map(|file| file.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        out.sort();
        out
    }

    fn settings_for(paths: &[&Path]) -> ScanSettings {
        ScanSettings::new(paths.iter().map(|p| p.to_string_lossy().to_string()))
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let exts = vec!["mp3".to_string(), ".flac".to_string()];
        assert!(is_audio_file(Path::new("/m/a.MP3"), &exts));
        assert!(is_audio_file(Path::new("/m/a.flac"), &exts));
        assert!(!is_audio_file(Path::new("/m/a.txt"), &exts));
        assert!(!is_audio_file(Path::new("/m/mp3"), &exts));
    }

    #[test]
    fn walks_recursively_and_filters() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("Artist").join("Album");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("root.mp3"), b"x").unwrap();
        fs::write(nested.join("01.flac"), b"x").unwrap();
        fs::write(nested.join("cover.jpg"), b"x").unwrap();

        let files = scan_all_audio_files(&settings_for(&[dir.path()]));
        assert_eq!(names(&files), vec!["01.flac", "root.mp3"]);
        assert!(files.iter().all(|file| file.size == 1));
    }

    #[test]
    fn overlapping_roots_report_files_once() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("a.mp3"), b"x").unwrap();
        fs::write(dir.path().join("b.mp3"), b"x").unwrap();

        let with_slash = format!("{}/", dir.path().to_string_lossy());
        let settings = ScanSettings::new(vec![
            dir.path().to_string_lossy().to_string(),
            with_slash,
            sub.to_string_lossy().to_string(),
        ]);
        let files = scan_all_audio_files(&settings);
        assert_eq!(names(&files), vec!["a.mp3", "b.mp3"]);
    }

    #[test]
    fn missing_root_does_not_abort() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.ogg"), b"x").unwrap();
        let missing = dir.path().join("does-not-exist");

        let files = scan_all_audio_files(&settings_for(&[&missing, dir.path()]));
        assert_eq!(names(&files), vec!["a.ogg"]);
    }

    #[test]
    fn hidden_entries_are_skipped_by_default() {
        let dir = tempdir().unwrap();
        let hidden_dir = dir.path().join(".cache");
        fs::create_dir_all(&hidden_dir).unwrap();
        fs::write(hidden_dir.join("a.mp3"), b"x").unwrap();
        fs::write(dir.path().join(".b.mp3"), b"x").unwrap();
        fs::write(dir.path().join("c.mp3"), b"x").unwrap();

        let mut settings = settings_for(&[dir.path()]);
        assert_eq!(names(&scan_all_audio_files(&settings)), vec!["c.mp3"]);

        settings.include_hidden = true;
        assert_eq!(
            names(&scan_all_audio_files(&settings)),
            vec![".b.mp3", "a.mp3", "c.mp3"]
        );
    }

    #[test]
    fn scanned_key_tracks_modification_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        fs::write(&path, b"x").unwrap();
        let file = ScannedFile::from_path(&path).unwrap();
        let touched = ScannedFile {
            modified_ms: file.modified_ms + 1,
            ..file.clone()
        };
        assert_ne!(file.content_key(), touched.content_key());
        assert!(ScannedFile::from_path(dir.path()).is_err());
    }

    #[test]
    fn single_file_key_matches_directory_scan() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("a.mp3"), b"x").unwrap();

        let scanned = scan_all_audio_files(&settings_for(&[dir.path()]));
        let dotted = ScannedFile::from_path(&dir.path().join(".").join("sub/../sub/a.mp3")).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(dotted.path, scanned[0].path);
        assert_eq!(dotted.content_key(), scanned[0].content_key());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_does_not_abort() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("hidden.mp3"), b"x").unwrap();
        fs::write(dir.path().join("open.mp3"), b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not apply to root.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let files = scan_all_audio_files(&settings_for(&[dir.path()]));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(names(&files), vec!["open.mp3"]);
    }
}
