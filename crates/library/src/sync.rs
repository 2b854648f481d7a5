use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{AudioData, MediaDataModel};
use metadata::TagExtractor;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SettingsProvider;
use crate::extract::try_extract_tag;
use crate::mapper::map_to_media_data;
use crate::scanner::{scan_all_audio_files, ScannedFile};
use crate::store::{LibraryStore, TagErrorFile};
use crate::LibraryError;

/// Counters for one sync pass, plus every file whose tags could not be read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncReport {
    pub scanned: usize,
    pub reused: usize,
    pub extracted: usize,
    pub failed: Vec<TagErrorFile>,
}

struct Extraction {
    path: PathBuf,
    result: Result<AudioData, LibraryError>,
}

/// Reconciles the files on disk with the persisted library.
///
/// Unchanged files (same content key) reuse their stored record; new and
/// modified files have their tags extracted concurrently. The engine never
/// writes to the store: persisting the returned model is the caller's job.
#[derive(Clone)]
pub struct MediaSyncer {
    store: Arc<dyn LibraryStore>,
    settings: Arc<dyn SettingsProvider>,
    extractor: Arc<dyn TagExtractor>,
}

impl MediaSyncer {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        settings: Arc<dyn SettingsProvider>,
        extractor: Arc<dyn TagExtractor>,
    ) -> Self {
        Self {
            store,
            settings,
            extractor,
        }
    }

    pub async fn scan_all_media(&self) -> Result<MediaDataModel, LibraryError> {
        let (model, _) = self.sync_all().await?;
        Ok(model)
    }

    pub async fn sync_all(&self) -> Result<(MediaDataModel, SyncReport), LibraryError> {
        let settings = self.settings.scan_settings()?;
        let limit = settings.max_concurrent_extractions;

        let store = Arc::clone(&self.store);
        let known = tokio::task::spawn_blocking(move || store.load_audio()).await??;
        let mut index: HashMap<i64, AudioData> =
            known.into_iter().map(|audio| (audio.id, audio)).collect();

        let files = tokio::task::spawn_blocking(move || scan_all_audio_files(&settings)).await?;

        let mut report = SyncReport {
            scanned: files.len(),
            ..SyncReport::default()
        };
        let mut merged: BTreeMap<PathBuf, AudioData> = BTreeMap::new();
        let mut pending = Vec::new();
        for file in files {
            match index.remove(&file.content_key()) {
                Some(record) if record.path == file.path => {
                    merged.insert(file.path, record);
                }
                _ => pending.push(file),
            }
        }
        report.reused = merged.len();
        debug!(
            "Sync: {} unchanged, {} to extract, {} stale records dropped",
            report.reused,
            pending.len(),
            index.len()
        );

        self.extract_into(pending, limit, &mut merged, &mut report)
            .await?;

        let model = map_to_media_data(merged.into_values().collect());
        info!(
            "Sync finished: {} tracks ({} reused, {} extracted, {} failed)",
            model.audio.len(),
            report.reused,
            report.extracted,
            report.failed.len()
        );
        Ok((model, report))
    }

    pub async fn scan_media_by_uri(&self, uris: &[String]) -> Result<MediaDataModel, LibraryError> {
        let (model, _) = self.sync_uris(uris).await?;
        Ok(model)
    }

    /// Extracts exactly the given files, ignoring anything already stored.
    pub async fn sync_uris(
        &self,
        uris: &[String],
    ) -> Result<(MediaDataModel, SyncReport), LibraryError> {
        let limit = self.settings.scan_settings()?.max_concurrent_extractions;
        let paths: BTreeSet<PathBuf> = uris.iter().map(PathBuf::from).collect();

        let stat = tokio::task::spawn_blocking(move || {
            paths
                .into_iter()
                .map(|path| {
                    let stat = ScannedFile::from_path(&path);
                    (path, stat)
                })
                .collect::<Vec<_>>()
        })
        .await?;

        let mut report = SyncReport::default();
        // Keyed by canonical path: two spellings of one file extract once.
        let mut unique: BTreeMap<PathBuf, ScannedFile> = BTreeMap::new();
        for (path, stat) in stat {
            match stat {
                Ok(file) => {
                    unique.insert(file.path.clone(), file);
                }
                Err(err) => {
                    warn!("Skipping {:?}: {}", path, err);
                    report.failed.push(tag_error(path, &LibraryError::from(err)));
                }
            }
        }
        let pending: Vec<ScannedFile> = unique.into_values().collect();
        report.scanned = pending.len();

        let mut merged = BTreeMap::new();
        self.extract_into(pending, limit, &mut merged, &mut report)
            .await?;
        Ok((map_to_media_data(merged.into_values().collect()), report))
    }

    /// Fans out one extraction per file and waits for all of them.
    ///
    /// Dropping the returned future aborts queued tasks and stops blocking
    /// reads that have not started yet.
    async fn extract_into(
        &self,
        files: Vec<ScannedFile>,
        limit: usize,
        merged: &mut BTreeMap<PathBuf, AudioData>,
        report: &mut SyncReport,
    ) -> Result<(), LibraryError> {
        if files.is_empty() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let _cancel_on_drop = token.clone().drop_guard();
        let permits = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));

        let mut tasks = JoinSet::new();
        for file in files {
            let extractor = Arc::clone(&self.extractor);
            let token = token.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = match permits {
                    Some(permits) => permits.acquire_owned().await.ok(),
                    None => None,
                };
                let path = file.path.clone();
                let read = tokio::task::spawn_blocking(move || {
                    if token.is_cancelled() {
                        return Err(LibraryError::Cancelled);
                    }
                    Ok(try_extract_tag(extractor.as_ref(), &file)?)
                })
                .await;
                // A panicking extractor surfaces here as a JoinError.
                let result = match read {
                    Ok(result) => result,
                    Err(err) => Err(LibraryError::Task(err)),
                };
                Extraction { path, result }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Extraction { path, result } = joined?;
            match result {
                Ok(audio) => {
                    report.extracted += 1;
                    merged.insert(path, audio);
                }
                Err(err) => {
                    warn!("Failed to read tags for {:?}: {}", path, err);
                    report.failed.push(tag_error(path, &err));
                }
            }
        }
        report.failed.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(())
    }
}

fn tag_error(path: PathBuf, error: &LibraryError) -> TagErrorFile {
    TagErrorFile {
        file_path: path.to_string_lossy().to_string(),
        error: error.to_string(),
        last_seen: now_secs(),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
