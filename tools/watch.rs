use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use library::{LibraryDb, MediaSyncer};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::sync_and_store;

/// Watches every library root and re-syncs after a quiet period, until Ctrl-C.
pub async fn run(
    syncer: MediaSyncer,
    db: Arc<LibraryDb>,
    roots: Vec<PathBuf>,
    debounce: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    let mut watched = 0usize;
    for root in &roots {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                info!(
                    "Watching {} for changes (debounce {}s)",
                    root.display(),
                    debounce.as_secs()
                );
                watched += 1;
            }
            Err(err) => warn!("Failed to watch {}: {}", root.display(), err),
        }
    }
    if watched == 0 {
        warn!("No library root could be watched");
        return Ok(());
    }

    tokio::select! {
        _ = watch_loop(syncer, db, rx, debounce) => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Interrupted, stopping watcher");
        }
    }
    drop(watcher);
    Ok(())
}

async fn watch_loop(
    syncer: MediaSyncer,
    db: Arc<LibraryDb>,
    mut rx: UnboundedReceiver<Event>,
    debounce: Duration,
) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {
                    match sync_and_store(&syncer, &db).await {
                        Ok(stats) => info!(
                            "Re-sync complete: {} tracks, {} albums, {} artists, {} genres",
                            stats.tracks, stats.albums, stats.artists, stats.genres
                        ),
                        Err(err) => warn!("Re-sync failed: {}", err),
                    }
                    break;
                }
                maybe_event = rx.recv() => {
                    if maybe_event.is_none() {
                        return;
                    }
                }
            }
        }
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, RemoveKind};

    #[test]
    fn only_content_changes_trigger_a_resync() {
        assert!(is_relevant_event(&Event::new(EventKind::Create(CreateKind::File))));
        assert!(is_relevant_event(&Event::new(EventKind::Remove(RemoveKind::File))));
        assert!(!is_relevant_event(&Event::new(EventKind::Access(AccessKind::Read))));
    }
}
