mod watch;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use library::config::{config_path_from_env, load_or_create_config, resolve_path};
use library::{LibraryDb, LibraryStats, MediaSyncer, YamlSettings};
use metadata::LoftyExtractor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

enum Mode {
    Once,
    Watch,
    Uris(Vec<String>),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (config_path, mode) = parse_args(env::args().skip(1))?;
    let config_path = config_path.unwrap_or_else(config_path_from_env);
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }
    if config.library_paths.is_empty() {
        warn!("No library_paths configured in {:?}", config_path);
    }

    let index_path = resolve_path(&config_path, &config.index_path);
    let db = Arc::new(LibraryDb::open(&index_path)?);
    let settings = Arc::new(YamlSettings::new(config_path.clone()));
    let syncer = MediaSyncer::new(db.clone(), settings, Arc::new(LoftyExtractor));

    match mode {
        Mode::Uris(uris) => {
            let model = syncer.scan_media_by_uri(&uris).await?;
            println!("{}", serde_json::to_string_pretty(&model)?);
        }
        Mode::Once => {
            let stats = sync_and_store(&syncer, &db).await?;
            print_stats(&stats);
        }
        Mode::Watch => {
            let stats = sync_and_store(&syncer, &db).await?;
            print_stats(&stats);
            if !config.watch_library {
                warn!("watch_library is disabled in the config; exiting after one sync");
                return Ok(());
            }
            let roots: Vec<PathBuf> = config
                .scan_settings(&config_path)
                .library_paths
                .into_iter()
                .map(PathBuf::from)
                .collect();
            let debounce = Duration::from_secs(config.watch_debounce_secs.max(1));
            watch::run(syncer, db, roots, debounce).await?;
        }
    }

    Ok(())
}

fn parse_args(
    args: impl Iterator<Item = String>,
) -> Result<(Option<PathBuf>, Mode), Box<dyn std::error::Error>> {
    let mut config_path = None;
    let mut mode = Mode::Once;
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--watch" => mode = Mode::Watch,
            "--uri" => {
                let uris: Vec<String> = std::iter::from_fn(|| {
                    args.next_if(|next| !next.starts_with("--"))
                })
                .collect();
                if uris.is_empty() {
                    return Err("--uri needs at least one path".into());
                }
                mode = Mode::Uris(uris);
            }
            flag if flag.starts_with("--") => {
                return Err(format!("unknown flag {}", flag).into());
            }
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }
    Ok((config_path, mode))
}

pub(crate) async fn sync_and_store(
    syncer: &MediaSyncer,
    db: &Arc<LibraryDb>,
) -> Result<LibraryStats, Box<dyn std::error::Error>> {
    let (model, report) = syncer.sync_all().await?;
    let db = Arc::clone(db);
    let stats = tokio::task::spawn_blocking(move || db.replace(&model, &report.failed)).await??;
    Ok(stats)
}

fn print_stats(stats: &LibraryStats) {
    println!(
        "Indexed: {} tracks, {} albums, {} artists, {} genres",
        stats.tracks, stats.albums, stats.artists, stats.genres
    );
}
