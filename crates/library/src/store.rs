use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{AlbumData, ArtistData, AudioData, CoverRef, GenreData, MediaDataModel};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::LibraryError;

const INDEX_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const AUDIO_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("audio");
const ALBUMS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("albums");
const ARTISTS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("artists");
const GENRES_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("genres");
const TAG_ERROR_FILES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("tag_error_files");

const META_VERSION_KEY: &str = "version";
const META_STATS_KEY: &str = "stats";

/// Previously persisted library contents, as seen by the sync engine.
///
/// The engine only ever reads through this trait; writes are the caller's.
pub trait LibraryStore: Send + Sync {
    fn load_audio(&self) -> Result<Vec<AudioData>, LibraryError>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub tracks: usize,
    pub albums: usize,
    pub artists: usize,
    pub genres: usize,
}

impl LibraryStats {
    pub fn of(model: &MediaDataModel) -> Self {
        Self {
            tracks: model.audio.len(),
            albums: model.albums.len(),
            artists: model.artists.len(),
            genres: model.genres.len(),
        }
    }
}

/// A file whose tags could not be read on the last sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagErrorFile {
    pub file_path: String,
    pub error: String,
    pub last_seen: u64,
}

/// Stored shape of an audio row. Paths are kept as plain strings so rows stay
/// readable across platforms.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct AudioEntity {
    id: i64,
    path: String,
    title: String,
    album: Option<String>,
    album_id: i64,
    artist: Option<String>,
    artist_id: i64,
    album_artist: Option<String>,
    genre: Option<String>,
    genre_id: i64,
    track_no: Option<u16>,
    disc_no: Option<u16>,
    year: Option<i32>,
    duration_ms: u32,
    bitrate: Option<u32>,
    sample_rate: Option<u32>,
    channels: Option<u8>,
    size: u64,
    mime_type: String,
    modified_ms: i64,
    cover: Option<CoverRef>,
}

impl From<&AudioData> for AudioEntity {
    fn from(audio: &AudioData) -> Self {
        Self {
            id: audio.id,
            path: audio.path.to_string_lossy().to_string(),
            title: audio.title.clone(),
            album: audio.album.clone(),
            album_id: audio.album_id,
            artist: audio.artist.clone(),
            artist_id: audio.artist_id,
            album_artist: audio.album_artist.clone(),
            genre: audio.genre.clone(),
            genre_id: audio.genre_id,
            track_no: audio.track_no,
            disc_no: audio.disc_no,
            year: audio.year,
            duration_ms: audio.duration_ms,
            bitrate: audio.bitrate,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            size: audio.size,
            mime_type: audio.mime_type.clone(),
            modified_ms: audio.modified_ms,
            cover: audio.cover.clone(),
        }
    }
}

impl From<AudioEntity> for AudioData {
    fn from(entity: AudioEntity) -> Self {
        Self {
            id: entity.id,
            path: PathBuf::from(entity.path),
            title: entity.title,
            album: entity.album,
            album_id: entity.album_id,
            artist: entity.artist,
            artist_id: entity.artist_id,
            album_artist: entity.album_artist,
            genre: entity.genre,
            genre_id: entity.genre_id,
            track_no: entity.track_no,
            disc_no: entity.disc_no,
            year: entity.year,
            duration_ms: entity.duration_ms,
            bitrate: entity.bitrate,
            sample_rate: entity.sample_rate,
            channels: entity.channels,
            size: entity.size,
            mime_type: entity.mime_type,
            modified_ms: entity.modified_ms,
            cover: entity.cover,
        }
    }
}

/// Library index kept in a redb database.
#[derive(Clone)]
pub struct LibraryDb {
    db: Arc<Database>,
}

impl LibraryDb {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        info!("Opened library index at {:?}", path);
        Ok(Self { db: Arc::new(db) })
    }

    pub fn with_db(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Replaces the whole index with `model` in one write transaction.
    pub fn replace(
        &self,
        model: &MediaDataModel,
        failures: &[TagErrorFile],
    ) -> Result<LibraryStats, LibraryError> {
        let stats = LibraryStats::of(model);
        let write_txn = self.db.begin_write()?;

        clear_table(&write_txn, META_TABLE)?;
        clear_id_table(&write_txn, AUDIO_TABLE)?;
        clear_id_table(&write_txn, ALBUMS_TABLE)?;
        clear_id_table(&write_txn, ARTISTS_TABLE)?;
        clear_id_table(&write_txn, GENRES_TABLE)?;
        clear_table(&write_txn, TAG_ERROR_FILES_TABLE)?;

        {
            let mut audio_table = write_txn.open_table(AUDIO_TABLE)?;
            for audio in &model.audio {
                let bytes = encode_value(&AudioEntity::from(audio))?;
                audio_table.insert(audio.id, bytes.as_slice())?;
            }

            let mut albums_table = write_txn.open_table(ALBUMS_TABLE)?;
            for album in &model.albums {
                let bytes = encode_value(album)?;
                albums_table.insert(album.id, bytes.as_slice())?;
            }

            let mut artists_table = write_txn.open_table(ARTISTS_TABLE)?;
            for artist in &model.artists {
                let bytes = encode_value(artist)?;
                artists_table.insert(artist.id, bytes.as_slice())?;
            }

            let mut genres_table = write_txn.open_table(GENRES_TABLE)?;
            for genre in &model.genres {
                let bytes = encode_value(genre)?;
                genres_table.insert(genre.id, bytes.as_slice())?;
            }

            let mut tag_error_files_table = write_txn.open_table(TAG_ERROR_FILES_TABLE)?;
            for failure in failures {
                let bytes = encode_value(failure)?;
                tag_error_files_table.insert(failure.file_path.as_str(), bytes.as_slice())?;
            }

            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let version_bytes = encode_value(&INDEX_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
            let stats_bytes = encode_value(&stats)?;
            meta_table.insert(META_STATS_KEY, stats_bytes.as_slice())?;
        }

        write_txn.commit()?;
        Ok(stats)
    }

    pub fn stats(&self) -> Result<LibraryStats, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(LibraryStats::default()),
            Err(err) => return Err(err.into()),
        };
        let stats = match table.get(META_STATS_KEY)? {
            Some(value) => decode_value(value.value())?,
            None => LibraryStats::default(),
        };
        Ok(stats)
    }

    pub fn version(&self) -> Result<Option<u32>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let version = match table.get(META_VERSION_KEY)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(version)
    }

    pub fn get_audio(&self, id: i64) -> Result<Option<AudioData>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(AUDIO_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let audio = match table.get(id)? {
            Some(value) => Some(decode_value::<AudioEntity>(value.value())?.into()),
            None => None,
        };
        Ok(audio)
    }

    pub fn list_albums(&self) -> Result<Vec<AlbumData>, LibraryError> {
        self.read_all(ALBUMS_TABLE)
    }

    pub fn list_artists(&self) -> Result<Vec<ArtistData>, LibraryError> {
        self.read_all(ARTISTS_TABLE)
    }

    pub fn list_genres(&self) -> Result<Vec<GenreData>, LibraryError> {
        self.read_all(GENRES_TABLE)
    }

    /// Everything the last `replace` wrote, in id order.
    pub fn load_model(&self) -> Result<MediaDataModel, LibraryError> {
        let audio = self
            .read_all::<AudioEntity>(AUDIO_TABLE)?
            .into_iter()
            .map(AudioData::from)
            .collect();
        Ok(MediaDataModel {
            audio,
            albums: self.list_albums()?,
            artists: self.list_artists()?,
            genres: self.list_genres()?,
        })
    }

    pub fn list_tag_error_files(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<TagErrorFile>, usize), LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TAG_ERROR_FILES_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok((Vec::new(), 0)),
            Err(err) => return Err(err.into()),
        };

        let mut total = 0usize;
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            total += 1;
            if total <= offset || items.len() >= limit {
                continue;
            }
            items.push(decode_value(entry.1.value())?);
        }

        Ok((items, total))
    }

    fn read_all<T: for<'de> Deserialize<'de>>(
        &self,
        definition: TableDefinition<i64, &[u8]>,
    ) -> Result<Vec<T>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(definition) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            items.push(decode_value(entry.1.value())?);
        }
        Ok(items)
    }
}

impl LibraryStore for LibraryDb {
    fn load_audio(&self) -> Result<Vec<AudioData>, LibraryError> {
        match self.version()? {
            Some(version) if version == INDEX_VERSION => {}
            Some(version) => {
                warn!("Index version mismatch ({}); re-extracting everything", version);
                return Ok(Vec::new());
            }
            None => return Ok(Vec::new()),
        }
        Ok(self
            .read_all::<AudioEntity>(AUDIO_TABLE)?
            .into_iter()
            .map(AudioData::from)
            .collect())
    }
}

/// In-process store holding the last persisted snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
    model: RwLock<MediaDataModel>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, model: MediaDataModel) -> LibraryStats {
        let stats = LibraryStats::of(&model);
        *self.model.write() = model;
        stats
    }

    pub fn snapshot(&self) -> MediaDataModel {
        self.model.read().clone()
    }
}

impl LibraryStore for MemoryStore {
    fn load_audio(&self) -> Result<Vec<AudioData>, LibraryError> {
        Ok(self.model.read().audio.clone())
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    deleted_or_missing(txn.delete_table(table))
}

fn clear_id_table(
    txn: &WriteTransaction,
    table: TableDefinition<i64, &[u8]>,
) -> Result<(), LibraryError> {
    deleted_or_missing(txn.delete_table(table))
}

fn deleted_or_missing(result: Result<bool, TableError>) -> Result<(), LibraryError> {
    match result {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}
