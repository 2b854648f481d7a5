use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Foreign-key value for a record that matched no aggregate.
pub const UNKNOWN_ID: i64 = -1;

pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_GENRE: &str = "Unknown Genre";

const KEY_SEP: u8 = 0x1f;

/// One audio track as known to the library.
///
/// `id` is the content key of the file the record was built from. The three
/// foreign keys are [`UNKNOWN_ID`] until the entity mapper backfills them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioData {
    pub id: i64,
    pub path: PathBuf,
    pub title: String,
    pub album: Option<String>,
    pub album_id: i64,
    pub artist: Option<String>,
    pub artist_id: i64,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub genre_id: i64,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: u32,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub size: u64,
    pub mime_type: String,
    pub modified_ms: i64,
    pub cover: Option<CoverRef>,
}

/// Display names. Only an absent value shows the placeholder; grouping
/// itself keys on the raw `Option`.
impl AudioData {
    pub fn album_name(&self) -> &str {
        self.album.as_deref().unwrap_or(UNKNOWN_ALBUM)
    }

    pub fn artist_name(&self) -> &str {
        self.artist.as_deref().unwrap_or(UNKNOWN_ARTIST)
    }

    pub fn genre_name(&self) -> &str {
        self.genre.as_deref().unwrap_or(UNKNOWN_GENRE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverRef {
    Embedded { audio_id: i64 },
    File { path: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlbumData {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub year: Option<i32>,
    pub track_count: usize,
    pub cover: Option<CoverRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtistData {
    pub id: i64,
    pub name: String,
    pub track_count: usize,
    pub album_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenreData {
    pub id: i64,
    pub name: String,
    pub track_count: usize,
}

/// Full output of one scan: the unit handed to persistence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaDataModel {
    pub audio: Vec<AudioData>,
    pub albums: Vec<AlbumData>,
    pub artists: Vec<ArtistData>,
    pub genres: Vec<GenreData>,
}

/// Identity of a file at a point in time. Changes whenever the file is
/// modified or moved.
pub fn content_key(path: &Path, modified_ms: i64) -> i64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(&[KEY_SEP]);
    hasher.update(&modified_ms.to_le_bytes());
    fold_hash(hasher.finalize())
}

/// Id for an aggregate that has no previously assigned id.
pub fn stable_key(name: &str) -> i64 {
    fold_hash(blake3::hash(name.as_bytes()))
}

// Sign bit cleared so a derived key can never collide with UNKNOWN_ID.
fn fold_hash(hash: blake3::Hash) -> i64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(head) & i64::MAX as u64) as i64
}
