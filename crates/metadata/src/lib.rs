use std::path::Path;

use lofty::error::LoftyError;
use lofty::file::FileType;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};

/// Raw tag fields of one file, before they are shaped into a library record.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub bitrate: Option<u32>,
    pub has_embedded_cover: bool,
    pub genres: Vec<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Reads embedded tags from a single file.
///
/// Implementations are called from many blocking workers at once and must not
/// share mutable state between calls.
pub trait TagExtractor: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<TagInfo, MetadataError>;
}

/// [`TagExtractor`] backed by lofty.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyExtractor;

impl TagExtractor for LoftyExtractor {
    fn read_tags(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        read_tags(path)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        info.duration_ms = Some(duration_ms.min(u128::from(u32::MAX)) as u32);
    }

    info.sample_rate = properties.sample_rate();
    info.channels = properties.channels();
    info.bitrate = properties.audio_bitrate().or(properties.overall_bitrate());
    info.mime_type = container_mime(tagged_file.file_type()).map(str::to_string);

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        let text = |key: &ItemKey| tag.get_string(key).and_then(non_blank);
        info.title = text(&ItemKey::TrackTitle);
        info.album = text(&ItemKey::AlbumTitle);
        info.album_artist = text(&ItemKey::AlbumArtist);
        info.artist = text(&ItemKey::TrackArtist).or_else(|| info.album_artist.clone());
        info.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_u16);
        info.disc_no = tag.get_string(&ItemKey::DiscNumber).and_then(parse_u16);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        if let Some(value) = tag.get_string(&ItemKey::Genre) {
            info.genres = parse_genres(value);
        }
        info.has_embedded_cover = !tag.pictures().is_empty();
    }

    Ok(info)
}

fn container_mime(file_type: FileType) -> Option<&'static str> {
    match file_type {
        FileType::Mpeg => Some("audio/mpeg"),
        FileType::Flac => Some("audio/flac"),
        FileType::Vorbis => Some("audio/ogg"),
        FileType::Opus => Some("audio/opus"),
        FileType::Mp4 => Some("audio/mp4"),
        FileType::Aac => Some("audio/aac"),
        FileType::Wav => Some("audio/wav"),
        FileType::Aiff => Some("audio/aiff"),
        FileType::WavPack => Some("audio/x-wavpack"),
        FileType::Ape => Some("audio/x-ape"),
        _ => None,
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Accepts `"3"` and `"3/12"` forms.
pub fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

/// First run of up to four digits, so `"1997-05-01"` and `"(1997)"` both work.
pub fn parse_year(text: &str) -> Option<i32> {
    let digits: String = text
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .take(4)
        .collect();
    digits.parse().ok()
}

pub fn parse_genres(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in text.split(&[';', ',', '/', '|', '\0'][..]) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.iter().any(|seen| seen.eq_ignore_ascii_case(trimmed)) {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn track_numbers_accept_totals() {
        assert_eq!(parse_u16("7"), Some(7));
        assert_eq!(parse_u16(" 3/12 "), Some(3));
        assert_eq!(parse_u16("A1"), None);
    }

    #[test]
    fn years_are_taken_from_dates() {
        assert_eq!(parse_year("1997"), Some(1997));
        assert_eq!(parse_year("1997-05-01"), Some(1997));
        assert_eq!(parse_year("(2004)"), Some(2004));
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn genres_split_and_dedup() {
        assert_eq!(
            parse_genres("Rock; Pop/rock |\0Jazz"),
            vec!["Rock".to_string(), "Pop".to_string(), "Jazz".to_string()]
        );
        assert!(parse_genres(" ; ").is_empty());
    }

    #[test]
    fn unrecognised_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"definitely not audio").unwrap();
        assert!(LoftyExtractor.read_tags(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_tags(&dir.path().join("gone.mp3")).unwrap_err();
        assert!(matches!(err, MetadataError::Io(_) | MetadataError::Lofty(_)));
    }
}
