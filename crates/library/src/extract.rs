use std::fs;
use std::path::Path;

use common::{AudioData, CoverRef, UNKNOWN_ID};
use metadata::{MetadataError, TagExtractor, TagInfo};
use tracing::warn;

use crate::scanner::ScannedFile;

const FOLDER_COVERS: &[&str] = &[
    "cover.jpg",
    "cover.jpeg",
    "cover.png",
    "folder.jpg",
    "folder.jpeg",
    "folder.png",
    "front.jpg",
    "front.png",
    "album.jpg",
    "album.png",
];

const DISC_KEYWORDS: &[&str] = &["cd", "disc", "disk", "vol", "volume", "part", "side"];

/// Tags for one file, or `None` when it cannot be read as audio.
pub fn extract_tag(extractor: &dyn TagExtractor, file: &ScannedFile) -> Option<AudioData> {
    match try_extract_tag(extractor, file) {
        Ok(audio) => Some(audio),
        Err(err) => {
            warn!("Failed to read tags for {:?}: {}", file.path, err);
            None
        }
    }
}

pub fn try_extract_tag(
    extractor: &dyn TagExtractor,
    file: &ScannedFile,
) -> Result<AudioData, MetadataError> {
    let tags = extractor.read_tags(&file.path)?;
    Ok(audio_from_tags(file, tags))
}

pub fn audio_from_tags(file: &ScannedFile, tags: TagInfo) -> AudioData {
    let id = file.content_key();
    let cover = if tags.has_embedded_cover {
        Some(CoverRef::Embedded { audio_id: id })
    } else {
        file.path
            .parent()
            .and_then(find_folder_cover)
            .map(|path| CoverRef::File { path })
    };
    let mime_type = tags
        .mime_type
        .or_else(|| {
            mime_guess::from_path(&file.path)
                .first_raw()
                .map(str::to_string)
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let disc_no = tags.disc_no.or_else(|| disc_number_from_path(&file.path));

    AudioData {
        id,
        path: file.path.clone(),
        title: tags.title.unwrap_or_else(|| file_stem(&file.path)),
        album: tags.album,
        album_id: UNKNOWN_ID,
        artist: tags.artist.or_else(|| tags.album_artist.clone()),
        artist_id: UNKNOWN_ID,
        album_artist: tags.album_artist,
        genre: tags.genres.into_iter().next(),
        genre_id: UNKNOWN_ID,
        track_no: tags.track_no,
        disc_no,
        year: tags.year,
        duration_ms: tags.duration_ms.unwrap_or(0),
        bitrate: tags.bitrate,
        sample_rate: tags.sample_rate,
        channels: tags.channels,
        size: file.size,
        mime_type,
        modified_ms: file.modified_ms,
        cover,
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string())
}

fn find_folder_cover(dir: &Path) -> Option<String> {
    let entries = fs::read_dir(dir).ok()?;
    let mut best: Option<(usize, String)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_ascii_lowercase(),
            None => continue,
        };
        if let Some(rank) = FOLDER_COVERS.iter().position(|candidate| *candidate == name) {
            if best.as_ref().map_or(true, |(current, _)| rank < *current) {
                best = Some((rank, path.to_string_lossy().to_string()));
            }
        }
    }
    best.map(|(_, path)| path)
}

/// Disc number from a parent folder such as `CD2`, `Disc 1` or `disc_02`.
fn disc_number_from_path(file: &Path) -> Option<u16> {
    let name = file.parent()?.file_name()?.to_str()?;
    parse_disc_folder(name)
}

fn parse_disc_folder(name: &str) -> Option<u16> {
    let cleaned: String = name
        .chars()
        .map(|ch| match ch {
            '_' | '-' | '.' => ' ',
            other => other.to_ascii_lowercase(),
        })
        .collect();
    let cleaned = cleaned.trim();

    for keyword in DISC_KEYWORDS {
        if let Some(rest) = cleaned.strip_prefix(keyword) {
            let rest = rest.trim();
            if !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()) {
                return rest.parse().ok();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct FixedTags(TagInfo);

    impl TagExtractor for FixedTags {
        fn read_tags(&self, _path: &Path) -> Result<TagInfo, MetadataError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl TagExtractor for Broken {
        fn read_tags(&self, _path: &Path) -> Result<TagInfo, MetadataError> {
            Err(MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "corrupt",
            )))
        }
    }

    fn scanned(path: PathBuf) -> ScannedFile {
        ScannedFile {
            path,
            modified_ms: 42,
            size: 1234,
        }
    }

    #[test]
    fn fills_fallbacks_from_the_file() {
        let dir = tempdir().unwrap();
        let disc = dir.path().join("Album").join("CD2");
        fs::create_dir_all(&disc).unwrap();
        fs::write(disc.join("Folder.JPG"), b"x").unwrap();
        let file = scanned(disc.join("07 Song.mp3"));

        let tags = TagInfo {
            album_artist: Some("Band".to_string()),
            genres: vec!["Rock".to_string(), "Pop".to_string()],
            ..TagInfo::default()
        };
        let audio = extract_tag(&FixedTags(tags), &file).unwrap();

        assert_eq!(audio.id, file.content_key());
        assert_eq!(audio.title, "07 Song");
        assert_eq!(audio.artist.as_deref(), Some("Band"));
        assert_eq!(audio.genre.as_deref(), Some("Rock"));
        assert_eq!(audio.disc_no, Some(2));
        assert_eq!(audio.mime_type, "audio/mpeg");
        assert_eq!(audio.size, 1234);
        assert_eq!(audio.album_id, UNKNOWN_ID);
        assert!(matches!(audio.cover, Some(CoverRef::File { .. })));
    }

    #[test]
    fn embedded_cover_wins_over_folder_image() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cover.jpg"), b"x").unwrap();
        let file = scanned(dir.path().join("a.flac"));
        let tags = TagInfo {
            title: Some("A".to_string()),
            has_embedded_cover: true,
            mime_type: Some("audio/flac".to_string()),
            ..TagInfo::default()
        };
        let audio = audio_from_tags(&file, tags);
        assert_eq!(
            audio.cover,
            Some(CoverRef::Embedded {
                audio_id: file.content_key()
            })
        );
        assert_eq!(audio.mime_type, "audio/flac");
    }

    #[test]
    fn read_failure_is_soft() {
        let file = scanned(PathBuf::from("/music/broken.mp3"));
        assert!(extract_tag(&Broken, &file).is_none());
        assert!(try_extract_tag(&Broken, &file).is_err());
    }

    #[test]
    fn disc_folders() {
        assert_eq!(parse_disc_folder("CD2"), Some(2));
        assert_eq!(parse_disc_folder("Disc 1"), Some(1));
        assert_eq!(parse_disc_folder("disc_02"), Some(2));
        assert_eq!(parse_disc_folder("Vol.3"), Some(3));
        assert_eq!(parse_disc_folder("Discography"), None);
        assert_eq!(parse_disc_folder("Album"), None);
    }
}
