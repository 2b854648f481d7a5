use std::collections::{HashMap, HashSet};

use common::{
    stable_key, AlbumData, ArtistData, AudioData, GenreData, MediaDataModel, UNKNOWN_ALBUM,
    UNKNOWN_ARTIST, UNKNOWN_GENRE, UNKNOWN_ID,
};

/// Records sharing one raw name, in input order. `key` is `None` for the
/// bucket of records that carry no name at all.
struct Group {
    id: i64,
    key: Option<String>,
    name: String,
    members: Vec<usize>,
}

/// Groups the flat audio list into album, artist and genre aggregates and
/// backfills each record's foreign keys.
///
/// Names are compared exactly. Aggregates are listed in the order their first
/// member appears in `audio`.
pub fn map_to_media_data(mut audio: Vec<AudioData>) -> MediaDataModel {
    let album_groups = group_by(&audio, |a| a.album.as_deref(), UNKNOWN_ALBUM, |a| {
        a.album_id
    });
    let artist_groups = group_by(&audio, |a| a.artist.as_deref(), UNKNOWN_ARTIST, |a| {
        a.artist_id
    });
    let genre_groups = group_by(&audio, |a| a.genre.as_deref(), UNKNOWN_GENRE, |a| {
        a.genre_id
    });

    let albums: Vec<AlbumData> = album_groups
        .iter()
        .map(|group| {
            let first = &audio[group.members[0]];
            AlbumData {
                id: group.id,
                title: group.name.clone(),
                artist: first
                    .album_artist
                    .as_deref()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| first.artist_name())
                    .to_string(),
                year: group.members.iter().find_map(|&idx| audio[idx].year),
                track_count: group.members.len(),
                cover: first.cover.clone(),
            }
        })
        .collect();

    let artists: Vec<ArtistData> = artist_groups
        .iter()
        .map(|group| {
            let album_count = group
                .members
                .iter()
                .map(|&idx| audio[idx].album.as_deref())
                .collect::<HashSet<_>>()
                .len();
            ArtistData {
                id: group.id,
                name: group.name.clone(),
                track_count: group.members.len(),
                album_count,
            }
        })
        .collect();

    let genres: Vec<GenreData> = genre_groups
        .iter()
        .map(|group| GenreData {
            id: group.id,
            name: group.name.clone(),
            track_count: group.members.len(),
        })
        .collect();

    // Second pass: every aggregate exists before any foreign key is written.
    let album_ids = id_lookup(&album_groups);
    let artist_ids = id_lookup(&artist_groups);
    let genre_ids = id_lookup(&genre_groups);

    audio = audio
        .into_iter()
        .map(|record| AudioData {
            album_id: lookup(&album_ids, &record.album),
            artist_id: lookup(&artist_ids, &record.artist),
            genre_id: lookup(&genre_ids, &record.genre),
            ..record
        })
        .collect();

    MediaDataModel {
        audio,
        albums,
        artists,
        genres,
    }
}

fn group_by(
    audio: &[AudioData],
    key_of: impl Fn(&AudioData) -> Option<&str>,
    unknown: &str,
    previous_id: impl Fn(&AudioData) -> i64,
) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut by_key: HashMap<Option<String>, usize> = HashMap::new();

    for (idx, record) in audio.iter().enumerate() {
        let key = key_of(record).map(str::to_string);
        match by_key.get(&key) {
            Some(&slot) => groups[slot].members.push(idx),
            None => {
                by_key.insert(key.clone(), groups.len());
                groups.push(Group {
                    id: UNKNOWN_ID,
                    name: key.clone().unwrap_or_else(|| unknown.to_string()),
                    key,
                    members: vec![idx],
                });
            }
        }
    }

    let mut taken: HashSet<i64> = HashSet::with_capacity(groups.len());
    for group in &mut groups {
        let previous = previous_id(&audio[group.members[0]]);
        group.id = if previous != UNKNOWN_ID && taken.insert(previous) {
            previous
        } else {
            let mut candidate = stable_key(&group.name);
            while !taken.insert(candidate) {
                candidate = (candidate + 1) & i64::MAX;
            }
            candidate
        };
    }

    groups
}

fn id_lookup(groups: &[Group]) -> HashMap<Option<String>, i64> {
    groups
        .iter()
        .map(|group| (group.key.clone(), group.id))
        .collect()
}

fn lookup(ids: &HashMap<Option<String>, i64>, key: &Option<String>) -> i64 {
    ids.get(key).copied().unwrap_or(UNKNOWN_ID)
}
