//! Audio tag extractor
//!
//! Reads embedded tag blocks (ID3v2, Vorbis comments, MP4 atoms) from music
//! files via lofty. MusicBrainz ids found in tags become pending external
//! ids, which is how artist/release identity gets established later.

use anyhow::Result;
use async_trait::async_trait;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::ItemKey;

use crate::model::{Credit, CreditKind, ExternalId, LibraryKind};

use super::super::patch::MetadataPatch;
use super::super::probe::Entry;
use super::super::resolvers::is_audio;
use super::EmbeddedExtractor;

pub struct AudioTagExtractor;

#[async_trait]
impl EmbeddedExtractor for AudioTagExtractor {
    fn name(&self) -> &'static str {
        "audio-tags"
    }

    fn supports(&self, file: &Entry, kind: LibraryKind) -> bool {
        kind == LibraryKind::Music && is_audio(file)
    }

    async fn extract(&self, file: &Entry) -> Result<Option<MetadataPatch>> {
        let path = file.path.clone();
        // Tag parsing is synchronous file I/O.
        let patch = tokio::task::spawn_blocking(move || read_tags(&path)).await??;
        Ok(patch)
    }
}

fn read_tags(path: &std::path::Path) -> Result<Option<MetadataPatch>> {
    let tagged = Probe::open(path)?.read()?;
    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return Ok(None);
    };

    let mut patch = MetadataPatch::default();
    patch.title = tag.title().map(|s| s.to_string());
    patch.index_number = tag.track().map(|t| t as i32);
    if let Some(year) = tag.year() {
        patch.year = Some(year as i32);
    }
    if let Some(genre) = tag.genre() {
        patch.genres.insert(genre.to_string());
    }
    if let Some(artist) = tag.artist() {
        patch.credits.insert(Credit {
            name: artist.to_string(),
            role: Some("artist".to_string()),
            kind: CreditKind::Person,
        });
    }
    if let Some(album_artist) = tag.get_string(&ItemKey::AlbumArtist) {
        patch.credits.insert(Credit {
            name: album_artist.to_string(),
            role: Some("album_artist".to_string()),
            kind: CreditKind::Group,
        });
    }
    if let Some(album) = tag.album() {
        patch.hints.insert("album".to_string(), album.to_string());
    }

    for (key, provider) in [
        (ItemKey::MusicBrainzRecordingId, "musicbrainz_recording"),
        (ItemKey::MusicBrainzTrackId, "musicbrainz_track"),
        (ItemKey::MusicBrainzReleaseId, "musicbrainz_release"),
        (ItemKey::MusicBrainzReleaseGroupId, "musicbrainz_release_group"),
        (ItemKey::MusicBrainzArtistId, "musicbrainz_artist"),
    ] {
        if let Some(value) = tag.get_string(&key) {
            patch.pending_external_ids.insert(ExternalId::new(provider, value));
        }
    }

    let duration = tagged.properties().duration();
    if duration.as_millis() > 0 {
        patch.duration_ms = Some(duration.as_millis() as i64);
    }

    if patch.is_empty() {
        return Ok(None);
    }
    Ok(Some(patch))
}
