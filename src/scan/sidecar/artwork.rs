//! Local artwork sidecar parser
//!
//! Recognizes conventional artwork filenames next to a media file
//! (`poster.jpg`, `folder.png`, `fanart.jpg`, `<stem>-poster.jpg`, ...) and
//! records their paths as artwork source URIs for the ingestion service.

use anyhow::Result;

use super::super::patch::MetadataPatch;
use super::{Entry, SidecarParser, SidecarRequest, SidecarResult};

const POSTER_NAMES: &[&str] = &["poster", "folder", "cover", "movie"];
const BACKDROP_NAMES: &[&str] = &["fanart", "backdrop", "background"];
const THUMB_NAMES: &[&str] = &["thumb", "landscape"];

fn is_image_ext(ext: Option<&str>) -> bool {
    matches!(ext, Some("jpg" | "jpeg" | "png" | "webp"))
}

/// Which artwork slot a sidecar image belongs to, if any.
fn classify(stem: &str, media_stem: &str) -> Option<ArtworkSlot> {
    let name = stem
        .strip_prefix(media_stem)
        .map(|rest| rest.trim_start_matches(['-', '.', '_', ' ']))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(stem);

    if POSTER_NAMES.contains(&name) {
        Some(ArtworkSlot::Poster)
    } else if BACKDROP_NAMES.contains(&name) {
        Some(ArtworkSlot::Backdrop)
    } else if THUMB_NAMES.contains(&name) {
        Some(ArtworkSlot::Thumb)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtworkSlot {
    Poster,
    Backdrop,
    Thumb,
}

pub struct LocalArtworkParser;

impl SidecarParser for LocalArtworkParser {
    fn name(&self) -> &'static str {
        "local-artwork"
    }

    fn can_parse(&self, file: &Entry) -> bool {
        is_image_ext(file.ext.as_deref())
    }

    fn parse(&self, request: &SidecarRequest<'_>) -> Result<Option<SidecarResult>> {
        // Scan all sibling images once; the per-sidecar claim only triggers
        // the pass.
        let media_stem = request.media_file.stem();
        let mut patch = MetadataPatch::default();

        for sibling in request.siblings {
            if sibling.is_dir || !is_image_ext(sibling.ext.as_deref()) {
                continue;
            }
            let slot = classify(&sibling.stem(), &media_stem);
            let uri = sibling.path.to_string_lossy().to_string();
            match slot {
                Some(ArtworkSlot::Poster) if patch.poster_uri.is_none() => {
                    patch.poster_uri = Some(uri)
                }
                Some(ArtworkSlot::Backdrop) if patch.backdrop_uri.is_none() => {
                    patch.backdrop_uri = Some(uri)
                }
                Some(ArtworkSlot::Thumb) if patch.thumb_uri.is_none() => {
                    patch.thumb_uri = Some(uri)
                }
                _ => {}
            }
        }

        if patch.is_empty() {
            return Ok(None);
        }
        Ok(Some(SidecarResult { metadata: Some(patch), source: "local-artwork" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(name: &str) -> Entry {
        let path = PathBuf::from("/m/Movie (2001)").join(name);
        Entry {
            name: name.to_string(),
            ext: path.extension().map(|e| e.to_string_lossy().to_lowercase()),
            path,
            is_dir: false,
            size: Some(1),
            mtime: None,
            ctime: None,
            exists: true,
        }
    }

    #[test]
    fn test_conventional_names_fill_slots() {
        let media = entry("Movie.mkv");
        let siblings = vec![
            entry("Movie.mkv"),
            entry("poster.jpg"),
            entry("fanart.jpg"),
            entry("unrelated.jpg"),
        ];
        let request = SidecarRequest {
            media_file: &media,
            sidecar_file: &siblings[1],
            library_kind: crate::model::LibraryKind::Movies,
            siblings: &siblings,
        };
        let result = LocalArtworkParser.parse(&request).unwrap().unwrap();
        let patch = result.metadata.unwrap();
        assert!(patch.poster_uri.as_deref().unwrap().ends_with("poster.jpg"));
        assert!(patch.backdrop_uri.as_deref().unwrap().ends_with("fanart.jpg"));
        assert_eq!(patch.thumb_uri, None);
    }

    #[test]
    fn test_stem_prefixed_artwork() {
        let media = entry("Movie.mkv");
        let siblings = vec![entry("Movie-poster.jpg")];
        let request = SidecarRequest {
            media_file: &media,
            sidecar_file: &siblings[0],
            library_kind: crate::model::LibraryKind::Movies,
            siblings: &siblings,
        };
        let result = LocalArtworkParser.parse(&request).unwrap().unwrap();
        assert!(result.metadata.unwrap().poster_uri.is_some());
    }

    #[test]
    fn test_no_artwork_adds_nothing() {
        let media = entry("Movie.mkv");
        let siblings = vec![entry("random.jpg")];
        let request = SidecarRequest {
            media_file: &media,
            sidecar_file: &siblings[0],
            library_kind: crate::model::LibraryKind::Movies,
            siblings: &siblings,
        };
        assert!(LocalArtworkParser.parse(&request).unwrap().is_none());
    }
}
