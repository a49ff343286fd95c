//! Music resolver
//!
//! Album folders resolve to AlbumRelease -> AlbumMedium -> Track. Disc
//! numbers come from `CD1`/`Disc 2` subfolder names. Artist folders are
//! plain containers and never yield a standalone Person or Group; artist
//! identity is established later by agents keyed on MusicBrainz ids.
//! Orphan audio files with no album parent are dropped.

use time::{Date, Month};
use tracing::debug;
use uuid::Uuid;

use crate::model::{ItemKind, LibraryKind, MediaItem, MediaPart, MetadataItem};

use super::super::probe::Entry;
use super::super::work_item::ResolvedItem;
use super::filename::{parse_disc_dir, parse_title_year, parse_track};
use super::{is_audio, ItemResolver, ResolveArgs};

pub struct MusicResolver;

impl ItemResolver for MusicResolver {
    fn name(&self) -> &'static str {
        "music"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn resolve(&self, args: &ResolveArgs<'_>) -> Option<ResolvedItem> {
        if args.library_kind != LibraryKind::Music {
            return None;
        }

        if !args.entry.is_dir {
            // Loose audio files resolve only through their album folder;
            // orphans are dropped.
            return None;
        }

        let children = args.children?;
        let audio_children: Vec<&Entry> = children.iter().filter(|c| is_audio(c)).collect();

        // Disc subfolder of an album.
        if let Some(disc_number) = parse_disc_dir(&args.entry.name) {
            let parent = args.resolved_parent?;
            if parent.item.kind != ItemKind::AlbumRelease {
                return None;
            }
            if audio_children.is_empty() {
                return None;
            }
            let mut medium = new_medium(disc_number, parent.item.id, args.library_section_id);
            let tracks = resolve_tracks(&audio_children, medium.item.id, args.library_section_id);
            medium.children = tracks;
            return Some(medium);
        }

        if !audio_children.is_empty() {
            // An album folder with direct audio: one implicit disc.
            let parsed = parse_title_year(&args.entry.name);
            let mut album = MetadataItem::skeleton(ItemKind::AlbumRelease);
            album.title = Some(parsed.title);
            album.library_section_id = Some(args.library_section_id);
            if let Some(year) = parsed.year {
                if let Ok(date) = Date::from_calendar_date(year, Month::January, 1) {
                    album.set_release_date(date);
                }
            }

            let mut medium = new_medium(1, album.id, args.library_section_id);
            medium.children =
                resolve_tracks(&audio_children, medium.item.id, args.library_section_id);

            debug!(folder = %args.entry.name, tracks = medium.children.len(), "Album folder");
            return Some(ResolvedItem {
                item: album,
                media: None,
                children: vec![medium],
                pending_owner: None,
                embedded_patch: None,
            });
        }

        // A folder with disc subfolders but no direct audio is still the
        // album; its media arrives when the disc folders resolve.
        let has_disc_dirs = children
            .iter()
            .any(|c| c.is_dir && parse_disc_dir(&c.name).is_some());
        if has_disc_dirs {
            let parsed = parse_title_year(&args.entry.name);
            let mut album = MetadataItem::skeleton(ItemKind::AlbumRelease);
            album.title = Some(parsed.title);
            album.library_section_id = Some(args.library_section_id);
            if let Some(year) = parsed.year {
                if let Ok(date) = Date::from_calendar_date(year, Month::January, 1) {
                    album.set_release_date(date);
                }
            }
            return Some(ResolvedItem::new(album));
        }

        // Artist folders (subdirectories only) are containers; nothing is
        // materialized for them.
        None
    }
}

fn new_medium(disc_number: i32, album_id: Uuid, section_id: Uuid) -> ResolvedItem {
    let mut medium = MetadataItem::skeleton(ItemKind::AlbumMedium);
    medium.title = Some(format!("Disc {disc_number}"));
    medium.index_number = Some(disc_number);
    medium.parent_id = Some(album_id);
    medium.library_section_id = Some(section_id);
    ResolvedItem::new(medium)
}

fn resolve_tracks(files: &[&Entry], medium_id: Uuid, section_id: Uuid) -> Vec<ResolvedItem> {
    let mut tracks: Vec<ResolvedItem> = files
        .iter()
        .map(|file| {
            let parsed = parse_track(&file.stem());
            let mut item = MetadataItem::skeleton(ItemKind::Track);
            item.title = Some(parsed.title);
            item.index_number = parsed.track;
            item.parent_id = Some(medium_id);
            item.library_section_id = Some(section_id);

            let mut media = MediaItem::new(item.id);
            media.parts.push(MediaPart {
                id: Uuid::new_v4(),
                media_item_id: media.id,
                part_index: 0,
                file_path: file.path.to_string_lossy().to_string(),
                size_bytes: file.size.unwrap_or(0) as i64,
                modified_at: file.mtime,
                hash: None,
                duration_ms: None,
                container: file.ext.clone(),
                streams: Vec::new(),
            });
            media.recompute_summary();

            ResolvedItem { item, media: Some(media), children: Vec::new(), pending_owner: None, embedded_patch: None }
        })
        .collect();
    tracks.sort_by_key(|t| t.item.index_number.unwrap_or(i32::MAX));
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn audio(dir: &str, name: &str) -> Entry {
        let path = PathBuf::from(dir).join(name);
        Entry {
            name: name.to_string(),
            ext: path.extension().map(|e| e.to_string_lossy().to_lowercase()),
            path,
            is_dir: false,
            size: Some(1000),
            mtime: None,
            ctime: None,
            exists: true,
        }
    }

    fn dir(path: &str) -> Entry {
        let path = PathBuf::from(path);
        Entry {
            name: path.file_name().unwrap().to_string_lossy().to_string(),
            ext: None,
            path,
            is_dir: true,
            size: None,
            mtime: None,
            ctime: None,
            exists: true,
        }
    }

    fn resolve<'a>(
        entry: &'a Entry,
        children: &'a [Entry],
        parent: Option<&'a ResolvedItem>,
    ) -> Option<ResolvedItem> {
        let args = ResolveArgs {
            entry,
            library_kind: LibraryKind::Music,
            section_location_id: Uuid::new_v4(),
            library_section_id: Uuid::new_v4(),
            children: Some(children),
            is_root: false,
            ancestors: &[],
            resolved_parent: parent,
            siblings: &[],
        };
        MusicResolver.resolve(&args)
    }

    #[test]
    fn test_album_with_direct_tracks() {
        let album_dir = dir("/music/Artist/Album (1999)");
        let children = vec![
            audio("/music/Artist/Album (1999)", "02 - Second.flac"),
            audio("/music/Artist/Album (1999)", "01 - First.flac"),
        ];
        let album = resolve(&album_dir, &children, None).unwrap();
        assert_eq!(album.item.kind, ItemKind::AlbumRelease);
        assert_eq!(album.item.year, Some(1999));
        assert_eq!(album.children.len(), 1);

        let medium = &album.children[0];
        assert_eq!(medium.item.kind, ItemKind::AlbumMedium);
        assert_eq!(medium.item.index_number, Some(1));
        assert_eq!(medium.children.len(), 2);
        assert_eq!(medium.children[0].item.index_number, Some(1));
        assert_eq!(medium.children[0].item.title.as_deref(), Some("First"));
        assert!(medium.children[0].media.is_some());
    }

    #[test]
    fn test_disc_folder_parents_to_album() {
        let album_dir = dir("/music/Artist/Box Set");
        let disc_dirs = vec![dir("/music/Artist/Box Set/CD1")];
        let album = resolve(&album_dir, &disc_dirs, None).unwrap();
        assert_eq!(album.item.kind, ItemKind::AlbumRelease);

        let cd1 = dir("/music/Artist/Box Set/CD1");
        let tracks = vec![audio("/music/Artist/Box Set/CD1", "01 - One.flac")];
        let medium = resolve(&cd1, &tracks, Some(&album)).unwrap();
        assert_eq!(medium.item.kind, ItemKind::AlbumMedium);
        assert_eq!(medium.item.index_number, Some(1));
        assert_eq!(medium.item.parent_id, Some(album.item.id));
        assert_eq!(medium.children.len(), 1);
    }

    #[test]
    fn test_artist_folder_not_materialized() {
        let artist_dir = dir("/music/Artist");
        let children = vec![dir("/music/Artist/Album (1999)")];
        assert!(resolve(&artist_dir, &children, None).is_none());
    }

    #[test]
    fn test_orphan_audio_dropped() {
        let orphan = audio("/music", "random.mp3");
        assert!(resolve(&orphan, &[], None).is_none());
    }
}
