//! TV resolver
//!
//! Show folders at a section root, `Season NN` subfolders, and SxxEyy
//! episode files. Episodes parent to their season when one exists, else
//! directly to the show.

use time::{Date, Month};
use uuid::Uuid;

use crate::model::{ItemKind, LibraryKind, MediaItem, MediaPart, MetadataItem};

use super::super::work_item::ResolvedItem;
use super::filename::{is_sample, parse_episode, parse_season_dir, parse_title_year};
use super::{is_video, ItemResolver, ResolveArgs};

pub struct TvResolver;

impl ItemResolver for TvResolver {
    fn name(&self) -> &'static str {
        "tv"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn resolve(&self, args: &ResolveArgs<'_>) -> Option<ResolvedItem> {
        if args.library_kind != LibraryKind::TvShows {
            return None;
        }

        if args.entry.is_dir {
            // Season subfolder of an already-resolved show.
            if let Some(season_number) = parse_season_dir(&args.entry.name) {
                let parent = args.resolved_parent?;
                if parent.item.kind != ItemKind::Show {
                    return None;
                }
                let mut item = MetadataItem::skeleton(ItemKind::Season);
                item.title = Some(format!("Season {season_number}"));
                item.index_number = Some(season_number);
                item.parent_id = Some(parent.item.id);
                item.library_section_id = Some(args.library_section_id);
                return Some(ResolvedItem::new(item));
            }

            // A directory directly under the location root is a show.
            if args.ancestors.len() <= 1 {
                let parsed = parse_title_year(&args.entry.name);
                let mut item = MetadataItem::skeleton(ItemKind::Show);
                item.title = Some(parsed.title);
                item.library_section_id = Some(args.library_section_id);
                if let Some(year) = parsed.year {
                    if let Ok(date) = Date::from_calendar_date(year, Month::January, 1) {
                        item.set_release_date(date);
                    }
                }
                return Some(ResolvedItem::new(item));
            }

            return None;
        }

        // Episode files.
        if !is_video(args.entry) || is_sample(&args.entry.name) {
            return None;
        }
        let parsed = parse_episode(&args.entry.stem())?;

        let mut item = MetadataItem::skeleton(ItemKind::Episode);
        item.title = Some(format!("Episode {}", parsed.episode));
        item.index_number = Some(parsed.episode);
        item.library_section_id = Some(args.library_section_id);
        if let Some(parent) = args.resolved_parent {
            if matches!(parent.item.kind, ItemKind::Season | ItemKind::Show) {
                item.parent_id = Some(parent.item.id);
            }
        }

        let mut media = MediaItem::new(item.id);
        media.parts.push(MediaPart {
            id: Uuid::new_v4(),
            media_item_id: media.id,
            part_index: 0,
            file_path: args.entry.path.to_string_lossy().to_string(),
            size_bytes: args.entry.size.unwrap_or(0) as i64,
            modified_at: args.entry.mtime,
            hash: None,
            duration_ms: None,
            container: args.entry.ext.clone(),
            streams: Vec::new(),
        });
        media.recompute_summary();

        Some(ResolvedItem { item, media: Some(media), children: Vec::new(), pending_owner: None, embedded_patch: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use super::super::super::probe::Entry;

    fn entry(path: &str, is_dir: bool) -> Entry {
        let path = PathBuf::from(path);
        Entry {
            name: path.file_name().unwrap().to_string_lossy().to_string(),
            ext: (!is_dir)
                .then(|| path.extension().map(|e| e.to_string_lossy().to_lowercase()))
                .flatten(),
            path,
            is_dir,
            size: Some(100),
            mtime: None,
            ctime: None,
            exists: true,
        }
    }

    fn args<'a>(
        e: &'a Entry,
        ancestors: &'a [PathBuf],
        parent: Option<&'a ResolvedItem>,
    ) -> ResolveArgs<'a> {
        ResolveArgs {
            entry: e,
            library_kind: LibraryKind::TvShows,
            section_location_id: Uuid::new_v4(),
            library_section_id: Uuid::new_v4(),
            children: None,
            is_root: false,
            ancestors,
            resolved_parent: parent,
            siblings: &[],
        }
    }

    #[test]
    fn test_show_season_episode_chain() {
        let show_entry = entry("/tv/The Show (2019)", true);
        let root = [PathBuf::from("/tv")];
        let show = TvResolver.resolve(&args(&show_entry, &root, None)).unwrap();
        assert_eq!(show.item.kind, ItemKind::Show);
        assert_eq!(show.item.title.as_deref(), Some("The Show"));
        assert_eq!(show.item.year, Some(2019));

        let season_entry = entry("/tv/The Show (2019)/Season 02", true);
        let anc = [PathBuf::from("/tv"), PathBuf::from("/tv/The Show (2019)")];
        let season = TvResolver
            .resolve(&args(&season_entry, &anc, Some(&show)))
            .unwrap();
        assert_eq!(season.item.kind, ItemKind::Season);
        assert_eq!(season.item.index_number, Some(2));
        assert_eq!(season.item.parent_id, Some(show.item.id));

        let ep_entry = entry("/tv/The Show (2019)/Season 02/The.Show.S02E05.mkv", false);
        let episode = TvResolver
            .resolve(&args(&ep_entry, &anc, Some(&season)))
            .unwrap();
        assert_eq!(episode.item.kind, ItemKind::Episode);
        assert_eq!(episode.item.index_number, Some(5));
        assert_eq!(episode.item.parent_id, Some(season.item.id));
        assert!(episode.media.is_some());
    }

    #[test]
    fn test_non_episode_file_unresolved() {
        let e = entry("/tv/The Show/notes.mkv", false);
        assert!(TvResolver.resolve(&args(&e, &[], None)).is_none());
    }
}
