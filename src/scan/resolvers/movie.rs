//! Movie resolver
//!
//! Classifies folders (and loose root-level files) in a Movies library.
//! Handles disc layouts (VIDEO_TS / BDMV), stacked multi-part movies, and
//! the largest-file fallback. Sample files and extras never count as the
//! feature.

use std::path::Path;

use time::{Date, Month};
use tracing::debug;
use uuid::Uuid;

use crate::model::{ItemKind, LibraryKind, MediaItem, MediaPart, MetadataItem};

use super::super::probe::Entry;
use super::super::work_item::ResolvedItem;
use super::filename::{
    self, extras_folder_kind, is_sample, parse_inline_extra, parse_title_year, split_stack_marker,
};
use super::{is_video, ItemResolver, ResolveArgs};

pub struct MovieResolver;

impl ItemResolver for MovieResolver {
    fn name(&self) -> &'static str {
        "movie"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn resolve(&self, args: &ResolveArgs<'_>) -> Option<ResolvedItem> {
        if args.library_kind != LibraryKind::Movies {
            return None;
        }

        if args.entry.is_dir {
            return self.resolve_folder(args);
        }

        // Loose video file directly under a section location.
        if args.is_root_level_file(args.entry) && is_video(args.entry) {
            if is_sample(&args.entry.name) || parse_inline_extra(&args.entry.stem()).is_some() {
                return None;
            }
            return Some(self.movie_from_files(
                &args.entry.stem(),
                std::slice::from_ref(args.entry),
                args.library_section_id,
            ));
        }

        None
    }
}

impl MovieResolver {
    fn resolve_folder(&self, args: &ResolveArgs<'_>) -> Option<ResolvedItem> {
        // Named extras folders belong to the extras resolver's domain.
        if extras_folder_kind(&args.entry.name).is_some() {
            return None;
        }

        // Disc layouts take precedence over any loose files.
        if let Some(resolved) = self.resolve_disc_folder(args) {
            return Some(resolved);
        }

        let children = args.children?;
        let eligible: Vec<&Entry> = children
            .iter()
            .filter(|c| is_video(c))
            .filter(|c| !is_sample(&c.name))
            .filter(|c| parse_inline_extra(&c.stem()).is_none())
            .collect();

        if eligible.is_empty() {
            return None;
        }

        // A folder stacks only when every eligible file carries a part
        // marker over one shared residual base name.
        let markers: Vec<Option<(String, u32)>> =
            eligible.iter().map(|e| split_stack_marker(&e.stem())).collect();
        let all_marked = markers.iter().all(Option::is_some);
        let stacked = all_marked && {
            let bases: Vec<&str> = markers
                .iter()
                .filter_map(|m| m.as_ref().map(|(b, _)| b.as_str()))
                .collect();
            bases.windows(2).all(|w| w[0] == w[1])
        };

        let folder_name = &args.entry.name;

        if stacked && eligible.len() > 1 {
            let mut indexed: Vec<(u32, &Entry)> = markers
                .iter()
                .zip(eligible.iter())
                .map(|(m, e)| (m.as_ref().unwrap().1, *e))
                .collect();
            indexed.sort_by_key(|(index, _)| *index);
            let ordered: Vec<Entry> = indexed.into_iter().map(|(_, e)| e.clone()).collect();
            debug!(folder = %folder_name, parts = ordered.len(), "Stacked movie");
            return Some(self.movie_from_files(folder_name, &ordered, args.library_section_id));
        }

        // Non-stacked: the largest eligible video is the feature.
        let largest = eligible
            .iter()
            .max_by_key(|e| e.size.unwrap_or(0))
            .copied()?;
        Some(self.movie_from_files(
            folder_name,
            std::slice::from_ref(largest),
            args.library_section_id,
        ))
    }

    /// VIDEO_TS/*.VOB or BDMV/**/*.M2TS under the folder yields a
    /// disc-typed media item.
    fn resolve_disc_folder(&self, args: &ResolveArgs<'_>) -> Option<ResolvedItem> {
        let dir = &args.entry.path;

        let disc_root = if has_files_with_ext(&dir.join("VIDEO_TS"), "vob") {
            dir.join("VIDEO_TS")
        } else if has_files_with_ext_recursive(&dir.join("BDMV"), "m2ts") {
            dir.join("BDMV")
        } else {
            return None;
        };

        let parsed = parse_title_year(&args.entry.name);
        let mut item = new_movie_item(&parsed, args.library_section_id);
        let mut media = MediaItem::new(item.id);
        media.is_disc_image = true;

        let size = dir_size(&disc_root);
        media.parts.push(MediaPart {
            id: Uuid::new_v4(),
            media_item_id: media.id,
            part_index: 0,
            file_path: disc_root.to_string_lossy().to_string(),
            size_bytes: size as i64,
            modified_at: args.entry.mtime,
            hash: None,
            duration_ms: None,
            container: None,
            streams: Vec::new(),
        });
        media.recompute_summary();
        item.duration_ms = media.duration_ms;

        Some(ResolvedItem { item, media: Some(media), children: Vec::new(), pending_owner: None, embedded_patch: None })
    }

    fn movie_from_files(
        &self,
        name: &str,
        files: &[Entry],
        section_id: Uuid,
    ) -> ResolvedItem {
        let parsed = parse_title_year(name);
        let mut item = new_movie_item(&parsed, section_id);
        let mut media = MediaItem::new(item.id);
        for (index, file) in files.iter().enumerate() {
            media.parts.push(MediaPart {
                id: Uuid::new_v4(),
                media_item_id: media.id,
                part_index: index as i32,
                file_path: file.path.to_string_lossy().to_string(),
                size_bytes: file.size.unwrap_or(0) as i64,
                modified_at: file.mtime,
                hash: None,
                duration_ms: None,
                container: file.ext.clone(),
                streams: Vec::new(),
            });
        }
        media.recompute_summary();
        item.duration_ms = media.duration_ms;

        ResolvedItem { item, media: Some(media), children: Vec::new(), pending_owner: None, embedded_patch: None }
    }
}

fn new_movie_item(parsed: &filename::ParsedTitle, section_id: Uuid) -> MetadataItem {
    let mut item = MetadataItem::skeleton(ItemKind::Movie);
    item.title = Some(parsed.title.clone());
    item.library_section_id = Some(section_id);
    if let Some(year) = parsed.year {
        // Only the year is known from the name; fill the derived pair with
        // January 1 so I2 holds until a sidecar or agent supplies the date.
        if let Ok(date) = Date::from_calendar_date(year, Month::January, 1) {
            item.set_release_date(date);
        }
    }
    item
}

fn has_files_with_ext(dir: &Path, ext: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else { return false };
    entries.flatten().any(|e| {
        e.path()
            .extension()
            .is_some_and(|x| x.to_string_lossy().eq_ignore_ascii_case(ext))
    })
}

fn has_files_with_ext_recursive(dir: &Path, ext: &str) -> bool {
    if !dir.is_dir() {
        return false;
    }
    walkdir::WalkDir::new(dir)
        .into_iter()
        .flatten()
        .any(|e| {
            e.path()
                .extension()
                .is_some_and(|x| x.to_string_lossy().eq_ignore_ascii_case(ext))
        })
}

fn dir_size(dir: &Path) -> u64 {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

impl ResolveArgs<'_> {
    /// Whether the entry sits directly under the section location root.
    pub fn is_root_level_file(&self, entry: &Entry) -> bool {
        self.ancestors.len() <= 1 && !entry.is_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file_entry(dir: &Path, name: &str, size: u64) -> Entry {
        Entry {
            path: dir.join(name),
            name: name.to_string(),
            ext: Path::new(name)
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase()),
            is_dir: false,
            size: Some(size),
            mtime: None,
            ctime: None,
            exists: true,
        }
    }

    fn dir_entry(path: PathBuf) -> Entry {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        Entry {
            path,
            name,
            ext: None,
            is_dir: true,
            size: None,
            mtime: None,
            ctime: None,
            exists: true,
        }
    }

    fn resolve_folder(
        folder: &Path,
        children: &[Entry],
    ) -> Option<ResolvedItem> {
        let entry = dir_entry(folder.to_path_buf());
        let args = ResolveArgs {
            entry: &entry,
            library_kind: LibraryKind::Movies,
            section_location_id: Uuid::new_v4(),
            library_section_id: Uuid::new_v4(),
            children: Some(children),
            is_root: false,
            ancestors: &[folder.parent().unwrap().to_path_buf()],
            resolved_parent: None,
            siblings: &[],
        };
        MovieResolver.resolve(&args)
    }

    #[test]
    fn test_stacked_movie_ordered_parts() {
        let dir = PathBuf::from("/m/Movie (2001)");
        let children = vec![
            file_entry(&dir, "Movie.cd2.mkv", 1 << 30),
            file_entry(&dir, "Movie.cd1.mkv", 2 << 30),
        ];
        let resolved = resolve_folder(&dir, &children).unwrap();
        assert_eq!(resolved.item.title.as_deref(), Some("Movie"));
        assert_eq!(resolved.item.year, Some(2001));

        let media = resolved.media.unwrap();
        assert_eq!(media.parts.len(), 2);
        assert!(media.parts[0].file_path.ends_with("cd1.mkv"));
        assert!(media.parts[1].file_path.ends_with("cd2.mkv"));
        assert_eq!(media.file_size_bytes, Some(3 << 30));
    }

    #[test]
    fn test_mixed_markers_fall_back_to_largest() {
        let dir = PathBuf::from("/m/Movie (2001)");
        let children = vec![
            file_entry(&dir, "Movie.cd1.mkv", 1 << 30),
            file_entry(&dir, "Movie extended.mkv", 3 << 30),
        ];
        let resolved = resolve_folder(&dir, &children).unwrap();
        let media = resolved.media.unwrap();
        assert_eq!(media.parts.len(), 1);
        assert!(media.parts[0].file_path.ends_with("extended.mkv"));
    }

    #[test]
    fn test_samples_and_inline_extras_excluded() {
        let dir = PathBuf::from("/m/Movie (2001)");
        let children = vec![
            file_entry(&dir, "Movie.mkv", 2 << 30),
            file_entry(&dir, "movie.sample.mkv", 50 << 20),
            file_entry(&dir, "Movie - trailer.mp4", 3 << 30),
        ];
        let resolved = resolve_folder(&dir, &children).unwrap();
        let media = resolved.media.unwrap();
        assert_eq!(media.parts.len(), 1);
        assert!(media.parts[0].file_path.ends_with("Movie.mkv"));
    }

    #[test]
    fn test_folder_without_videos_unresolved() {
        let dir = PathBuf::from("/m/Empty");
        assert!(resolve_folder(&dir, &[]).is_none());
    }

    #[test]
    fn test_wrong_library_kind_returns_none() {
        let dir = PathBuf::from("/m/Movie (2001)");
        let entry = dir_entry(dir.clone());
        let children = vec![file_entry(&dir, "Movie.mkv", 1 << 30)];
        let args = ResolveArgs {
            entry: &entry,
            library_kind: LibraryKind::Music,
            section_location_id: Uuid::new_v4(),
            library_section_id: Uuid::new_v4(),
            children: Some(&children),
            is_root: false,
            ancestors: &[],
            resolved_parent: None,
            siblings: &[],
        };
        assert!(MovieResolver.resolve(&args).is_none());
    }
}
