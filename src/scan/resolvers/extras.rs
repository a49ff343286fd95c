//! Extras resolver
//!
//! An inline extras file (`Movie - trailer.mkv`) or a file inside a
//! recognized extras subfolder yields a typed extra item plus a pending
//! owner relation pointing at the movie folder. Ownership is resolved at
//! persist time, once the owning folder's item exists.

use tracing::debug;
use uuid::Uuid;

use crate::model::{ItemKind, LibraryKind, MediaItem, MediaPart, MetadataItem, RelationKind};

use super::super::work_item::{PendingOwner, ResolvedItem};
use super::filename::{extras_folder_kind, is_sample, parse_inline_extra, parse_title_year};
use super::{is_video, ItemResolver, ResolveArgs};

pub struct ExtrasResolver;

impl ItemResolver for ExtrasResolver {
    fn name(&self) -> &'static str {
        "extras"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn resolve(&self, args: &ResolveArgs<'_>) -> Option<ResolvedItem> {
        if args.library_kind != LibraryKind::Movies {
            return None;
        }
        if args.entry.is_dir || !is_video(args.entry) || is_sample(&args.entry.name) {
            return None;
        }

        let parent_dir = args.entry.path.parent()?;
        let parent_name = parent_dir.file_name()?.to_string_lossy();

        // A file inside a named extras subfolder: the owner is the folder
        // containing that subfolder.
        if let Some(kind) = extras_folder_kind(&parent_name) {
            let owner_dir = parent_dir.parent()?.to_path_buf();
            let title = parse_title_year(&args.entry.stem()).title;
            debug!(path = %args.entry.path.display(), kind = %kind, "Extras-folder extra");
            return Some(self.extra_item(args, kind, title, owner_dir));
        }

        // An inline extra next to the feature: the owner is the parent
        // folder itself.
        if let Some((_, kind)) = parse_inline_extra(&args.entry.stem()) {
            let title = parse_title_year(&args.entry.stem()).title;
            debug!(path = %args.entry.path.display(), kind = %kind, "Inline extra");
            return Some(self.extra_item(args, kind, title, parent_dir.to_path_buf()));
        }

        None
    }
}

impl ExtrasResolver {
    fn extra_item(
        &self,
        args: &ResolveArgs<'_>,
        kind: ItemKind,
        title: String,
        owner_dir: std::path::PathBuf,
    ) -> ResolvedItem {
        let mut item = MetadataItem::skeleton(kind);
        item.title = Some(title);
        item.library_section_id = Some(args.library_section_id);

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

        let relation = RelationKind::for_extra(kind)
            .expect("extras resolver only produces extra kinds");

        ResolvedItem {
            item,
            media: Some(media),
            children: Vec::new(),
            pending_owner: Some(PendingOwner { relation, owner_dir }),
            embedded_patch: None,
        }
    }
}

/// Outcome of resolving a pending owner relation at persist time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipOutcome {
    /// Owner item found; the relation may be persisted.
    Success(Uuid),
    /// The named owner folder was never resolved in this scan.
    MissingFolder,
    /// The owner folder resolved nothing playable.
    NoEligibleFiles,
    /// More than one candidate claimed the folder.
    AmbiguousCandidates,
}

impl OwnershipOutcome {
    pub fn reason(&self) -> &'static str {
        match self {
            OwnershipOutcome::Success(_) => "success",
            OwnershipOutcome::MissingFolder => "missing-folder",
            OwnershipOutcome::NoEligibleFiles => "no-eligible-files",
            OwnershipOutcome::AmbiguousCandidates => "ambiguous-candidates",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use super::super::super::probe::Entry;

    fn video_entry(path: &str, size: u64) -> Entry {
        let path = PathBuf::from(path);
        Entry {
            name: path.file_name().unwrap().to_string_lossy().to_string(),
            ext: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase()),
            path,
            is_dir: false,
            size: Some(size),
            mtime: None,
            ctime: None,
            exists: true,
        }
    }

    fn resolve(entry: &Entry) -> Option<ResolvedItem> {
        let args = ResolveArgs {
            entry,
            library_kind: LibraryKind::Movies,
            section_location_id: Uuid::new_v4(),
            library_section_id: Uuid::new_v4(),
            children: None,
            is_root: false,
            ancestors: &[],
            resolved_parent: None,
            siblings: &[],
        };
        ExtrasResolver.resolve(&args)
    }

    #[test]
    fn test_inline_trailer_owner_is_parent_folder() {
        let entry = video_entry("/m/Movie (2001)/Movie - trailer.mp4", 100);
        let resolved = resolve(&entry).unwrap();
        assert_eq!(resolved.item.kind, ItemKind::Trailer);
        let pending = resolved.pending_owner.unwrap();
        assert_eq!(pending.relation, RelationKind::TrailerPromotes);
        assert_eq!(pending.owner_dir, Path::new("/m/Movie (2001)"));
    }

    #[test]
    fn test_extras_folder_owner_is_grandparent() {
        let entry = video_entry("/m/Movie (2001)/Featurettes/Making Of.mkv", 100);
        let resolved = resolve(&entry).unwrap();
        assert_eq!(resolved.item.kind, ItemKind::Featurette);
        let pending = resolved.pending_owner.unwrap();
        assert_eq!(pending.relation, RelationKind::FeaturetteOf);
        assert_eq!(pending.owner_dir, Path::new("/m/Movie (2001)"));
    }

    #[test]
    fn test_regular_feature_not_an_extra() {
        let entry = video_entry("/m/Movie (2001)/Movie.mkv", 100);
        assert!(resolve(&entry).is_none());
    }

    #[test]
    fn test_media_part_points_at_extra_file() {
        let entry = video_entry("/m/Movie (2001)/Movie - trailer.mp4", 42);
        let resolved = resolve(&entry).unwrap();
        let media = resolved.media.unwrap();
        assert_eq!(media.parts[0].file_path, "/m/Movie (2001)/Movie - trailer.mp4");
        assert_eq!(media.file_size_bytes, Some(42));
    }
}
