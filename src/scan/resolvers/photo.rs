//! Photo and picture resolvers
//!
//! Photos libraries create a PhotoAlbum per folder of images; Pictures
//! libraries create PictureSet with the same folder rule but picture
//! semantics (no real-world imagery assumption). Date-only intermediate
//! folders are not materialized; their leaves attach to the nearest
//! materialized ancestor.

use uuid::Uuid;

use crate::model::{ItemKind, LibraryKind, MediaItem, MediaPart, MetadataItem};

use super::super::probe::Entry;
use super::super::work_item::ResolvedItem;
use super::filename::is_date_only_dir;
use super::{is_image, ItemResolver, ResolveArgs};

pub struct PhotoResolver;

impl ItemResolver for PhotoResolver {
    fn name(&self) -> &'static str {
        "photo"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn resolve(&self, args: &ResolveArgs<'_>) -> Option<ResolvedItem> {
        let (album_kind, image_kind) = match args.library_kind {
            LibraryKind::Photos => (ItemKind::PhotoAlbum, ItemKind::Photo),
            LibraryKind::Pictures => (ItemKind::PictureSet, ItemKind::Picture),
            _ => return None,
        };

        if !args.entry.is_dir {
            // Images materialize through their folder's album.
            return None;
        }

        let children = args.children?;
        let images: Vec<&Entry> = children.iter().filter(|c| is_image(c)).collect();
        let has_subdirs = children.iter().any(|c| c.is_dir);

        if images.is_empty() {
            // An intermediate folder. Date-only intermediates are skipped;
            // named ones become empty container albums so their leaves nest.
            if has_subdirs && !is_date_only_dir(&args.entry.name) && !args.is_root {
                let mut album = new_album(album_kind, &args.entry.name, args);
                if let Some(parent) = args.resolved_parent {
                    album.parent_id = Some(parent.item.id);
                }
                return Some(ResolvedItem::new(album));
            }
            return None;
        }

        let mut album = new_album(album_kind, &args.entry.name, args);
        if let Some(parent) = args.resolved_parent {
            album.parent_id = Some(parent.item.id);
        }
        let album_id = album.id;

        let mut photos: Vec<ResolvedItem> = images
            .iter()
            .map(|file| {
                let mut item = MetadataItem::skeleton(image_kind);
                item.title = Some(file.stem());
                item.parent_id = Some(album_id);
                item.library_section_id = Some(args.library_section_id);

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
        photos.sort_by(|a, b| a.item.title.cmp(&b.item.title));

        Some(ResolvedItem {
            item: album,
            media: None,
            children: photos,
            pending_owner: None,
            embedded_patch: None,
        })
    }
}

fn new_album(kind: ItemKind, name: &str, args: &ResolveArgs<'_>) -> MetadataItem {
    let mut album = MetadataItem::skeleton(kind);
    album.title = Some(name.to_string());
    album.library_section_id = Some(args.library_section_id);
    album
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn image(dir: &str, name: &str) -> Entry {
        let path = PathBuf::from(dir).join(name);
        Entry {
            name: name.to_string(),
            ext: path.extension().map(|e| e.to_string_lossy().to_lowercase()),
            path,
            is_dir: false,
            size: Some(500),
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
        kind: LibraryKind,
        entry: &'a Entry,
        children: &'a [Entry],
    ) -> Option<ResolvedItem> {
        let args = ResolveArgs {
            entry,
            library_kind: kind,
            section_location_id: Uuid::new_v4(),
            library_section_id: Uuid::new_v4(),
            children: Some(children),
            is_root: false,
            ancestors: &[],
            resolved_parent: None,
            siblings: &[],
        };
        PhotoResolver.resolve(&args)
    }

    #[test]
    fn test_leaf_folder_becomes_photo_album() {
        let folder = dir("/photos/Holiday 2023");
        let children = vec![
            image("/photos/Holiday 2023", "b.jpg"),
            image("/photos/Holiday 2023", "a.jpg"),
        ];
        let album = resolve(LibraryKind::Photos, &folder, &children).unwrap();
        assert_eq!(album.item.kind, ItemKind::PhotoAlbum);
        assert_eq!(album.children.len(), 2);
        assert_eq!(album.children[0].item.kind, ItemKind::Photo);
        assert_eq!(album.children[0].item.title.as_deref(), Some("a"));
    }

    #[test]
    fn test_pictures_library_uses_picture_kinds() {
        let folder = dir("/pics/Wallpapers");
        let children = vec![image("/pics/Wallpapers", "w.png")];
        let set = resolve(LibraryKind::Pictures, &folder, &children).unwrap();
        assert_eq!(set.item.kind, ItemKind::PictureSet);
        assert_eq!(set.children[0].item.kind, ItemKind::Picture);
    }

    #[test]
    fn test_date_only_intermediate_not_materialized() {
        let folder = dir("/photos/2023");
        let children = vec![dir("/photos/2023/Trip")];
        assert!(resolve(LibraryKind::Photos, &folder, &children).is_none());
    }

    #[test]
    fn test_named_intermediate_materialized() {
        let folder = dir("/photos/Family");
        let children = vec![dir("/photos/Family/Reunion")];
        let album = resolve(LibraryKind::Photos, &folder, &children).unwrap();
        assert_eq!(album.item.kind, ItemKind::PhotoAlbum);
        assert!(album.children.is_empty());
    }
}
