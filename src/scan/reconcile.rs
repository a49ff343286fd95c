//! Orphan reconciliation
//!
//! After a scan completes successfully, every known part path that the scan
//! did not see marks its owning item as an orphan; orphans are soft-deleted
//! and stay invisible to query paths until a later scan revives them or an
//! explicit vacuum removes them for good.

use std::collections::HashSet;

use anyhow::Result;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::Database;

/// Compute `existing_paths ∖ seen_paths` and soft-delete the owners.
/// Returns the number of items soft-deleted.
pub async fn reconcile_orphans(db: &Database, section_id: Uuid, scan_id: Uuid) -> Result<u64> {
    let seen: HashSet<String> = db.scans().seen_paths(scan_id).await?.into_iter().collect();
    let existing = db.media().part_paths_for_section(section_id).await?;

    let mut orphaned_items: HashSet<Uuid> = HashSet::new();
    let mut survivors: HashSet<Uuid> = HashSet::new();
    for (path, item_id) in existing {
        if seen.contains(&path) {
            survivors.insert(item_id);
        } else {
            debug!(path = %path, item_id = %item_id, "Part path not seen by scan");
            orphaned_items.insert(item_id);
        }
    }
    // An item survives if any of its parts was seen.
    orphaned_items.retain(|id| !survivors.contains(id));

    if orphaned_items.is_empty() {
        return Ok(0);
    }

    let ids: Vec<Uuid> = orphaned_items.into_iter().collect();
    let deleted = db
        .metadata_items()
        .soft_delete(&ids, OffsetDateTime::now_utc())
        .await?;
    info!(scan_id = %scan_id, orphans = deleted, "Orphaned items soft-deleted");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CreateLibrarySection;
    use crate::model::{ItemKind, LibraryKind, LibrarySettings, MediaItem, MediaPart, MetadataItem};

    async fn setup() -> (Database, Uuid) {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let section = db
            .library_sections()
            .create(CreateLibrarySection {
                name: "Movies".into(),
                kind: LibraryKind::Movies,
                root_paths: vec!["/m".into()],
                settings: LibrarySettings::default(),
            })
            .await
            .unwrap();
        (db, section.id)
    }

    async fn insert_movie(db: &Database, section: Uuid, path: &str) -> Uuid {
        let mut item = MetadataItem::skeleton(ItemKind::Movie);
        item.title = Some(path.to_string());
        item.library_section_id = Some(section);
        let item = db.metadata_items().insert(&item).await.unwrap();

        let mut media = MediaItem::new(item.id);
        media.parts.push(MediaPart {
            id: Uuid::new_v4(),
            media_item_id: media.id,
            part_index: 0,
            file_path: path.to_string(),
            size_bytes: 100,
            modified_at: None,
            hash: None,
            duration_ms: None,
            container: Some("mkv".into()),
            streams: Vec::new(),
        });
        media.recompute_summary();
        db.media().upsert(&media).await.unwrap();
        item.id
    }

    #[tokio::test]
    async fn test_unseen_paths_soft_deleted() {
        let (db, section) = setup().await;
        let kept = insert_movie(&db, section, "/m/kept.mkv").await;
        let orphan = insert_movie(&db, section, "/m/gone.mkv").await;

        let scan = db.scans().create(section).await.unwrap();
        db.scans()
            .record_seen_paths(scan.id, &["/m/kept.mkv".to_string()])
            .await
            .unwrap();

        let deleted = reconcile_orphans(&db, section, scan.id).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(db.metadata_items().get(kept, false).await.unwrap().is_some());
        // Soft-deleted: invisible normally, visible to the reconciler.
        assert!(db.metadata_items().get(orphan, false).await.unwrap().is_none());
        assert!(db.metadata_items().get(orphan, true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_partial_stack_survives() {
        let (db, section) = setup().await;

        // One item with two parts; only one part seen.
        let mut item = MetadataItem::skeleton(ItemKind::Movie);
        item.library_section_id = Some(section);
        item.title = Some("Stacked".into());
        let item = db.metadata_items().insert(&item).await.unwrap();
        let mut media = MediaItem::new(item.id);
        for (i, path) in ["/m/s.cd1.mkv", "/m/s.cd2.mkv"].iter().enumerate() {
            media.parts.push(MediaPart {
                id: Uuid::new_v4(),
                media_item_id: media.id,
                part_index: i as i32,
                file_path: path.to_string(),
                size_bytes: 10,
                modified_at: None,
                hash: None,
                duration_ms: None,
                container: Some("mkv".into()),
                streams: Vec::new(),
            });
        }
        media.recompute_summary();
        db.media().upsert(&media).await.unwrap();

        let scan = db.scans().create(section).await.unwrap();
        db.scans()
            .record_seen_paths(scan.id, &["/m/s.cd1.mkv".to_string()])
            .await
            .unwrap();

        let deleted = reconcile_orphans(&db, section, scan.id).await.unwrap();
        assert_eq!(deleted, 0);
        assert!(db.metadata_items().get(item.id, false).await.unwrap().is_some());
    }
}
