//! Merge & persist stage
//!
//! The final consumer. Applies the overlay (resolved <- embedded <-
//! sidecar <- remote), resolves identity through the dedup protocol (or by
//! part path when an item carries no external ids), and writes items,
//! media and relations through the store. Unchanged items short-circuit
//! with no write, which is what keeps a second scan over an unchanged tree
//! from touching the database.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{MediaItem, MetadataItem};
use crate::scan::merge::{apply_overlay, items_equivalent};
use crate::scan::patch::MetadataPatch;

use super::super::content_rating::ContentRatingResolver;
use super::super::context::ScanContext;
use super::super::dedup::{FindOrCreate, MetadataDeduplication};
use super::super::work_item::{ResolvedItem, ScanWorkItem};
use super::StageReceiver;

pub fn spawn(
    ctx: Arc<ScanContext>,
    rating_resolver: Arc<dyn ContentRatingResolver>,
    mut input: StageReceiver,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let mut state = PersistState {
            ctx: ctx.clone(),
            dedup: MetadataDeduplication::new(ctx.db.metadata_items()),
            id_map: HashMap::new(),
            rating_resolver,
            processed: 0,
        };

        while let Some(item) = input.recv().await {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            if let Err(e) = state.persist_work_item(item).await {
                // A single item failing to persist is recoverable; the scan
                // carries on without it.
                warn!(scan_id = %ctx.scan_id, error = %e, "Item persist failed");
            }
        }

        ctx.store_counters().await?;
        Ok(())
    })
}

struct PersistState {
    ctx: Arc<ScanContext>,
    dedup: MetadataDeduplication,
    /// resolved item id -> persisted item id, for rewiring parents and
    /// relations when dedup swaps an item for an existing row.
    id_map: HashMap<Uuid, Uuid>,
    rating_resolver: Arc<dyn ContentRatingResolver>,
    processed: u64,
}

impl PersistState {
    async fn persist_work_item(&mut self, mut item: ScanWorkItem) -> Result<()> {
        let Some(resolved) = item.resolved.take() else {
            return Ok(());
        };

        // Unchanged files whose item is already persisted skip every write.
        if item.is_unchanged {
            if let Some(part) = resolved.media.as_ref().and_then(|m| m.parts.first()) {
                if let Some(existing_id) = self
                    .ctx
                    .db
                    .media()
                    .find_metadata_item_by_part_path(&part.file_path)
                    .await?
                {
                    self.id_map.insert(resolved.item.id, existing_id);
                    return Ok(());
                }
            }
        }

        let sidecar = item.sidecar_patch.take();
        let embedded = item.embedded_patch.take();
        let remote = item.remote_patch.take();

        self.persist_tree(resolved, embedded.as_ref(), sidecar.as_ref(), remote.as_ref())
            .await?;

        self.processed += 1;
        if self.processed % 25 == 0 {
            self.ctx.emit_progress(Some(item.entry.path.to_string_lossy().to_string()), false);
            self.ctx.store_counters().await?;
        }
        Ok(())
    }

    /// Persist one resolved item and its subtree. Returns the persisted id.
    async fn persist_tree(
        &mut self,
        mut resolved: ResolvedItem,
        embedded: Option<&MetadataPatch>,
        sidecar: Option<&MetadataPatch>,
        remote: Option<&MetadataPatch>,
    ) -> Result<Uuid> {
        let children = std::mem::take(&mut resolved.children);
        let child_embedded = resolved.embedded_patch.take();
        let embedded = child_embedded.as_ref().or(embedded);

        // Rewire the parent pointer through already-persisted ancestors.
        if let Some(parent_id) = resolved.item.parent_id {
            if let Some(mapped) = self.id_map.get(&parent_id) {
                resolved.item.parent_id = Some(*mapped);
            }
        }
        for relation in resolved.item.relations_out.iter_mut() {
            if let Some(mapped) = self.id_map.get(&relation.to_id) {
                relation.to_id = *mapped;
            }
        }

        let resolved_id = resolved.item.id;
        let media = resolved.media.take();
        let part_path = media
            .as_ref()
            .and_then(|m| m.parts.first())
            .map(|p| p.file_path.clone());
        let persisted_id = self
            .persist_item(resolved.item, part_path, embedded, sidecar, remote)
            .await?;
        self.id_map.insert(resolved_id, persisted_id);

        if let Some(mut media) = media {
            media.metadata_item_id = persisted_id;
            for part in media.parts.iter_mut() {
                part.media_item_id = media.id;
            }
            self.persist_media(&media).await?;
        }

        // Children persist after the parent so their parent pointers can be
        // rewired; their order becomes the parent's child list.
        let mut child_ids = Vec::with_capacity(children.len());
        for mut child in children {
            if child.item.parent_id == Some(resolved_id) {
                child.item.parent_id = Some(persisted_id);
            }
            let child_id = Box::pin(self.persist_tree(child, None, None, None)).await?;
            child_ids.push(child_id);
        }
        if !child_ids.is_empty() {
            self.ctx
                .db
                .metadata_items()
                .update_child_order(persisted_id, &child_ids)
                .await?;
        }

        Ok(persisted_id)
    }

    async fn persist_item(
        &mut self,
        mut item: MetadataItem,
        part_path: Option<String>,
        embedded: Option<&MetadataPatch>,
        sidecar: Option<&MetadataPatch>,
        remote: Option<&MetadataPatch>,
    ) -> Result<Uuid> {
        let repo = self.ctx.db.metadata_items();
        let no_overrides = BTreeSet::new();

        // Identity: external ids first, then part path.
        let mut candidate_ids = item.external_ids.clone();
        for patch in [embedded, sidecar, remote].into_iter().flatten() {
            candidate_ids.extend(patch.pending_external_ids.iter().cloned());
        }

        if !candidate_ids.is_empty() {
            let ids: Vec<_> = candidate_ids.iter().cloned().collect();
            let kind = item.kind;
            let section = item.library_section_id;
            let outcome = self
                .dedup
                .find_or_create_by_external_ids(kind, &ids, section, || item.clone())
                .await?;
            match outcome {
                FindOrCreate::Existing(id) => {
                    return self
                        .merge_into_existing(id, item, embedded, sidecar, remote)
                        .await;
                }
                FindOrCreate::Created(created) => item = *created,
            }
        }

        // No external-id match; the part path identifies re-scanned items
        // that never gained an id. Containers (shows, seasons, albums) have
        // no parts and match on structure instead.
        let structural_match = match &part_path {
            Some(path) => {
                self.ctx
                    .db
                    .media()
                    .find_metadata_item_by_part_path(path)
                    .await?
            }
            None => match &item.title {
                Some(title) => {
                    repo.find_by_structure(
                        item.library_section_id,
                        item.kind,
                        item.parent_id,
                        title,
                    )
                    .await?
                }
                None => None,
            },
        };
        if let Some(id) = structural_match {
            self.dedup.abandon(item.id);
            return self
                .merge_into_existing(id, item, embedded, sidecar, remote)
                .await;
        }

        // Fresh insert: overlay onto the skeleton, then write.
        apply_overlay(
            &mut item,
            embedded,
            sidecar,
            remote,
            &no_overrides,
            &no_overrides,
            self.rating_resolver.as_ref(),
        )
        .await;

        let inserted = repo.insert(&item).await?;
        self.dedup.confirm_persisted(inserted.id);
        self.ctx.counters.created.fetch_add(1, Ordering::Relaxed);
        debug!(item_id = %inserted.id, kind = %inserted.kind, "Item created");
        Ok(inserted.id)
    }

    async fn merge_into_existing(
        &mut self,
        id: Uuid,
        incoming: MetadataItem,
        embedded: Option<&MetadataPatch>,
        sidecar: Option<&MetadataPatch>,
        remote: Option<&MetadataPatch>,
    ) -> Result<Uuid> {
        let repo = self.ctx.db.metadata_items();
        let Some(mut existing) = repo.get(id, true).await? else {
            anyhow::bail!("identity pointed at missing item {id}");
        };
        if existing.kind != incoming.kind {
            warn!(
                existing = %existing.kind,
                incoming = %incoming.kind,
                item_id = %id,
                "Kind mismatch on identity match; keeping existing item untouched"
            );
            return Ok(id);
        }

        let before = existing.clone();
        let locked = existing.locked_fields.clone();
        let no_overrides = BTreeSet::new();

        // The resolver skeleton is the base layer for refreshed items too.
        let resolved_patch = skeleton_patch(&incoming);
        crate::scan::merge::apply_layer(
            &mut existing,
            &resolved_patch,
            &locked,
            &no_overrides,
            self.rating_resolver.as_ref(),
        )
        .await;
        apply_overlay(
            &mut existing,
            embedded,
            sidecar,
            remote,
            &locked,
            &no_overrides,
            self.rating_resolver.as_ref(),
        )
        .await;
        existing.parent_id = incoming.parent_id.or(existing.parent_id);
        existing.external_ids.extend(incoming.external_ids.iter().cloned());
        for relation in incoming.relations_out {
            if !existing.relations_out.contains(&relation) {
                existing.relations_out.push(relation);
            }
        }

        // A reappearing part revives a soft-deleted item.
        let was_deleted = existing.deleted_at.is_some();
        existing.deleted_at = None;

        if was_deleted || !items_equivalent(&before, &existing) {
            if was_deleted {
                repo.undelete(id).await?;
            }
            repo.update(&existing).await?;
            self.ctx.counters.updated.fetch_add(1, Ordering::Relaxed);
            debug!(item_id = %id, "Item updated");
        }
        Ok(id)
    }

    async fn persist_media(&self, media: &MediaItem) -> Result<()> {
        // An identical rendition is left untouched so a rescan over an
        // unchanged tree writes nothing and part ids stay stable.
        let existing = self
            .ctx
            .db
            .media()
            .find_by_metadata_item(media.metadata_item_id)
            .await?;
        if existing.len() == 1 && media_signature(&existing[0]) == media_signature(media) {
            return Ok(());
        }
        self.ctx.db.media().replace_for_metadata_item(media).await
    }
}

/// Comparable shape of a rendition: part paths, sizes and stream counts.
fn media_signature(media: &MediaItem) -> Vec<(String, i64, usize)> {
    let mut parts: Vec<(String, i64, usize)> = media
        .parts
        .iter()
        .map(|p| (p.file_path.clone(), p.size_bytes, p.streams.len()))
        .collect();
    parts.sort();
    parts
}

/// The resolver's contribution expressed as a patch, so refreshes flow
/// through the same field policy as the other layers.
fn skeleton_patch(item: &MetadataItem) -> MetadataPatch {
    MetadataPatch {
        title: item.title.clone(),
        sort_title: item.sort_title.clone(),
        release_date: item.release_date.map(|d| d.0),
        year: item.year,
        index_number: item.index_number,
        duration_ms: item.duration_ms,
        ..Default::default()
    }
}
