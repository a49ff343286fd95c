//! Resolve stage
//!
//! Runs the resolver set over each entry; the first non-null result wins.
//! Entries with no match are dropped (non-fatal). The stage keeps a map of
//! resolved directories so descendants can parent to them, and resolves
//! extras ownership against the items claimed by each folder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::model::Relation;

use super::super::context::ScanContext;
use super::super::resolvers::extras::OwnershipOutcome;
use super::super::resolvers::ResolveArgs;
use super::super::work_item::{ResolvedItem, ScanWorkItem};
use super::{StageReceiver, STAGE_CHANNEL_CAPACITY};

/// What a directory ended up containing, for parenting and extras
/// ownership.
struct DirRecord {
    /// Lightweight copy of the directory's own resolved item, if any.
    own_item: Option<ResolvedItem>,
    /// Primary (non-extra) items claimed by this folder, including loose
    /// files resolved directly under it.
    claimed: Vec<Uuid>,
}

pub fn spawn(ctx: Arc<ScanContext>, mut input: StageReceiver) -> StageReceiver {
    let (tx, rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut dirs: HashMap<PathBuf, DirRecord> = HashMap::new();

        while let Some(item) = input.recv().await {
            if ctx.cancel.is_cancelled() {
                return;
            }

            let resolved = resolve_one(&ctx, &item, &dirs);

            // Directories always get a record so extras can distinguish
            // "folder with nothing eligible" from "folder never seen".
            if item.entry.is_dir {
                let record = DirRecord {
                    own_item: resolved.as_ref().map(|r| ResolvedItem {
                        item: r.item.clone(),
                        media: None,
                        children: Vec::new(),
                        pending_owner: None,
                        embedded_patch: None,
                    }),
                    claimed: resolved
                        .as_ref()
                        .filter(|r| !r.item.kind.is_extra())
                        .map(|r| vec![r.item.id])
                        .unwrap_or_default(),
                };
                dirs.insert(item.entry.path.clone(), record);
            } else if let Some(r) = &resolved {
                if !r.item.kind.is_extra() {
                    // Loose files claim their parent folder.
                    if let Some(parent) = item.entry.path.parent() {
                        dirs.entry(parent.to_path_buf())
                            .or_insert_with(|| DirRecord { own_item: None, claimed: Vec::new() })
                            .claimed
                            .push(r.item.id);
                    }
                }
            }

            let Some(mut resolved) = resolved else {
                debug!(path = %item.entry.path.display(), "No resolver matched, dropping");
                continue;
            };

            // Extras: turn the pending owner into a typed relation, or drop
            // the item with the outcome reason.
            if let Some(pending) = resolved.pending_owner.take() {
                let outcome = resolve_ownership(&dirs, &pending.owner_dir);
                match outcome {
                    OwnershipOutcome::Success(owner_id) => {
                        resolved.item.relations_out.push(Relation {
                            kind: pending.relation,
                            from_id: resolved.item.id,
                            to_id: owner_id,
                        });
                    }
                    other => {
                        debug!(
                            path = %item.entry.path.display(),
                            reason = other.reason(),
                            "Extra dropped"
                        );
                        continue;
                    }
                }
            }

            if tx.send(item.with_resolved(resolved)).await.is_err() {
                return;
            }
        }
    });
    rx
}

fn resolve_one(
    ctx: &ScanContext,
    item: &ScanWorkItem,
    dirs: &HashMap<PathBuf, DirRecord>,
) -> Option<ResolvedItem> {
    // Nearest resolved ancestor, walking rootward.
    let resolved_parent = item
        .entry
        .path
        .ancestors()
        .skip(1)
        .find_map(|dir| dirs.get(dir).and_then(|r| r.own_item.as_ref()));

    let args = ResolveArgs {
        entry: &item.entry,
        library_kind: item.library_kind,
        section_location_id: item.section_location_id,
        library_section_id: item.library_section_id,
        children: item.children.as_deref().map(|v| v.as_slice()),
        is_root: item.is_root,
        ancestors: &item.ancestors,
        resolved_parent,
        siblings: &item.siblings,
    };

    for resolver in ctx.registry.resolvers() {
        if let Some(resolved) = resolver.resolve(&args) {
            debug!(
                path = %item.entry.path.display(),
                resolver = resolver.name(),
                kind = %resolved.item.kind,
                "Entry resolved"
            );
            return Some(resolved);
        }
    }
    None
}

fn resolve_ownership(dirs: &HashMap<PathBuf, DirRecord>, owner_dir: &PathBuf) -> OwnershipOutcome {
    let Some(record) = dirs.get(owner_dir) else {
        return OwnershipOutcome::MissingFolder;
    };
    // Prefer a movie-like primary over raw claim counting.
    let candidates: Vec<Uuid> = record.claimed.clone();
    match candidates.len() {
        0 => OwnershipOutcome::NoEligibleFiles,
        1 => OwnershipOutcome::Success(candidates[0]),
        _ => OwnershipOutcome::AmbiguousCandidates,
    }
}
