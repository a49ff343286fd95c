//! Directory traversal stage
//!
//! Produces a work item for every filesystem entry of every section
//! location, in pre-order and lexicographic name order so the emission
//! order is defined by (location, then path). Records every entry path in
//! the seen set, checkpoints every 500 items or 30 seconds, and
//! fast-forwards past the cursor on resume.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::model::library::stage_names;

use super::super::context::ScanContext;
use super::super::probe::{is_ignored, list_dir, Entry};
use super::super::work_item::ScanWorkItem;
use super::{StageReceiver, STAGE_CHANNEL_CAPACITY};

/// Checkpoint after this many emitted items...
const CHECKPOINT_EVERY_ITEMS: usize = 500;
/// ...or this much elapsed time, whichever comes first.
const CHECKPOINT_EVERY: std::time::Duration = std::time::Duration::from_secs(30);

/// Resume cursor payload: `<location_id>|<path>`.
fn encode_cursor(location_id: uuid::Uuid, path: &str) -> String {
    format!("{location_id}|{path}")
}

fn decode_cursor(cursor: &str) -> Option<(uuid::Uuid, String)> {
    let (loc, path) = cursor.split_once('|')?;
    Some((uuid::Uuid::parse_str(loc).ok()?, path.to_string()))
}

pub fn spawn(ctx: Arc<ScanContext>) -> StageReceiver {
    let (tx, rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        if let Err(e) = run(ctx.clone(), tx).await {
            if !ctx.cancel.is_cancelled() {
                warn!(scan_id = %ctx.scan_id, error = %e, "Traversal stage failed");
                ctx.mark_failed();
            }
            ctx.cancel.cancel();
        }
    });
    rx
}

async fn run(ctx: Arc<ScanContext>, tx: mpsc::Sender<ScanWorkItem>) -> Result<()> {
    let resume = ctx
        .resume
        .as_ref()
        .filter(|r| r.stage == stage_names::DIRECTORY_TRAVERSAL)
        .and_then(|r| decode_cursor(&r.cursor));
    let mut fast_forwarding = resume.is_some();

    let mut emitted_since_checkpoint = 0usize;
    let mut last_checkpoint = Instant::now();

    let locations = ctx.section.locations.clone();
    let cursor_location_position = resume
        .as_ref()
        .and_then(|(loc_id, _)| locations.iter().find(|l| l.id == *loc_id))
        .map(|l| l.position);

    for location in &locations {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }

        // Locations fully covered before the cursored one are skipped
        // wholesale on resume; their seen paths are already durable.
        if let (true, Some(position)) = (fast_forwarding, cursor_location_position) {
            if location.position < position {
                debug!(location = %location.root_path, "Resume: skipping completed location");
                continue;
            }
        }

        let root = PathBuf::from(&location.root_path);
        if !root.is_dir() {
            warn!(root = %location.root_path, "Section location missing, skipping");
            continue;
        }

        let cursor_path = resume
            .as_ref()
            .filter(|(loc_id, _)| *loc_id == location.id)
            .map(|(_, p)| p.clone());

        info!(scan_id = %ctx.scan_id, root = %location.root_path, "Traversing location");

        // Explicit DFS stack: (entries to process, shared sibling list,
        // ancestor chain, next index).
        struct Frame {
            entries: Arc<Vec<Entry>>,
            ancestors: Arc<Vec<PathBuf>>,
            next: usize,
        }

        let root_entries = Arc::new(filtered_list(&ctx, &root));
        let mut stack = vec![Frame {
            entries: root_entries,
            ancestors: Arc::new(vec![root.clone()]),
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            let Some(entry) = frame.entries.get(frame.next).cloned() else {
                stack.pop();
                continue;
            };
            frame.next += 1;

            let siblings = frame.entries.clone();
            let ancestors = frame.ancestors.clone();
            let entry_path = entry.path.to_string_lossy().to_string();

            // Fast-forward: skip entries lexicographically <= cursor, but
            // still descend into directories whose subtree may reach past
            // it.
            let emit = match (fast_forwarding, cursor_path.as_deref()) {
                (true, Some(cursor)) => entry_path.as_str() > cursor,
                (true, None) => false,
                (false, _) => true,
            };

            let children: Option<Arc<Vec<Entry>>> = if entry.is_dir {
                Some(Arc::new(filtered_list(&ctx, &entry.path)))
            } else {
                None
            };

            if emit {
                if fast_forwarding {
                    // First live emission after catching up.
                    ctx.clear_resume().await?;
                    fast_forwarding = false;
                    info!(scan_id = %ctx.scan_id, path = %entry_path, "Resume fast-forward complete");
                }

                ctx.record_seen_path(entry_path.clone()).await?;
                ctx.counters.seen.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

                let item = ScanWorkItem {
                    scan_id: ctx.scan_id,
                    library_section_id: ctx.section.id,
                    section_location_id: location.id,
                    library_kind: ctx.section.kind,
                    location_root: Arc::new(root.clone()),
                    entry: entry.clone(),
                    is_root: false,
                    children: children.clone(),
                    siblings,
                    ancestors: ancestors.clone(),
                    is_unchanged: false,
                    resolved: None,
                    sidecar_patch: None,
                    embedded_patch: None,
                    remote_patch: None,
                    metadata_source: None,
                };
                if tx.send(item).await.is_err() {
                    // Downstream gone; treat as cancellation.
                    return Ok(());
                }

                emitted_since_checkpoint += 1;
                if emitted_since_checkpoint >= CHECKPOINT_EVERY_ITEMS
                    || last_checkpoint.elapsed() >= CHECKPOINT_EVERY
                {
                    ctx.save_checkpoint(
                        stage_names::DIRECTORY_TRAVERSAL,
                        &encode_cursor(location.id, &entry_path),
                    )
                    .await?;
                    emitted_since_checkpoint = 0;
                    last_checkpoint = Instant::now();
                }
            }

            if entry.is_dir {
                let descend = match (fast_forwarding, cursor_path.as_deref()) {
                    (true, Some(cursor)) => {
                        let prefix = format!("{entry_path}/");
                        cursor.starts_with(&prefix) || entry_path.as_str() > cursor
                    }
                    _ => true,
                };
                if descend {
                    let mut child_ancestors = (*ancestors).clone();
                    child_ancestors.push(entry.path.clone());
                    stack.push(Frame {
                        entries: children.unwrap_or_default(),
                        ancestors: Arc::new(child_ancestors),
                        next: 0,
                    });
                }
            }
        }
    }

    // Everything the traversal saw must be durable before the stage ends.
    ctx.flush_seen_paths().await?;
    Ok(())
}

fn filtered_list(ctx: &ScanContext, dir: &std::path::Path) -> Vec<Entry> {
    list_dir(dir)
        .into_iter()
        .filter(|e| !is_ignored(ctx.registry.ignore_rules(), e, ctx.section.kind))
        .collect()
}
