//! Change detection stage
//!
//! Loads the library's stored `(path -> size, mtime)` map once, then marks
//! work items unchanged when both stats are present, sizes are equal, and
//! the mtime delta is under two seconds (absorbing FAT/HFS coarse stamp
//! resolution). Unchanged directories always pass through; unchanged files
//! still flow through later stages but short-circuit persistence. Missing
//! stored stats mean "potentially changed".

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::super::context::ScanContext;
use super::{StageReceiver, STAGE_CHANNEL_CAPACITY};

/// Coarse-filesystem mtime slop.
const MTIME_SLOP_SECONDS: i64 = 2;

pub fn spawn(ctx: Arc<ScanContext>, mut input: StageReceiver) -> StageReceiver {
    let (tx, rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        // One load per scan; the cache is private to this stage.
        let stats = match ctx.db.media().part_stats_for_section(ctx.section.id).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(scan_id = %ctx.scan_id, error = %e,
                    "Failed to load stored stats; treating everything as changed");
                Default::default()
            }
        };
        debug!(scan_id = %ctx.scan_id, known_paths = stats.len(), "Change detection cache loaded");

        while let Some(item) = input.recv().await {
            if ctx.cancel.is_cancelled() {
                return;
            }

            let item = if item.entry.is_dir {
                item
            } else {
                let path = item.entry.path.to_string_lossy();
                let unchanged = stats.get(path.as_ref()).is_some_and(|stored| {
                    let size_matches = item
                        .entry
                        .size
                        .is_some_and(|size| size as i64 == stored.size_bytes);
                    let mtime_matches = match (item.entry.mtime, stored.modified_at) {
                        (Some(on_disk), Some(stored_at)) => {
                            (on_disk - stored_at).whole_seconds().abs() < MTIME_SLOP_SECONDS
                        }
                        _ => false,
                    };
                    size_matches && mtime_matches
                });
                if unchanged {
                    ctx.counters
                        .unchanged
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    item.unchanged()
                } else {
                    item
                }
            };

            if tx.send(item).await.is_err() {
                return;
            }
        }
    });
    rx
}
