//! Scan context
//!
//! Shared state for one scan run: the checkpoint writer, the buffered
//! seen-path recorder, run counters and the cancellation token. Stages hold
//! the context behind an `Arc` and go through it for every durable write.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::db::Database;
use crate::model::{LibrarySection, ResumeCursor};

use super::registry::PartsRegistry;

/// Seen paths are buffered and flushed in batches of this size; the final
/// flush always precedes the last checkpoint write.
pub const SEEN_PATH_BATCH: usize = 200;

/// Progress event emitted over the context's broadcast channel.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub scan_id: Uuid,
    pub library_section_id: Uuid,
    pub items_seen: i64,
    pub items_created: i64,
    pub items_updated: i64,
    pub items_unchanged: i64,
    pub current_path: Option<String>,
    pub is_complete: bool,
}

/// Counters shared across stages.
#[derive(Debug, Default)]
pub struct ScanCounters {
    pub seen: AtomicI64,
    pub created: AtomicI64,
    pub updated: AtomicI64,
    pub unchanged: AtomicI64,
}

pub struct ScanContext {
    pub scan_id: Uuid,
    pub section: LibrarySection,
    pub db: Database,
    pub registry: Arc<PartsRegistry>,
    pub cancel: CancellationToken,
    pub counters: ScanCounters,

    /// Known checkpoint version; bumped on every successful write. A
    /// conflicting write means another writer owns the scan now and this
    /// one must abandon.
    checkpoint_version: AtomicI64,
    seen_buffer: Mutex<Vec<String>>,
    progress_tx: broadcast::Sender<ScanProgress>,
    /// Resume state read at startup; consumed by the traversal stage.
    pub resume: Option<ResumeCursor>,
    /// Set on scan-fatal errors (checkpoint conflict) so the run finishes
    /// as Failed rather than Cancelled.
    failed: AtomicBool,
}

impl ScanContext {
    pub fn new(
        scan_id: Uuid,
        section: LibrarySection,
        db: Database,
        registry: Arc<PartsRegistry>,
        cancel: CancellationToken,
        checkpoint_version: i64,
        resume: Option<ResumeCursor>,
    ) -> Arc<Self> {
        let (progress_tx, _) = broadcast::channel(100);
        Arc::new(Self {
            scan_id,
            section,
            db,
            registry,
            cancel,
            counters: ScanCounters::default(),
            checkpoint_version: AtomicI64::new(checkpoint_version),
            seen_buffer: Mutex::new(Vec::with_capacity(SEEN_PATH_BATCH)),
            progress_tx,
            resume,
            failed: AtomicBool::new(false),
        })
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    pub fn emit_progress(&self, current_path: Option<String>, is_complete: bool) {
        let _ = self.progress_tx.send(ScanProgress {
            scan_id: self.scan_id,
            library_section_id: self.section.id,
            items_seen: self.counters.seen.load(Ordering::Relaxed),
            items_created: self.counters.created.load(Ordering::Relaxed),
            items_updated: self.counters.updated.load(Ordering::Relaxed),
            items_unchanged: self.counters.unchanged.load(Ordering::Relaxed),
            current_path,
            is_complete,
        });
    }

    /// Write a checkpoint cursor. Conflicts (stale version) are scan-fatal
    /// and propagate to the caller.
    pub async fn save_checkpoint(&self, stage: &str, cursor: &str) -> Result<()> {
        // The seen-path set must be durable before the cursor that implies
        // those paths were processed.
        self.flush_seen_paths().await?;

        let expected = self.checkpoint_version.load(Ordering::Acquire);
        let new_version = self
            .db
            .scans()
            .checkpoint(
                self.scan_id,
                expected,
                &ResumeCursor { stage: stage.to_string(), cursor: cursor.to_string() },
            )
            .await?;
        self.checkpoint_version.store(new_version, Ordering::Release);
        debug!(scan_id = %self.scan_id, stage, cursor, version = new_version, "Checkpoint saved");
        Ok(())
    }

    /// Clear the resume cursor after fast-forward has re-emitted the
    /// cursored path.
    pub async fn clear_resume(&self) -> Result<()> {
        let expected = self.checkpoint_version.load(Ordering::Acquire);
        let new_version = self.db.scans().clear_resume(self.scan_id, expected).await?;
        self.checkpoint_version.store(new_version, Ordering::Release);
        Ok(())
    }

    /// Record one seen path; flushes automatically at the batch size.
    pub async fn record_seen_path(&self, path: String) -> Result<()> {
        let batch = {
            let mut buffer = self.seen_buffer.lock().await;
            buffer.push(path);
            if buffer.len() >= SEEN_PATH_BATCH {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            self.db.scans().record_seen_paths(self.scan_id, &batch).await?;
        }
        Ok(())
    }

    /// Record a batch of seen paths at once.
    pub async fn record_seen_paths(&self, paths: Vec<String>) -> Result<()> {
        for path in paths {
            self.record_seen_path(path).await?;
        }
        Ok(())
    }

    /// Flush the remaining buffered paths.
    pub async fn flush_seen_paths(&self) -> Result<()> {
        let batch = {
            let mut buffer = self.seen_buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if !batch.is_empty() {
            self.db.scans().record_seen_paths(self.scan_id, &batch).await?;
        }
        Ok(())
    }

    /// Persist the run counters.
    pub async fn store_counters(&self) -> Result<()> {
        self.db
            .scans()
            .update_counters(
                self.scan_id,
                self.counters.seen.load(Ordering::Relaxed),
                self.counters.created.load(Ordering::Relaxed),
                self.counters.updated.load(Ordering::Relaxed),
                self.counters.unchanged.load(Ordering::Relaxed),
            )
            .await
    }
}
