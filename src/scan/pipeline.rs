//! Scan pipeline orchestration
//!
//! Composes the stage chain per library section, owns the scan row's
//! lifecycle (create / resume / finish), and triggers orphan
//! reconciliation after a clean completion. One pipeline chain runs per
//! section at a time.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::model::library::stage_names;
use crate::model::{LibraryScan, ScanStatus};
use crate::services::artwork::ArtworkService;

use super::content_rating::ContentRatingResolver;
use super::context::{ScanContext, ScanProgress};
use super::reconcile::reconcile_orphans;
use super::registry::PartsRegistry;
use super::stages;

/// Scan pipeline service. One running chain per section; a second request
/// for the same section is rejected while the first runs.
pub struct ScannerService {
    db: Database,
    registry: Arc<PartsRegistry>,
    artwork: ArtworkService,
    rating_resolver: Arc<dyn ContentRatingResolver>,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
    progress_tx: broadcast::Sender<ScanProgress>,
}

impl ScannerService {
    pub fn new(
        db: Database,
        registry: Arc<PartsRegistry>,
        artwork: ArtworkService,
        rating_resolver: Arc<dyn ContentRatingResolver>,
    ) -> Arc<Self> {
        let (progress_tx, _) = broadcast::channel(100);
        Arc::new(Self {
            db,
            registry,
            artwork,
            rating_resolver,
            running: Mutex::new(HashMap::new()),
            progress_tx,
        })
    }

    /// Subscribe to scan progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Request cancellation of a section's running scan.
    pub fn cancel_scan(&self, section_id: Uuid) -> bool {
        let running = self.running.lock();
        if let Some(token) = running.get(&section_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Scan one library section, resuming a checkpointed run when one
    /// exists. Returns the finished scan row.
    pub async fn scan_section(&self, section_id: Uuid) -> Result<LibraryScan> {
        let section = self
            .db
            .library_sections()
            .get(section_id)
            .await?
            .context("Library section not found")?;

        // At most one chain per section.
        let cancel = CancellationToken::new();
        {
            let mut running = self.running.lock();
            if running.contains_key(&section_id) {
                anyhow::bail!("scan already running for section {section_id}");
            }
            running.insert(section_id, cancel.clone());
        }
        let _guard = RunningGuard { service: self, section_id };

        // Resume a checkpointed scan or start fresh.
        let (scan, resume) = match self.db.scans().find_resumable(section_id).await? {
            Some(existing) => {
                info!(
                    scan_id = %existing.id,
                    cursor = ?existing.resume,
                    "Resuming checkpointed scan"
                );
                let resume = existing.resume.clone();
                (existing, resume)
            }
            None => (self.db.scans().create(section_id).await?, None),
        };

        let ctx = ScanContext::new(
            scan.id,
            section.clone(),
            self.db.clone(),
            self.registry.clone(),
            cancel.clone(),
            scan.checkpoint_version,
            resume,
        );

        info!(
            scan_id = %scan.id,
            section = %section.name,
            kind = %section.kind,
            locations = section.locations.len(),
            "Starting library scan"
        );

        // Forward stage progress onto the service-level channel.
        let mut progress_rx = ctx.subscribe();
        let service_tx = self.progress_tx.clone();
        tokio::spawn(async move {
            while let Ok(progress) = progress_rx.recv().await {
                let _ = service_tx.send(progress);
            }
        });

        // The chain: traversal -> change detection -> resolve -> local
        // metadata -> remote metadata -> persist.
        let traversal_out = stages::traversal::spawn(ctx.clone());
        let change_out = stages::change_detection::spawn(ctx.clone(), traversal_out);
        let resolve_out = stages::resolve::spawn(ctx.clone(), change_out);
        let local_out =
            stages::local_metadata::spawn(ctx.clone(), self.artwork.clone(), resolve_out);
        let remote_out = stages::remote_metadata::spawn(ctx.clone(), local_out);
        let persist_handle =
            stages::persist::spawn(ctx.clone(), self.rating_resolver.clone(), remote_out);

        let pipeline_result = persist_handle.await;

        let status = if ctx.is_failed() {
            ScanStatus::Failed
        } else if cancel.is_cancelled() {
            ScanStatus::Cancelled
        } else {
            match &pipeline_result {
                Ok(Ok(())) => ScanStatus::Completed,
                Ok(Err(e)) => {
                    error!(scan_id = %scan.id, error = %e, "Scan pipeline failed");
                    ScanStatus::Failed
                }
                Err(join_err) => {
                    error!(scan_id = %scan.id, error = %join_err, "Scan pipeline panicked");
                    ScanStatus::Failed
                }
            }
        };

        // The seen-path set is always preserved; on failure or
        // cancellation reconciliation is deferred to the next clean run.
        ctx.flush_seen_paths().await?;
        ctx.store_counters().await?;

        if status == ScanStatus::Completed {
            ctx.save_checkpoint(stage_names::RECONCILE, "").await?;
            match reconcile_orphans(&self.db, section_id, scan.id).await {
                Ok(orphans) if orphans > 0 => {
                    info!(scan_id = %scan.id, orphans, "Reconciliation complete")
                }
                Ok(_) => {}
                Err(e) => warn!(scan_id = %scan.id, error = %e, "Reconciliation failed"),
            }
            self.db.library_sections().update_last_scanned(section_id).await?;
        }

        self.db.scans().finish(scan.id, status).await?;
        ctx.emit_progress(None, true);

        let finished = self
            .db
            .scans()
            .get(scan.id)
            .await?
            .context("scan row vanished")?;
        info!(
            scan_id = %finished.id,
            status = finished.status.as_str(),
            seen = finished.items_seen,
            created = finished.items_created,
            updated = finished.items_updated,
            unchanged = finished.items_unchanged,
            "Library scan finished"
        );
        Ok(finished)
    }

    /// Scan every section with auto-scan enabled (scheduled job entry).
    pub async fn scan_all_auto(&self) -> Result<()> {
        let sections = self.db.library_sections().list_auto_scan().await?;
        info!(count = sections.len(), "Scanning sections with auto-scan enabled");
        for section in sections {
            if let Err(e) = self.scan_section(section.id).await {
                error!(section_id = %section.id, error = %e, "Section scan failed");
            }
        }
        Ok(())
    }

    /// Resume any scans left in `running` state from a previous process.
    pub async fn resume_interrupted(&self) -> Result<()> {
        for section in self.db.library_sections().list().await? {
            if let Some(scan) = self.db.scans().find_resumable(section.id).await? {
                info!(scan_id = %scan.id, section = %section.name, "Resuming interrupted scan");
                if let Err(e) = self.scan_section(section.id).await {
                    error!(section_id = %section.id, error = %e, "Resume failed");
                }
            }
        }
        Ok(())
    }
}

struct RunningGuard<'a> {
    service: &'a ScannerService,
    section_id: Uuid,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.service.running.lock().remove(&self.section_id);
    }
}
