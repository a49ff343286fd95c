//! Scheduled background jobs
//!
//! Cron-driven maintenance: scheduled library scans, the transcode
//! supervisor tick, and expiry GC for sessions and playlist generators.

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::playback::{PlaylistService, SessionRegistry, TranscodeSupervisor};
use crate::scan::ScannerService;

/// Supervisor tick cadence.
const TICK_SCHEDULE: &str = "*/10 * * * * *";
/// Session / generator expiry sweep.
const REAP_SCHEDULE: &str = "0 */5 * * * *";
/// Scheduled scans for auto-scan sections (03:00 nightly).
const SCAN_SCHEDULE: &str = "0 0 3 * * *";

pub struct JobRunner {
    scheduler: JobScheduler,
}

impl JobRunner {
    pub async fn start(
        scanner: Arc<ScannerService>,
        supervisor: TranscodeSupervisor,
        sessions: Arc<SessionRegistry>,
        playlists: Arc<PlaylistService>,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        {
            let supervisor = supervisor.clone();
            scheduler
                .add(Job::new_async(TICK_SCHEDULE, move |_id, _lock| {
                    let supervisor = supervisor.clone();
                    Box::pin(async move {
                        supervisor.tick().await;
                    })
                })?)
                .await?;
        }

        {
            let sessions = sessions.clone();
            let playlists = playlists.clone();
            scheduler
                .add(Job::new_async(REAP_SCHEDULE, move |_id, _lock| {
                    let sessions = sessions.clone();
                    let playlists = playlists.clone();
                    Box::pin(async move {
                        match sessions.reap_expired().await {
                            Ok(reaped) if reaped > 0 => {
                                info!(reaped, "Expired sessions reaped")
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "Session reaping failed"),
                        }
                        match playlists.gc_expired().await {
                            Ok(collected) if collected > 0 => {
                                info!(collected, "Expired generators collected")
                            }
                            Ok(_) => {}
                            Err(e) => error!(error = %e, "Generator GC failed"),
                        }
                    })
                })?)
                .await?;
        }

        {
            let scanner = scanner.clone();
            scheduler
                .add(Job::new_async(SCAN_SCHEDULE, move |_id, _lock| {
                    let scanner = scanner.clone();
                    Box::pin(async move {
                        if let Err(e) = scanner.scan_all_auto().await {
                            error!(error = %e, "Scheduled scans failed");
                        }
                    })
                })?)
                .await?;
        }

        scheduler.start().await?;
        info!("Background jobs scheduled");
        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}
