//! Playback session registry
//!
//! Serializes all mutations for a given session by routing them through a
//! single per-session worker with a bounded mailbox. Decisions for
//! different sessions run concurrently; decisions for one session never
//! interleave.

use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use time::{Duration, OffsetDateTime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::Database;
use crate::model::capability::CapabilityProfile;
use crate::model::PlaybackSession;

use super::engine::{DecideInput, DecideOutput, PlaybackEngine};
use super::transcoder::TranscodeSupervisor;

/// Mailbox depth per session worker.
const MAILBOX_CAPACITY: usize = 16;

struct SessionMsg {
    input: DecideInput,
    reply: oneshot::Sender<Result<DecideOutput>>,
}

/// Registry of per-session workers over the shared engine.
pub struct SessionRegistry {
    db: Database,
    engine: Arc<PlaybackEngine>,
    supervisor: TranscodeSupervisor,
    workers: DashMap<Uuid, mpsc::Sender<SessionMsg>>,
    session_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(
        db: Database,
        engine: Arc<PlaybackEngine>,
        supervisor: TranscodeSupervisor,
        session_ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self { db, engine, supervisor, workers: DashMap::new(), session_ttl })
    }

    /// Open a session for a client with its capability declaration.
    pub async fn open_session(
        &self,
        user_session: &str,
        profile: &CapabilityProfile,
    ) -> Result<PlaybackSession> {
        let session = self
            .db
            .playback_sessions()
            .create(user_session, profile, self.session_ttl)
            .await?;
        info!(session = %session.id, version = profile.version, "Playback session opened");
        Ok(session)
    }

    /// Run one decision round, serialized with every other mutation of the
    /// same session.
    pub async fn decide(self: &Arc<Self>, input: DecideInput) -> Result<DecideOutput> {
        let session_id = input.session_id;
        let tx = self.worker_for(session_id);
        let (reply, rx) = oneshot::channel();
        tx.send(SessionMsg { input, reply })
            .await
            .context("session worker gone")?;
        rx.await.context("session worker dropped request")?
    }

    fn worker_for(self: &Arc<Self>, session_id: Uuid) -> mpsc::Sender<SessionMsg> {
        if let Some(tx) = self.workers.get(&session_id) {
            return tx.clone();
        }
        let (tx, mut rx) = mpsc::channel::<SessionMsg>(MAILBOX_CAPACITY);
        let engine = self.engine.clone();
        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let result = engine.decide(msg.input).await;
                let _ = msg.reply.send(result);
            }
            debug!(session = %session_id, "Session worker stopped");
            registry.workers.remove(&session_id);
        });
        self.workers.insert(session_id, tx.clone());
        tx
    }

    /// Reap expired sessions: cancel their transcodes, drop their workers,
    /// delete the rows. Expired generators cascade with the session.
    pub async fn reap_expired(&self) -> Result<usize> {
        let expired = self
            .db
            .playback_sessions()
            .list_expired(OffsetDateTime::now_utc())
            .await?;
        let count = expired.len();
        for session in expired {
            info!(session = %session.id, "Reaping expired playback session");
            self.supervisor.cancel_for_session(session.id).await;
            self.workers.remove(&session.id);
            self.db.playback_sessions().delete(session.id).await?;
        }
        Ok(count)
    }
}
