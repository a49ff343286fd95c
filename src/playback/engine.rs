//! Playback engine
//!
//! Orchestrates a playback decision end to end: capability caching and
//! version mismatch, part selection, the direct-play/remux/transcode
//! choice, transcode job startup, trickplay URLs, heartbeats, and the
//! end-of-item protocol through the playlist generator.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::Database;
use crate::media::bif::BifStore;
use crate::model::capability::CapabilityProfile;
use crate::model::{PlaybackState, TranscodeJobState};

use super::decision::{decide_part, select_part, DecisionConfig, DeliveryMode};
use super::playlist::PlaylistService;
use super::transcoder::TranscodeSupervisor;

/// Client-reported status driving the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Playing,
    Paused,
    Buffering,
    Ended,
    Stopped,
}

/// decidePlayback input.
#[derive(Debug, Clone, Deserialize)]
pub struct DecideInput {
    pub session_id: Uuid,
    /// Item the client wants to play; on `ended` this is the finished item.
    pub metadata_item_id: Option<Uuid>,
    pub status: ClientStatus,
    #[serde(default)]
    pub progress_ms: i64,
    pub current_item_id: Option<Uuid>,
    /// Full profile when (re-)declaring capabilities.
    pub capability_profile: Option<CapabilityProfile>,
    /// The version the client believes is current.
    pub capability_version: i64,
}

/// decidePlayback output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideOutput {
    pub action: DecideAction,
    pub stream_plan_json: Option<String>,
    pub playback_url: Option<String>,
    pub trickplay_url: Option<String>,
    pub next_item_id: Option<Uuid>,
    pub next_item_title: Option<String>,
    pub capability_profile_version: i64,
    pub capability_version_mismatch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecideAction {
    Play,
    Next,
    Stop,
}

/// Playback refusal surfaced to the client instead of a stream plan.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackRefusal {
    #[error("session not found")]
    SessionNotFound,
    #[error("item has no playable media")]
    NoPlayableMedia,
    #[error("item not found")]
    ItemNotFound,
}

pub struct PlaybackEngine {
    db: Database,
    supervisor: TranscodeSupervisor,
    playlists: Arc<PlaylistService>,
    bif: BifStore,
    config: DecisionConfig,
    session_ttl: Duration,
}

impl PlaybackEngine {
    pub fn new(
        db: Database,
        supervisor: TranscodeSupervisor,
        playlists: Arc<PlaylistService>,
        bif: BifStore,
        config: DecisionConfig,
        session_ttl: Duration,
    ) -> Self {
        Self { db, supervisor, playlists, bif, config, session_ttl }
    }

    /// One decision/heartbeat round for a session. Callers serialize per
    /// session through the session registry.
    pub async fn decide(&self, input: DecideInput) -> Result<DecideOutput> {
        let sessions = self.db.playback_sessions();
        let session = sessions
            .get(input.session_id)
            .await?
            .ok_or(PlaybackRefusal::SessionNotFound)?;

        // Capability cache: a full profile re-declaration updates the
        // cache; a bare version reference that diverges flags a mismatch so
        // the client can re-issue with the full profile.
        let mut cached_version = session.capability_version;
        if let Some(profile) = &input.capability_profile {
            if profile.version != cached_version {
                sessions.update_capability_profile(session.id, profile).await?;
                cached_version = profile.version;
                debug!(session = %session.id, version = profile.version, "Capability profile updated");
            }
        }
        let mismatch = input.capability_version != cached_version;

        // Every round is a heartbeat: playhead, expiry, dependents.
        let state = match input.status {
            ClientStatus::Playing => PlaybackState::Playing,
            ClientStatus::Paused => PlaybackState::Paused,
            ClientStatus::Buffering => PlaybackState::Buffering,
            ClientStatus::Ended | ClientStatus::Stopped => PlaybackState::Stopped,
        };
        sessions
            .heartbeat(session.id, input.progress_ms, state, self.session_ttl)
            .await?;
        self.playlists.heartbeat(session.id).await?;
        self.supervisor.session_heartbeat(session.id).await;

        match input.status {
            ClientStatus::Stopped => {
                self.supervisor.cancel_for_session(session.id).await;
                sessions.set_current(session.id, None, None).await?;
                Ok(self.stopped_output(cached_version, mismatch))
            }
            ClientStatus::Ended => self.advance(input, cached_version, mismatch).await,
            _ => {
                let item_id = input
                    .metadata_item_id
                    .or(session.current_metadata_item_id)
                    .ok_or(PlaybackRefusal::ItemNotFound)?;
                self.play_item(session.id, item_id, cached_version, mismatch, DecideAction::Play)
                    .await
            }
        }
    }

    /// End-of-item: consult the generator for what plays next.
    async fn advance(
        &self,
        input: DecideInput,
        version: i64,
        mismatch: bool,
    ) -> Result<DecideOutput> {
        let Some(generator) = self.db.playlists().get_by_session(input.session_id).await? else {
            // No generator: the single item simply ends.
            self.supervisor.cancel_for_session(input.session_id).await;
            return Ok(self.stopped_output(version, mismatch));
        };

        // The cursor may still sit on the item that just finished (the
        // client started it without consuming the generator); skip it.
        let mut next = self.playlists.next(&generator.public_id).await?;
        if let (Some(candidate), Some(current)) = (&next, input.current_item_id) {
            if candidate.metadata_item_id == current {
                next = self.playlists.next(&generator.public_id).await?;
            }
        }

        match next {
            Some(next) => {
                info!(
                    session = %input.session_id,
                    next_item = %next.metadata_item_id,
                    "Advancing to next playlist item"
                );
                self.play_item(
                    input.session_id,
                    next.metadata_item_id,
                    version,
                    mismatch,
                    DecideAction::Next,
                )
                .await
            }
            None => {
                debug!(session = %input.session_id, "Playlist exhausted");
                self.supervisor.cancel_for_session(input.session_id).await;
                Ok(self.stopped_output(version, mismatch))
            }
        }
    }

    async fn play_item(
        &self,
        session_id: Uuid,
        metadata_item_id: Uuid,
        version: i64,
        mismatch: bool,
        action: DecideAction,
    ) -> Result<DecideOutput> {
        let item = self
            .db
            .metadata_items()
            .get(metadata_item_id, false)
            .await?
            .ok_or(PlaybackRefusal::ItemNotFound)?;

        let profile = self
            .db
            .playback_sessions()
            .capability_profile(session_id)
            .await?
            .ok_or(PlaybackRefusal::SessionNotFound)?;

        let media_items = self.db.media().find_by_metadata_item(metadata_item_id).await?;
        let (_, part) = select_part(&media_items, &profile, &self.config)
            .ok_or(PlaybackRefusal::NoPlayableMedia)?;

        let decision = decide_part(part, &profile, &self.config);
        debug!(
            session = %session_id,
            part = %part.id,
            mode = ?decision.mode,
            reasons = decision.reasons.0,
            "Playback decision"
        );

        if decision.mode == DeliveryMode::Transcode {
            let target = decision.target.clone().context("transcode decision carries a target")?;
            let job = self
                .supervisor
                .start(session_id, part.clone(), target, None)
                .await?;
            debug_assert_ne!(job.state, TranscodeJobState::Failed);
        }

        self.db
            .playback_sessions()
            .set_current(session_id, Some(metadata_item_id), Some(part.id))
            .await?;

        let part_index = part.part_index.max(0) as u32;
        let trickplay_url = self
            .bif
            .exists(metadata_item_id, part_index)
            .then(|| format!("/api/v1/playback/part/{}/trickplay", part.id));

        let (next_item_id, next_item_title) = if action == DecideAction::Next {
            (Some(item.id), item.title.clone())
        } else {
            (None, None)
        };

        Ok(DecideOutput {
            action,
            stream_plan_json: Some(serde_json::to_string(&decision.plan)?),
            playback_url: Some(decision.playback_url),
            trickplay_url,
            next_item_id,
            next_item_title,
            capability_profile_version: version,
            capability_version_mismatch: mismatch,
        })
    }

    fn stopped_output(&self, version: i64, mismatch: bool) -> DecideOutput {
        DecideOutput {
            action: DecideAction::Stop,
            stream_plan_json: None,
            playback_url: None,
            trickplay_url: None,
            next_item_id: None,
            next_item_title: None,
            capability_profile_version: version,
            capability_version_mismatch: mismatch,
        }
    }
}
