//! Playback sessions repository
//!
//! Sessions are heartbeat-extended; expiry gates both transcode reaping and
//! playlist generator garbage collection.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::model::capability::CapabilityProfile;
use crate::model::{PlaybackSession, PlaybackState};

use super::helpers::{from_json_opt, str_to_uuid, str_to_uuid_opt, to_json, uuid_to_str};

fn format_ts(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

fn parse_ts(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).with_context(|| format!("bad timestamp '{s}'"))
}

pub struct PlaybackSessionRepository {
    pool: SqlitePool,
}

impl PlaybackSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a session with the given capability profile and time-to-live.
    pub async fn create(
        &self,
        user_session: &str,
        profile: &CapabilityProfile,
        ttl: Duration,
    ) -> Result<PlaybackSession> {
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let expires_at = now + ttl;

        sqlx::query(
            r#"
            INSERT INTO playback_sessions (
                id, user_session, capability_profile, capability_version,
                playhead_ms, state, last_heartbeat_at, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 0, 'stopped', $5, $6, $5, $5)
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(user_session)
        .bind(to_json(profile))
        .bind(profile.version)
        .bind(format_ts(now))
        .bind(format_ts(expires_at))
        .execute(&self.pool)
        .await
        .context("create playback session")?;

        Ok(PlaybackSession {
            id,
            user_session: user_session.to_string(),
            capability_version: profile.version,
            current_metadata_item_id: None,
            current_media_part_id: None,
            playhead_ms: 0,
            state: PlaybackState::Stopped,
            last_heartbeat_at: now,
            expires_at,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<PlaybackSession>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_session, capability_version, current_metadata_item_id,
                   current_media_part_id, playhead_ms, state, last_heartbeat_at,
                   expires_at, created_at, updated_at
            FROM playback_sessions WHERE id = $1
            "#,
        )
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_session).transpose()
    }

    /// The cached capability profile for a session.
    pub async fn capability_profile(&self, id: Uuid) -> Result<Option<CapabilityProfile>> {
        let raw: Option<Option<String>> = sqlx::query_scalar(
            "SELECT capability_profile FROM playback_sessions WHERE id = $1",
        )
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;
        from_json_opt(raw.flatten().as_deref())
    }

    /// Replace the cached capability profile (client re-issued with a newer
    /// version).
    pub async fn update_capability_profile(
        &self,
        id: Uuid,
        profile: &CapabilityProfile,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE playback_sessions SET capability_profile = $2, capability_version = $3, \
             updated_at = $4 WHERE id = $1",
        )
        .bind(uuid_to_str(id))
        .bind(to_json(profile))
        .bind(profile.version)
        .bind(format_ts(OffsetDateTime::now_utc()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a heartbeat: playhead, state, and expiry extension.
    pub async fn heartbeat(
        &self,
        id: Uuid,
        playhead_ms: i64,
        state: PlaybackState,
        ttl: Duration,
    ) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            r#"
            UPDATE playback_sessions SET
                playhead_ms = $2, state = $3, last_heartbeat_at = $4,
                expires_at = $5, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(playhead_ms)
        .bind(state.as_str())
        .bind(format_ts(now))
        .bind(format_ts(now + ttl))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Point the session at its currently playing item/part.
    pub async fn set_current(
        &self,
        id: Uuid,
        metadata_item_id: Option<Uuid>,
        media_part_id: Option<Uuid>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE playback_sessions SET
                current_metadata_item_id = $2, current_media_part_id = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(metadata_item_id.map(uuid_to_str))
        .bind(media_part_id.map(uuid_to_str))
        .bind(format_ts(OffsetDateTime::now_utc()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sessions past their expiry.
    pub async fn list_expired(&self, now: OffsetDateTime) -> Result<Vec<PlaybackSession>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_session, capability_version, current_metadata_item_id,
                   current_media_part_id, playhead_ms, state, last_heartbeat_at,
                   expires_at, created_at, updated_at
            FROM playback_sessions WHERE expires_at < $1
            "#,
        )
        .bind(format_ts(now))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_session).collect()
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM playback_sessions WHERE id = $1")
            .bind(uuid_to_str(id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_session(row: sqlx::sqlite::SqliteRow) -> Result<PlaybackSession> {
    let state_str: String = row.get("state");
    Ok(PlaybackSession {
        id: str_to_uuid(&row.get::<String, _>("id"))?,
        user_session: row.get("user_session"),
        capability_version: row.get("capability_version"),
        current_metadata_item_id: str_to_uuid_opt(
            row.get::<Option<String>, _>("current_metadata_item_id").as_deref(),
        )?,
        current_media_part_id: str_to_uuid_opt(
            row.get::<Option<String>, _>("current_media_part_id").as_deref(),
        )?,
        playhead_ms: row.get("playhead_ms"),
        state: PlaybackState::from_str(&state_str)
            .with_context(|| format!("unknown playback state '{state_str}'"))?,
        last_heartbeat_at: parse_ts(&row.get::<String, _>("last_heartbeat_at"))?,
        expires_at: parse_ts(&row.get::<String, _>("expires_at"))?,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}
