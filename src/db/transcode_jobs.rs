//! Transcode jobs repository
//!
//! The supervisor owns the live process table; rows here are the durable
//! record used for reaping after restarts and for progress reporting.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::{TranscodeJob, TranscodeJobState, TranscodeTarget};

use super::helpers::{from_json, str_to_uuid, to_json, uuid_to_str};

fn format_ts(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

fn parse_ts(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).with_context(|| format!("bad timestamp '{s}'"))
}

pub struct TranscodeJobRepository {
    pool: SqlitePool,
}

impl TranscodeJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, job: &TranscodeJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transcode_jobs (
                id, session_id, media_part_id, state, progress_percent, output_dir,
                seek_offset_ms, target, error_message, last_ping_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            "#,
        )
        .bind(uuid_to_str(job.id))
        .bind(uuid_to_str(job.session_id))
        .bind(uuid_to_str(job.media_part_id))
        .bind(job.state.as_str())
        .bind(job.progress_percent)
        .bind(&job.output_dir)
        .bind(job.seek_offset_ms)
        .bind(to_json(&job.target))
        .bind(&job.error_message)
        .bind(format_ts(job.last_ping_at))
        .bind(format_ts(job.created_at))
        .execute(&self.pool)
        .await
        .context("insert transcode job")?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<TranscodeJob>> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, media_part_id, state, progress_percent, output_dir,
                   seek_offset_ms, target, error_message, last_ping_at, created_at, updated_at
            FROM transcode_jobs WHERE id = $1
            "#,
        )
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    pub async fn update_state(
        &self,
        id: Uuid,
        state: TranscodeJobState,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = format_ts(OffsetDateTime::now_utc());
        sqlx::query(
            "UPDATE transcode_jobs SET state = $2, error_message = $3, updated_at = $4 \
             WHERE id = $1",
        )
        .bind(uuid_to_str(id))
        .bind(state.as_str())
        .bind(error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_progress(&self, id: Uuid, progress_percent: f64) -> Result<()> {
        let now = format_ts(OffsetDateTime::now_utc());
        sqlx::query(
            "UPDATE transcode_jobs SET progress_percent = $2, last_ping_at = $3, updated_at = $3 \
             WHERE id = $1",
        )
        .bind(uuid_to_str(id))
        .bind(progress_percent)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn heartbeat(&self, id: Uuid) -> Result<()> {
        let now = format_ts(OffsetDateTime::now_utc());
        sqlx::query("UPDATE transcode_jobs SET last_ping_at = $2, updated_at = $2 WHERE id = $1")
            .bind(uuid_to_str(id))
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The single Running/Pending job for a `(session, part)` pair, if any.
    pub async fn find_active(
        &self,
        session_id: Uuid,
        media_part_id: Uuid,
    ) -> Result<Option<TranscodeJob>> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, media_part_id, state, progress_percent, output_dir,
                   seek_offset_ms, target, error_message, last_ping_at, created_at, updated_at
            FROM transcode_jobs
            WHERE session_id = $1 AND media_part_id = $2 AND state IN ('pending', 'running')
            LIMIT 1
            "#,
        )
        .bind(uuid_to_str(session_id))
        .bind(uuid_to_str(media_part_id))
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    /// All non-terminal jobs, for the supervisor tick.
    pub async fn list_active(&self) -> Result<Vec<TranscodeJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, media_part_id, state, progress_percent, output_dir,
                   seek_offset_ms, target, error_message, last_ping_at, created_at, updated_at
            FROM transcode_jobs WHERE state IN ('pending', 'running')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_job).collect()
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM transcode_jobs WHERE id = $1")
            .bind(uuid_to_str(id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<TranscodeJob> {
    let state_str: String = row.get("state");
    let target: TranscodeTarget = from_json(&row.get::<String, _>("target"))?;
    Ok(TranscodeJob {
        id: str_to_uuid(&row.get::<String, _>("id"))?,
        session_id: str_to_uuid(&row.get::<String, _>("session_id"))?,
        media_part_id: str_to_uuid(&row.get::<String, _>("media_part_id"))?,
        state: TranscodeJobState::from_str(&state_str)
            .with_context(|| format!("unknown transcode state '{state_str}'"))?,
        progress_percent: row.get("progress_percent"),
        output_dir: row.get("output_dir"),
        seek_offset_ms: row.get("seek_offset_ms"),
        target,
        error_message: row.get("error_message"),
        last_ping_at: parse_ts(&row.get::<String, _>("last_ping_at"))?,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}
