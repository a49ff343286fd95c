//! Library scan repository
//!
//! Scan rows carry the resume cursor and a monotonic checkpoint version.
//! Checkpoint writes are conditional single-row updates: a writer holding a
//! stale version fails fast instead of clobbering a newer checkpoint.

use anyhow::{Context, Result, bail};
use sqlx::{Row, SqlitePool};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::{LibraryScan, ResumeCursor, ScanStatus};

use super::helpers::{str_to_uuid, uuid_to_str};

fn format_ts(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

fn parse_ts(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).with_context(|| format!("bad timestamp '{s}'"))
}

/// Error raised when a checkpoint write loses the version race.
#[derive(Debug, thiserror::Error)]
#[error("checkpoint conflict for scan {scan_id}: version {expected} is stale")]
pub struct CheckpointConflict {
    pub scan_id: Uuid,
    pub expected: i64,
}

pub struct ScanRepository {
    pool: SqlitePool,
}

impl ScanRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new scan row in `Running` state.
    pub async fn create(&self, section_id: Uuid) -> Result<LibraryScan> {
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            r#"
            INSERT INTO library_scans (id, library_section_id, status, started_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(uuid_to_str(section_id))
        .bind(ScanStatus::Running.as_str())
        .bind(format_ts(now))
        .execute(&self.pool)
        .await
        .context("create scan")?;

        Ok(LibraryScan {
            id,
            library_section_id: section_id,
            status: ScanStatus::Running,
            items_seen: 0,
            items_created: 0,
            items_updated: 0,
            items_unchanged: 0,
            resume: None,
            checkpoint_version: 0,
            checkpointed_at: None,
            started_at: now,
            finished_at: None,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<LibraryScan>> {
        let row = sqlx::query(
            r#"
            SELECT id, library_section_id, status, items_seen, items_created,
                   items_updated, items_unchanged, resume_stage, resume_cursor,
                   checkpoint_version, checkpointed_at, started_at, finished_at
            FROM library_scans WHERE id = $1
            "#,
        )
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_scan).transpose()
    }

    /// Latest non-terminal scan for a section, used to resume after restart.
    pub async fn find_resumable(&self, section_id: Uuid) -> Result<Option<LibraryScan>> {
        let row = sqlx::query(
            r#"
            SELECT id, library_section_id, status, items_seen, items_created,
                   items_updated, items_unchanged, resume_stage, resume_cursor,
                   checkpoint_version, checkpointed_at, started_at, finished_at
            FROM library_scans
            WHERE library_section_id = $1 AND status = 'running' AND resume_stage IS NOT NULL
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(uuid_to_str(section_id))
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_scan).transpose()
    }

    /// Write a checkpoint, guarded by the caller's known version. The write
    /// succeeds only if the stored version still matches; the version is
    /// incremented atomically with the cursor update. Returns the new
    /// version.
    pub async fn checkpoint(
        &self,
        scan_id: Uuid,
        expected_version: i64,
        cursor: &ResumeCursor,
    ) -> Result<i64> {
        let now = OffsetDateTime::now_utc();
        let result = sqlx::query(
            r#"
            UPDATE library_scans SET
                resume_stage = $3,
                resume_cursor = $4,
                checkpoint_version = checkpoint_version + 1,
                checkpointed_at = $5
            WHERE id = $1 AND checkpoint_version = $2
            "#,
        )
        .bind(uuid_to_str(scan_id))
        .bind(expected_version)
        .bind(&cursor.stage)
        .bind(&cursor.cursor)
        .bind(format_ts(now))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CheckpointConflict { scan_id, expected: expected_version }.into());
        }
        Ok(expected_version + 1)
    }

    /// Clear the resume cursor once fast-forward has caught up.
    pub async fn clear_resume(&self, scan_id: Uuid, expected_version: i64) -> Result<i64> {
        let result = sqlx::query(
            r#"
            UPDATE library_scans SET
                resume_stage = NULL,
                resume_cursor = NULL,
                checkpoint_version = checkpoint_version + 1
            WHERE id = $1 AND checkpoint_version = $2
            "#,
        )
        .bind(uuid_to_str(scan_id))
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CheckpointConflict { scan_id, expected: expected_version }.into());
        }
        Ok(expected_version + 1)
    }

    /// Bulk-record seen paths, deduplicated by `(scan_id, file_path)`.
    pub async fn record_seen_paths(&self, scan_id: Uuid, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for path in paths {
            sqlx::query(
                r#"
                INSERT INTO scan_seen_paths (scan_id, file_path)
                VALUES ($1, $2)
                ON CONFLICT (scan_id, file_path) DO NOTHING
                "#,
            )
            .bind(uuid_to_str(scan_id))
            .bind(path)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// All paths seen by a scan.
    pub async fn seen_paths(&self, scan_id: Uuid) -> Result<Vec<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT file_path FROM scan_seen_paths WHERE scan_id = $1")
                .bind(uuid_to_str(scan_id))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Update run counters.
    pub async fn update_counters(
        &self,
        scan_id: Uuid,
        seen: i64,
        created: i64,
        updated: i64,
        unchanged: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE library_scans SET
                items_seen = $2, items_created = $3, items_updated = $4, items_unchanged = $5
            WHERE id = $1
            "#,
        )
        .bind(uuid_to_str(scan_id))
        .bind(seen)
        .bind(created)
        .bind(updated)
        .bind(unchanged)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition the scan to a terminal status.
    pub async fn finish(&self, scan_id: Uuid, status: ScanStatus) -> Result<()> {
        if !status.is_terminal() {
            bail!("finish called with non-terminal status {}", status.as_str());
        }
        let now = OffsetDateTime::now_utc();
        sqlx::query("UPDATE library_scans SET status = $2, finished_at = $3 WHERE id = $1")
            .bind(uuid_to_str(scan_id))
            .bind(status.as_str())
            .bind(format_ts(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_scan(row: sqlx::sqlite::SqliteRow) -> Result<LibraryScan> {
    let status_str: String = row.get("status");
    let status = ScanStatus::from_str(&status_str)
        .with_context(|| format!("unknown scan status '{status_str}'"))?;
    let resume = match (
        row.get::<Option<String>, _>("resume_stage"),
        row.get::<Option<String>, _>("resume_cursor"),
    ) {
        (Some(stage), Some(cursor)) => Some(ResumeCursor { stage, cursor }),
        _ => None,
    };
    Ok(LibraryScan {
        id: str_to_uuid(&row.get::<String, _>("id"))?,
        library_section_id: str_to_uuid(&row.get::<String, _>("library_section_id"))?,
        status,
        items_seen: row.get("items_seen"),
        items_created: row.get("items_created"),
        items_updated: row.get("items_updated"),
        items_unchanged: row.get("items_unchanged"),
        resume,
        checkpoint_version: row.get("checkpoint_version"),
        checkpointed_at: row
            .get::<Option<String>, _>("checkpointed_at")
            .as_deref()
            .map(parse_ts)
            .transpose()?,
        started_at: parse_ts(&row.get::<String, _>("started_at"))?,
        finished_at: row
            .get::<Option<String>, _>("finished_at")
            .as_deref()
            .map(parse_ts)
            .transpose()?,
    })
}
