//! Playlist generators and materialized items repository

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::model::{PlaylistGenerator, PlaylistGeneratorItem, PlaylistSeed};

use super::helpers::{from_json, str_to_uuid, str_to_uuid_opt, to_json, uuid_to_str};

fn format_ts(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

fn parse_ts(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).with_context(|| format!("bad timestamp '{s}'"))
}

pub struct PlaylistRepository {
    pool: SqlitePool,
}

impl PlaylistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, generator: &PlaylistGenerator) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO playlist_generators (
                id, public_id, session_id, seed, cursor, repeat, shuffle,
                shuffle_state, chunk_size, total_count, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(uuid_to_str(generator.id))
        .bind(&generator.public_id)
        .bind(uuid_to_str(generator.session_id))
        .bind(to_json(&generator.seed))
        .bind(generator.cursor)
        .bind(generator.repeat as i32)
        .bind(generator.shuffle as i32)
        .bind(&generator.shuffle_state)
        .bind(generator.chunk_size)
        .bind(generator.total_count)
        .bind(format_ts(generator.expires_at))
        .execute(&self.pool)
        .await
        .context("create playlist generator")?;
        Ok(())
    }

    pub async fn get_by_public_id(&self, public_id: &str) -> Result<Option<PlaylistGenerator>> {
        let row = sqlx::query(
            r#"
            SELECT id, public_id, session_id, seed, cursor, repeat, shuffle,
                   shuffle_state, chunk_size, total_count, expires_at
            FROM playlist_generators WHERE public_id = $1
            "#,
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_generator).transpose()
    }

    pub async fn get_by_session(&self, session_id: Uuid) -> Result<Option<PlaylistGenerator>> {
        let row = sqlx::query(
            r#"
            SELECT id, public_id, session_id, seed, cursor, repeat, shuffle,
                   shuffle_state, chunk_size, total_count, expires_at
            FROM playlist_generators WHERE session_id = $1
            "#,
        )
        .bind(uuid_to_str(session_id))
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_generator).transpose()
    }

    pub async fn update_cursor(&self, id: Uuid, cursor: i64) -> Result<()> {
        sqlx::query("UPDATE playlist_generators SET cursor = $2 WHERE id = $1")
            .bind(uuid_to_str(id))
            .bind(cursor)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_shuffle_state(
        &self,
        id: Uuid,
        shuffle_state: Option<&str>,
        total_count: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE playlist_generators SET shuffle_state = $2, total_count = $3 WHERE id = $1",
        )
        .bind(uuid_to_str(id))
        .bind(shuffle_state)
        .bind(total_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn extend_expiry(&self, id: Uuid, ttl: Duration) -> Result<()> {
        let expires = OffsetDateTime::now_utc() + ttl;
        sqlx::query("UPDATE playlist_generators SET expires_at = $2 WHERE id = $1")
            .bind(uuid_to_str(id))
            .bind(format_ts(expires))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a materialized chunk. Positions already materialized are left
    /// untouched.
    pub async fn insert_items(&self, items: &[PlaylistGeneratorItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO playlist_generator_items (
                    generator_id, metadata_item_id, media_item_id, media_part_id,
                    sort_order, served, cohort
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (generator_id, sort_order) DO NOTHING
                "#,
            )
            .bind(uuid_to_str(item.generator_id))
            .bind(uuid_to_str(item.metadata_item_id))
            .bind(item.media_item_id.map(uuid_to_str))
            .bind(item.media_part_id.map(uuid_to_str))
            .bind(item.sort_order)
            .bind(item.served as i32)
            .bind(&item.cohort)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Items in `[start, start + limit)` sort order.
    pub async fn items_range(
        &self,
        generator_id: Uuid,
        start: i64,
        limit: i64,
    ) -> Result<Vec<PlaylistGeneratorItem>> {
        let rows = sqlx::query(
            r#"
            SELECT generator_id, metadata_item_id, media_item_id, media_part_id,
                   sort_order, served, cohort
            FROM playlist_generator_items
            WHERE generator_id = $1 AND sort_order >= $2 AND sort_order < $3
            ORDER BY sort_order
            "#,
        )
        .bind(uuid_to_str(generator_id))
        .bind(start)
        .bind(start + limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_item).collect()
    }

    pub async fn mark_served(&self, generator_id: Uuid, sort_order: i64) -> Result<()> {
        sqlx::query(
            "UPDATE playlist_generator_items SET served = 1 \
             WHERE generator_id = $1 AND sort_order = $2",
        )
        .bind(uuid_to_str(generator_id))
        .bind(sort_order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Generators past expiry, for garbage collection.
    pub async fn list_expired(&self, now: OffsetDateTime) -> Result<Vec<PlaylistGenerator>> {
        let rows = sqlx::query(
            r#"
            SELECT id, public_id, session_id, seed, cursor, repeat, shuffle,
                   shuffle_state, chunk_size, total_count, expires_at
            FROM playlist_generators WHERE expires_at < $1
            "#,
        )
        .bind(format_ts(now))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_generator).collect()
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM playlist_generators WHERE id = $1")
            .bind(uuid_to_str(id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_generator(row: sqlx::sqlite::SqliteRow) -> Result<PlaylistGenerator> {
    let seed: PlaylistSeed = from_json(&row.get::<String, _>("seed"))?;
    Ok(PlaylistGenerator {
        id: str_to_uuid(&row.get::<String, _>("id"))?,
        public_id: row.get("public_id"),
        session_id: str_to_uuid(&row.get::<String, _>("session_id"))?,
        seed,
        cursor: row.get("cursor"),
        repeat: row.get::<i32, _>("repeat") != 0,
        shuffle: row.get::<i32, _>("shuffle") != 0,
        shuffle_state: row.get("shuffle_state"),
        chunk_size: row.get("chunk_size"),
        total_count: row.get("total_count"),
        expires_at: parse_ts(&row.get::<String, _>("expires_at"))?,
    })
}

fn row_to_item(row: sqlx::sqlite::SqliteRow) -> Result<PlaylistGeneratorItem> {
    Ok(PlaylistGeneratorItem {
        generator_id: str_to_uuid(&row.get::<String, _>("generator_id"))?,
        metadata_item_id: str_to_uuid(&row.get::<String, _>("metadata_item_id"))?,
        media_item_id: str_to_uuid_opt(row.get::<Option<String>, _>("media_item_id").as_deref())?,
        media_part_id: str_to_uuid_opt(row.get::<Option<String>, _>("media_part_id").as_deref())?,
        sort_order: row.get("sort_order"),
        served: row.get::<i32, _>("served") != 0,
        cohort: row.get("cohort"),
    })
}
