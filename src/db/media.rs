//! Media items / parts / streams repository

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::{HdrType, MediaItem, MediaPart, MediaStream, StreamType};

use super::helpers::{str_to_uuid, uuid_to_str};

/// Cached stat info for change detection: path -> (size, mtime).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartStat {
    pub size_bytes: i64,
    pub modified_at: Option<OffsetDateTime>,
}

fn hdr_to_str(h: Option<HdrType>) -> Option<&'static str> {
    h.map(|h| match h {
        HdrType::Hdr10 => "hdr10",
        HdrType::Hdr10Plus => "hdr10plus",
        HdrType::DolbyVision => "dolby_vision",
        HdrType::Hlg => "hlg",
    })
}

fn hdr_from_str(s: Option<&str>) -> Option<HdrType> {
    match s? {
        "hdr10" => Some(HdrType::Hdr10),
        "hdr10plus" => Some(HdrType::Hdr10Plus),
        "dolby_vision" => Some(HdrType::DolbyVision),
        "hlg" => Some(HdrType::Hlg),
        _ => None,
    }
}

fn stream_type_from_str(s: &str) -> Option<StreamType> {
    match s {
        "video" => Some(StreamType::Video),
        "audio" => Some(StreamType::Audio),
        "subtitle" => Some(StreamType::Subtitle),
        _ => None,
    }
}

fn format_ts(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

fn parse_ts_opt(s: Option<&str>) -> Option<OffsetDateTime> {
    s.and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

pub struct MediaRepository {
    pool: SqlitePool,
}

impl MediaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the media rendition of a metadata item wholesale. Keeps one
    /// media item per metadata item.
    pub async fn replace_for_metadata_item(&self, item: &MediaItem) -> Result<()> {
        sqlx::query("DELETE FROM media_items WHERE metadata_item_id = $1 AND id != $2")
            .bind(uuid_to_str(item.metadata_item_id))
            .bind(uuid_to_str(item.id))
            .execute(&self.pool)
            .await?;
        self.upsert(item).await
    }

    /// Insert or fully replace a media item with its parts and streams.
    pub async fn upsert(&self, item: &MediaItem) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM media_items WHERE id = $1")
            .bind(uuid_to_str(item.id))
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO media_items (
                id, metadata_item_id, container, video_codec, audio_codec,
                width, height, hdr_type, bitrate, duration_ms, file_size_bytes, is_disc_image
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(uuid_to_str(item.id))
        .bind(uuid_to_str(item.metadata_item_id))
        .bind(&item.container)
        .bind(&item.video_codec)
        .bind(&item.audio_codec)
        .bind(item.width)
        .bind(item.height)
        .bind(hdr_to_str(item.hdr_type))
        .bind(item.bitrate)
        .bind(item.duration_ms)
        .bind(item.file_size_bytes)
        .bind(item.is_disc_image as i32)
        .execute(&mut *tx)
        .await
        .context("insert media item")?;

        for part in &item.parts {
            sqlx::query(
                r#"
                INSERT INTO media_parts (
                    id, media_item_id, part_index, file_path, size_bytes,
                    modified_at, hash, duration_ms, container
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (file_path) DO UPDATE SET
                    media_item_id = excluded.media_item_id,
                    part_index = excluded.part_index,
                    size_bytes = excluded.size_bytes,
                    modified_at = excluded.modified_at,
                    hash = excluded.hash,
                    duration_ms = excluded.duration_ms,
                    container = excluded.container
                "#,
            )
            .bind(uuid_to_str(part.id))
            .bind(uuid_to_str(item.id))
            .bind(part.part_index)
            .bind(&part.file_path)
            .bind(part.size_bytes)
            .bind(part.modified_at.map(format_ts))
            .bind(&part.hash)
            .bind(part.duration_ms)
            .bind(&part.container)
            .execute(&mut *tx)
            .await
            .context("upsert media part")?;

            sqlx::query("DELETE FROM media_streams WHERE media_part_id = $1")
                .bind(uuid_to_str(part.id))
                .execute(&mut *tx)
                .await?;

            for stream in &part.streams {
                sqlx::query(
                    r#"
                    INSERT INTO media_streams (
                        id, media_part_id, stream_index, stream_type, codec, language, title,
                        width, height, profile, level, bit_depth, frame_rate, hdr_type,
                        channels, sample_rate, bitrate, is_default, is_forced
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                            $15, $16, $17, $18, $19)
                    "#,
                )
                .bind(uuid_to_str(stream.id))
                .bind(uuid_to_str(part.id))
                .bind(stream.index)
                .bind(stream.stream_type.as_str())
                .bind(&stream.codec)
                .bind(&stream.language)
                .bind(&stream.title)
                .bind(stream.width)
                .bind(stream.height)
                .bind(&stream.profile)
                .bind(stream.level)
                .bind(stream.bit_depth)
                .bind(stream.frame_rate)
                .bind(hdr_to_str(stream.hdr_type))
                .bind(stream.channels)
                .bind(stream.sample_rate)
                .bind(stream.bitrate)
                .bind(stream.is_default as i32)
                .bind(stream.is_forced as i32)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// All media items (with parts and streams) for a metadata item.
    pub async fn find_by_metadata_item(&self, metadata_item_id: Uuid) -> Result<Vec<MediaItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, metadata_item_id, container, video_codec, audio_codec,
                   width, height, hdr_type, bitrate, duration_ms, file_size_bytes, is_disc_image
            FROM media_items WHERE metadata_item_id = $1
            "#,
        )
        .bind(uuid_to_str(metadata_item_id))
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let mut item = MediaItem {
                id: str_to_uuid(&row.get::<String, _>("id"))?,
                metadata_item_id,
                container: row.get("container"),
                video_codec: row.get("video_codec"),
                audio_codec: row.get("audio_codec"),
                width: row.get("width"),
                height: row.get("height"),
                hdr_type: hdr_from_str(row.get::<Option<String>, _>("hdr_type").as_deref()),
                bitrate: row.get("bitrate"),
                duration_ms: row.get("duration_ms"),
                file_size_bytes: row.get("file_size_bytes"),
                is_disc_image: row.get::<i32, _>("is_disc_image") != 0,
                parts: Vec::new(),
            };
            item.parts = self.parts_of(item.id).await?;
            items.push(item);
        }
        Ok(items)
    }

    async fn parts_of(&self, media_item_id: Uuid) -> Result<Vec<MediaPart>> {
        let rows = sqlx::query(
            r#"
            SELECT id, media_item_id, part_index, file_path, size_bytes,
                   modified_at, hash, duration_ms, container
            FROM media_parts WHERE media_item_id = $1 ORDER BY part_index
            "#,
        )
        .bind(uuid_to_str(media_item_id))
        .fetch_all(&self.pool)
        .await?;

        let mut parts = Vec::with_capacity(rows.len());
        for row in rows {
            let id = str_to_uuid(&row.get::<String, _>("id"))?;
            parts.push(MediaPart {
                id,
                media_item_id,
                part_index: row.get("part_index"),
                file_path: row.get("file_path"),
                size_bytes: row.get("size_bytes"),
                modified_at: parse_ts_opt(row.get::<Option<String>, _>("modified_at").as_deref()),
                hash: row.get("hash"),
                duration_ms: row.get("duration_ms"),
                container: row.get("container"),
                streams: self.streams_of(id).await?,
            });
        }
        Ok(parts)
    }

    async fn streams_of(&self, part_id: Uuid) -> Result<Vec<MediaStream>> {
        let rows = sqlx::query(
            r#"
            SELECT id, media_part_id, stream_index, stream_type, codec, language, title,
                   width, height, profile, level, bit_depth, frame_rate, hdr_type,
                   channels, sample_rate, bitrate, is_default, is_forced
            FROM media_streams WHERE media_part_id = $1 ORDER BY stream_index
            "#,
        )
        .bind(uuid_to_str(part_id))
        .fetch_all(&self.pool)
        .await?;

        let mut streams = Vec::with_capacity(rows.len());
        for row in rows {
            let type_str: String = row.get("stream_type");
            let Some(stream_type) = stream_type_from_str(&type_str) else {
                continue;
            };
            streams.push(MediaStream {
                id: str_to_uuid(&row.get::<String, _>("id"))?,
                media_part_id: part_id,
                index: row.get("stream_index"),
                stream_type,
                codec: row.get("codec"),
                language: row.get("language"),
                title: row.get("title"),
                width: row.get("width"),
                height: row.get("height"),
                profile: row.get("profile"),
                level: row.get("level"),
                bit_depth: row.get("bit_depth"),
                frame_rate: row.get("frame_rate"),
                hdr_type: hdr_from_str(row.get::<Option<String>, _>("hdr_type").as_deref()),
                channels: row.get("channels"),
                sample_rate: row.get("sample_rate"),
                bitrate: row.get("bitrate"),
                is_default: row.get::<i32, _>("is_default") != 0,
                is_forced: row.get::<i32, _>("is_forced") != 0,
            });
        }
        Ok(streams)
    }

    /// One part by id, with streams.
    pub async fn get_part(&self, part_id: Uuid) -> Result<Option<MediaPart>> {
        let row = sqlx::query(
            r#"
            SELECT id, media_item_id, part_index, file_path, size_bytes,
                   modified_at, hash, duration_ms, container
            FROM media_parts WHERE id = $1
            "#,
        )
        .bind(uuid_to_str(part_id))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(MediaPart {
            id: part_id,
            media_item_id: str_to_uuid(&row.get::<String, _>("media_item_id"))?,
            part_index: row.get("part_index"),
            file_path: row.get("file_path"),
            size_bytes: row.get("size_bytes"),
            modified_at: parse_ts_opt(row.get::<Option<String>, _>("modified_at").as_deref()),
            hash: row.get("hash"),
            duration_ms: row.get("duration_ms"),
            container: row.get("container"),
            streams: self.streams_of(part_id).await?,
        }))
    }

    /// The metadata item owning the part at a path, for identity fallback
    /// when an item carries no external ids.
    pub async fn find_metadata_item_by_part_path(&self, path: &str) -> Result<Option<Uuid>> {
        let row: Option<String> = sqlx::query_scalar(
            r#"
            SELECT mi.metadata_item_id
            FROM media_parts mp
            JOIN media_items mi ON mi.id = mp.media_item_id
            WHERE mp.file_path = $1
            LIMIT 1
            "#,
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_deref().map(str_to_uuid).transpose()
    }

    /// Load the `path -> (size, mtime)` map for a whole library section.
    /// Loaded once per scan and cached by the change-detection stage.
    pub async fn part_stats_for_section(
        &self,
        section_id: Uuid,
    ) -> Result<HashMap<String, PartStat>> {
        let rows = sqlx::query(
            r#"
            SELECT mp.file_path, mp.size_bytes, mp.modified_at
            FROM media_parts mp
            JOIN media_items mi ON mi.id = mp.media_item_id
            JOIN metadata_items meta ON meta.id = mi.metadata_item_id
            WHERE meta.library_section_id = $1 AND meta.deleted_at IS NULL
            "#,
        )
        .bind(uuid_to_str(section_id))
        .fetch_all(&self.pool)
        .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            map.insert(
                row.get::<String, _>("file_path"),
                PartStat {
                    size_bytes: row.get("size_bytes"),
                    modified_at: parse_ts_opt(
                        row.get::<Option<String>, _>("modified_at").as_deref(),
                    ),
                },
            );
        }
        Ok(map)
    }

    /// Every known part path in a section, with its owning metadata item id.
    /// Drives orphan reconciliation.
    pub async fn part_paths_for_section(&self, section_id: Uuid) -> Result<Vec<(String, Uuid)>> {
        let rows = sqlx::query(
            r#"
            SELECT mp.file_path, meta.id AS metadata_item_id
            FROM media_parts mp
            JOIN media_items mi ON mi.id = mp.media_item_id
            JOIN metadata_items meta ON meta.id = mi.metadata_item_id
            WHERE meta.library_section_id = $1 AND meta.deleted_at IS NULL
            "#,
        )
        .bind(uuid_to_str(section_id))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok((
                    row.get::<String, _>("file_path"),
                    str_to_uuid(&row.get::<String, _>("metadata_item_id"))?,
                ))
            })
            .collect()
    }
}
