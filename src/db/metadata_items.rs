//! Metadata items repository
//!
//! Persists the central metadata graph node. Collections (locked fields,
//! custom fields, genres, tags, credits, child order) are JSON columns;
//! external ids and relations live in side tables so uniqueness and joins
//! stay queryable.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, bail};
use sqlx::{Row, SqlitePool};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::model::{
    ArtworkRef, ArtworkSet, Credit, CustomValue, ExternalId, ItemKind, MetadataItem, Relation,
    RelationKind, ReleaseDate,
};

use super::helpers::{from_json_or_default, str_to_uuid, str_to_uuid_opt, to_json, uuid_to_str};

/// Raw row shape for `metadata_items`.
#[derive(Debug, sqlx::FromRow)]
struct MetadataItemRow {
    id: String,
    kind: i32,
    title: Option<String>,
    sort_title: Option<String>,
    original_title: Option<String>,
    summary: Option<String>,
    tagline: Option<String>,
    content_rating: Option<String>,
    content_rating_age: Option<i32>,
    release_date: Option<String>,
    year: Option<i32>,
    index_number: Option<i32>,
    absolute_index: Option<i32>,
    duration_ms: Option<i64>,
    poster_uri: Option<String>,
    poster_hash: Option<String>,
    backdrop_uri: Option<String>,
    backdrop_hash: Option<String>,
    thumb_uri: Option<String>,
    thumb_hash: Option<String>,
    parent_id: Option<String>,
    library_section_id: Option<String>,
    deleted_at: Option<String>,
    created_at: String,
    updated_at: String,
    locked_fields: String,
    extra_fields: String,
    genres: String,
    tags: String,
    credits: String,
    child_order: String,
}

const ITEM_COLUMNS: &str = "id, kind, title, sort_title, original_title, summary, tagline, \
     content_rating, content_rating_age, release_date, year, index_number, absolute_index, \
     duration_ms, poster_uri, poster_hash, backdrop_uri, backdrop_hash, thumb_uri, thumb_hash, \
     parent_id, library_section_id, deleted_at, created_at, updated_at, locked_fields, \
     extra_fields, genres, tags, credits, child_order";

fn parse_ts(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).with_context(|| format!("bad timestamp '{s}'"))
}

fn format_ts(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.to_string())
}

fn parse_date(s: &str) -> Result<Date> {
    let fmt = time::macros::format_description!("[year]-[month]-[day]");
    Date::parse(s, &fmt).with_context(|| format!("bad date '{s}'"))
}

fn format_date(d: Date) -> String {
    let fmt = time::macros::format_description!("[year]-[month]-[day]");
    d.format(&fmt).unwrap_or_else(|_| d.to_string())
}

impl MetadataItemRow {
    fn into_item(self) -> Result<MetadataItem> {
        let kind = ItemKind::from_ordinal(self.kind)
            .with_context(|| format!("unknown item kind ordinal {}", self.kind))?;
        let locked_fields: BTreeSet<String> = from_json_or_default(Some(self.locked_fields.as_str()));
        let extra_fields: BTreeMap<String, CustomValue> =
            from_json_or_default(Some(self.extra_fields.as_str()));
        let genres: BTreeSet<String> = from_json_or_default(Some(self.genres.as_str()));
        let tags: BTreeSet<String> = from_json_or_default(Some(self.tags.as_str()));
        let credits: BTreeSet<Credit> = from_json_or_default(Some(self.credits.as_str()));
        let child_order: Vec<String> = from_json_or_default(Some(self.child_order.as_str()));

        Ok(MetadataItem {
            id: str_to_uuid(&self.id)?,
            kind,
            title: self.title,
            sort_title: self.sort_title,
            original_title: self.original_title,
            summary: self.summary,
            tagline: self.tagline,
            content_rating: self.content_rating,
            content_rating_age: self.content_rating_age,
            release_date: self
                .release_date
                .as_deref()
                .map(parse_date)
                .transpose()?
                .map(ReleaseDate),
            year: self.year,
            index_number: self.index_number,
            absolute_index: self.absolute_index,
            duration_ms: self.duration_ms,
            artwork: ArtworkSet {
                poster: ArtworkRef { uri: self.poster_uri, placeholder_hash: self.poster_hash },
                backdrop: ArtworkRef {
                    uri: self.backdrop_uri,
                    placeholder_hash: self.backdrop_hash,
                },
                thumb: ArtworkRef { uri: self.thumb_uri, placeholder_hash: self.thumb_hash },
            },
            parent_id: str_to_uuid_opt(self.parent_id.as_deref())?,
            library_section_id: str_to_uuid_opt(self.library_section_id.as_deref())?,
            deleted_at: self.deleted_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            locked_fields,
            extra_fields,
            external_ids: BTreeSet::new(),
            genres,
            tags,
            credits,
            relations_out: Vec::new(),
            relations_in: Vec::new(),
            children: child_order
                .iter()
                .map(|s| str_to_uuid(s))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

pub struct MetadataItemRepository {
    pool: SqlitePool,
}

impl MetadataItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new item together with its external ids and relations.
    pub async fn insert(&self, item: &MetadataItem) -> Result<MetadataItem> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO metadata_items (
                id, kind, title, sort_title, original_title, summary, tagline,
                content_rating, content_rating_age, release_date, year,
                index_number, absolute_index, duration_ms,
                poster_uri, poster_hash, backdrop_uri, backdrop_hash, thumb_uri, thumb_hash,
                parent_id, library_section_id, deleted_at, created_at, updated_at,
                locked_fields, extra_fields, genres, tags, credits, child_order
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25,
                    $26, $27, $28, $29, $30, $31)
            "#,
        )
        .bind(uuid_to_str(item.id))
        .bind(item.kind.ordinal())
        .bind(&item.title)
        .bind(&item.sort_title)
        .bind(&item.original_title)
        .bind(&item.summary)
        .bind(&item.tagline)
        .bind(&item.content_rating)
        .bind(item.content_rating_age)
        .bind(item.release_date.map(|d| format_date(d.0)))
        .bind(item.year)
        .bind(item.index_number)
        .bind(item.absolute_index)
        .bind(item.duration_ms)
        .bind(&item.artwork.poster.uri)
        .bind(&item.artwork.poster.placeholder_hash)
        .bind(&item.artwork.backdrop.uri)
        .bind(&item.artwork.backdrop.placeholder_hash)
        .bind(&item.artwork.thumb.uri)
        .bind(&item.artwork.thumb.placeholder_hash)
        .bind(item.parent_id.map(uuid_to_str))
        .bind(item.library_section_id.map(uuid_to_str))
        .bind(item.deleted_at.map(format_ts))
        .bind(format_ts(now))
        .bind(format_ts(now))
        .bind(to_json(&item.locked_fields))
        .bind(to_json(&item.extra_fields))
        .bind(to_json(&item.genres))
        .bind(to_json(&item.tags))
        .bind(to_json(&item.credits))
        .bind(to_json(
            &item.children.iter().map(|u| u.to_string()).collect::<Vec<_>>(),
        ))
        .execute(&mut *tx)
        .await
        .context("insert metadata item")?;

        for ext in &item.external_ids {
            sqlx::query(
                r#"
                INSERT INTO external_ids (metadata_item_id, library_section_id, kind, provider, value)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (metadata_item_id, provider) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(uuid_to_str(item.id))
            .bind(item.library_section_id.map(uuid_to_str))
            .bind(item.kind.ordinal())
            .bind(&ext.provider)
            .bind(&ext.value)
            .execute(&mut *tx)
            .await
            .context("insert external id")?;
        }

        for rel in &item.relations_out {
            sqlx::query(
                r#"
                INSERT INTO item_relations (kind, from_id, to_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (kind, from_id, to_id) DO NOTHING
                "#,
            )
            .bind(rel.kind.as_str())
            .bind(uuid_to_str(rel.from_id))
            .bind(uuid_to_str(rel.to_id))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut created = item.clone();
        created.created_at = now;
        created.updated_at = now;
        Ok(created)
    }

    /// Update an existing item. The kind is immutable; a changed kind is a
    /// caller bug and is rejected.
    pub async fn update(&self, item: &MetadataItem) -> Result<()> {
        let existing_kind: Option<i32> =
            sqlx::query_scalar("SELECT kind FROM metadata_items WHERE id = $1")
                .bind(uuid_to_str(item.id))
                .fetch_optional(&self.pool)
                .await?;
        match existing_kind {
            None => bail!("metadata item {} does not exist", item.id),
            Some(k) if k != item.kind.ordinal() => {
                bail!(
                    "metadata item {} kind change rejected ({} -> {})",
                    item.id,
                    k,
                    item.kind.ordinal()
                );
            }
            Some(_) => {}
        }

        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE metadata_items SET
                title = $2, sort_title = $3, original_title = $4, summary = $5, tagline = $6,
                content_rating = $7, content_rating_age = $8, release_date = $9, year = $10,
                index_number = $11, absolute_index = $12, duration_ms = $13,
                poster_uri = $14, poster_hash = $15, backdrop_uri = $16, backdrop_hash = $17,
                thumb_uri = $18, thumb_hash = $19,
                parent_id = $20, library_section_id = $21, deleted_at = $22, updated_at = $23,
                locked_fields = $24, extra_fields = $25, genres = $26, tags = $27,
                credits = $28, child_order = $29
            WHERE id = $1
            "#,
        )
        .bind(uuid_to_str(item.id))
        .bind(&item.title)
        .bind(&item.sort_title)
        .bind(&item.original_title)
        .bind(&item.summary)
        .bind(&item.tagline)
        .bind(&item.content_rating)
        .bind(item.content_rating_age)
        .bind(item.release_date.map(|d| format_date(d.0)))
        .bind(item.year)
        .bind(item.index_number)
        .bind(item.absolute_index)
        .bind(item.duration_ms)
        .bind(&item.artwork.poster.uri)
        .bind(&item.artwork.poster.placeholder_hash)
        .bind(&item.artwork.backdrop.uri)
        .bind(&item.artwork.backdrop.placeholder_hash)
        .bind(&item.artwork.thumb.uri)
        .bind(&item.artwork.thumb.placeholder_hash)
        .bind(item.parent_id.map(uuid_to_str))
        .bind(item.library_section_id.map(uuid_to_str))
        .bind(item.deleted_at.map(format_ts))
        .bind(format_ts(now))
        .bind(to_json(&item.locked_fields))
        .bind(to_json(&item.extra_fields))
        .bind(to_json(&item.genres))
        .bind(to_json(&item.tags))
        .bind(to_json(&item.credits))
        .bind(to_json(
            &item.children.iter().map(|u| u.to_string()).collect::<Vec<_>>(),
        ))
        .execute(&mut *tx)
        .await?;

        for ext in &item.external_ids {
            sqlx::query(
                r#"
                INSERT INTO external_ids (metadata_item_id, library_section_id, kind, provider, value)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (metadata_item_id, provider) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(uuid_to_str(item.id))
            .bind(item.library_section_id.map(uuid_to_str))
            .bind(item.kind.ordinal())
            .bind(&ext.provider)
            .bind(&ext.value)
            .execute(&mut *tx)
            .await?;
        }

        for rel in &item.relations_out {
            sqlx::query(
                r#"
                INSERT INTO item_relations (kind, from_id, to_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (kind, from_id, to_id) DO NOTHING
                "#,
            )
            .bind(rel.kind.as_str())
            .bind(uuid_to_str(rel.from_id))
            .bind(uuid_to_str(rel.to_id))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fetch one item, hydrating external ids and relations.
    pub async fn get(&self, id: Uuid, include_deleted: bool) -> Result<Option<MetadataItem>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM metadata_items WHERE id = $1{}",
            if include_deleted { "" } else { " AND deleted_at IS NULL" }
        );
        let row = sqlx::query_as::<_, MetadataItemRow>(&query)
            .bind(uuid_to_str(id))
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let mut item = row.into_item()?;
        self.hydrate(&mut item).await?;
        Ok(Some(item))
    }

    async fn hydrate(&self, item: &mut MetadataItem) -> Result<()> {
        let ext_rows = sqlx::query(
            "SELECT provider, value FROM external_ids WHERE metadata_item_id = $1",
        )
        .bind(uuid_to_str(item.id))
        .fetch_all(&self.pool)
        .await?;
        item.external_ids = ext_rows
            .into_iter()
            .map(|r| ExternalId::new(r.get::<String, _>("provider"), r.get::<String, _>("value")))
            .collect();

        let rel_rows = sqlx::query(
            "SELECT kind, from_id, to_id FROM item_relations WHERE from_id = $1 OR to_id = $1",
        )
        .bind(uuid_to_str(item.id))
        .fetch_all(&self.pool)
        .await?;
        item.relations_out.clear();
        item.relations_in.clear();
        for r in rel_rows {
            let kind_str: String = r.get("kind");
            let Some(kind) = relation_kind_from_str(&kind_str) else {
                continue;
            };
            let rel = Relation {
                kind,
                from_id: str_to_uuid(&r.get::<String, _>("from_id"))?,
                to_id: str_to_uuid(&r.get::<String, _>("to_id"))?,
            };
            if rel.from_id == item.id {
                item.relations_out.push(rel);
            } else {
                item.relations_in.push(rel);
            }
        }
        Ok(())
    }

    /// Ordered children of a parent.
    pub async fn children_of(&self, parent_id: Uuid) -> Result<Vec<MetadataItem>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM metadata_items \
             WHERE parent_id = $1 AND deleted_at IS NULL \
             ORDER BY index_number, title, id"
        );
        let rows = sqlx::query_as::<_, MetadataItemRow>(&query)
            .bind(uuid_to_str(parent_id))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| r.into_item()).collect()
    }

    /// List items in a section, optionally filtered by kind.
    pub async fn list_by_section(
        &self,
        section_id: Uuid,
        kind: Option<ItemKind>,
        include_deleted: bool,
    ) -> Result<Vec<MetadataItem>> {
        let mut query = format!(
            "SELECT {ITEM_COLUMNS} FROM metadata_items WHERE library_section_id = $1"
        );
        if !include_deleted {
            query.push_str(" AND deleted_at IS NULL");
        }
        if kind.is_some() {
            query.push_str(" AND kind = $2");
        }
        // Trailing id keeps the order total: playlist ordering and the
        // stable shuffle re-evaluate this listing and must see the same
        // sequence every time.
        query.push_str(" ORDER BY sort_title, title, id");

        let mut q = sqlx::query_as::<_, MetadataItemRow>(&query).bind(uuid_to_str(section_id));
        if let Some(k) = kind {
            q = q.bind(k.ordinal());
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| r.into_item()).collect()
    }

    /// Find an item id by external identity within a section.
    pub async fn find_by_external_id(
        &self,
        section_id: Option<Uuid>,
        kind: ItemKind,
        provider: &str,
        value: &str,
    ) -> Result<Option<Uuid>> {
        let row: Option<String> = sqlx::query_scalar(
            r#"
            SELECT mi.id FROM metadata_items mi
            JOIN external_ids ei ON ei.metadata_item_id = mi.id
            WHERE ei.kind = $1 AND ei.provider = $2 AND ei.value = $3
              AND (ei.library_section_id IS $4)
              AND mi.deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(kind.ordinal())
        .bind(provider)
        .bind(value)
        .bind(section_id.map(uuid_to_str))
        .fetch_optional(&self.pool)
        .await?;

        row.as_deref().map(str_to_uuid).transpose()
    }

    /// Identity fallback for container items (shows, seasons, albums) that
    /// carry neither external ids nor media parts: match on section, kind,
    /// parent and title.
    pub async fn find_by_structure(
        &self,
        section_id: Option<Uuid>,
        kind: ItemKind,
        parent_id: Option<Uuid>,
        title: &str,
    ) -> Result<Option<Uuid>> {
        let row: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM metadata_items
            WHERE library_section_id IS $1 AND kind = $2 AND parent_id IS $3 AND title = $4
            LIMIT 1
            "#,
        )
        .bind(section_id.map(uuid_to_str))
        .bind(kind.ordinal())
        .bind(parent_id.map(uuid_to_str))
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        row.as_deref().map(str_to_uuid).transpose()
    }

    /// Soft-delete the given items.
    pub async fn soft_delete(&self, ids: &[Uuid], at: OffsetDateTime) -> Result<u64> {
        let mut deleted = 0;
        for chunk in ids.chunks(100) {
            let placeholders: Vec<String> =
                (0..chunk.len()).map(|i| format!("${}", i + 2)).collect();
            let query = format!(
                "UPDATE metadata_items SET deleted_at = $1, updated_at = $1 \
                 WHERE deleted_at IS NULL AND id IN ({})",
                placeholders.join(", ")
            );
            let mut q = sqlx::query(&query).bind(format_ts(at));
            for id in chunk {
                q = q.bind(uuid_to_str(*id));
            }
            deleted += q.execute(&self.pool).await?.rows_affected();
        }
        Ok(deleted)
    }

    /// Hard-delete soft-deleted rows older than the cutoff (explicit vacuum).
    pub async fn vacuum_deleted_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM metadata_items WHERE deleted_at IS NOT NULL AND deleted_at < $1",
        )
        .bind(format_ts(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Rewrite the ordered child list of a parent.
    pub async fn update_child_order(&self, id: Uuid, children: &[Uuid]) -> Result<()> {
        sqlx::query("UPDATE metadata_items SET child_order = $2 WHERE id = $1")
            .bind(uuid_to_str(id))
            .bind(to_json(
                &children.iter().map(|u| u.to_string()).collect::<Vec<_>>(),
            ))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Clear the soft-delete marker (a part reappeared before the vacuum).
    pub async fn undelete(&self, id: Uuid) -> Result<()> {
        let now = format_ts(OffsetDateTime::now_utc());
        sqlx::query(
            "UPDATE metadata_items SET deleted_at = NULL, updated_at = $2 WHERE id = $1",
        )
        .bind(uuid_to_str(id))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Locked field names of a persisted item, for overlay skipping.
    pub async fn locked_fields(&self, id: Uuid) -> Result<BTreeSet<String>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT locked_fields FROM metadata_items WHERE id = $1")
                .bind(uuid_to_str(id))
                .fetch_optional(&self.pool)
                .await?;
        Ok(from_json_or_default(raw.as_deref()))
    }
}

fn relation_kind_from_str(s: &str) -> Option<RelationKind> {
    use RelationKind::*;
    Some(match s {
        "trailer_promotes" => TrailerPromotes,
        "clip_supplements" => ClipSupplements,
        "behind_the_scenes_of" => BehindTheScenesOf,
        "deleted_scene_of" => DeletedSceneOf,
        "featurette_of" => FeaturetteOf,
        "interview_of" => InterviewOf,
        "scene_of" => SceneOf,
        "short_form_of" => ShortFormOf,
        "extra_other_of" => ExtraOtherOf,
        "optimized_version_of" => OptimizedVersionOf,
        _ => return None,
    })
}
