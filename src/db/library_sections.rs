//! Library sections repository

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::{LibraryKind, LibrarySection, LibrarySettings, SectionLocation};

use super::helpers::{from_json_or_default, str_to_uuid, to_json, uuid_to_str};

/// Input for creating a library section
#[derive(Debug)]
pub struct CreateLibrarySection {
    pub name: String,
    pub kind: LibraryKind,
    pub root_paths: Vec<String>,
    pub settings: LibrarySettings,
}

pub struct LibrarySectionRepository {
    pool: SqlitePool,
}

impl LibrarySectionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: CreateLibrarySection) -> Result<LibrarySection> {
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let now_str = now.format(&Rfc3339)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO library_sections (id, name, kind, settings, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(uuid_to_str(id))
        .bind(&input.name)
        .bind(input.kind.as_str())
        .bind(to_json(&input.settings))
        .bind(&now_str)
        .execute(&mut *tx)
        .await
        .context("create library section")?;

        let mut locations = Vec::with_capacity(input.root_paths.len());
        for (position, root) in input.root_paths.iter().enumerate() {
            let loc_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO section_locations (id, library_section_id, root_path, position) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(uuid_to_str(loc_id))
            .bind(uuid_to_str(id))
            .bind(root)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
            locations.push(SectionLocation {
                id: loc_id,
                library_section_id: id,
                root_path: root.clone(),
                position: position as i32,
            });
        }
        tx.commit().await?;

        Ok(LibrarySection {
            id,
            name: input.name,
            kind: input.kind,
            locations,
            settings: input.settings,
            created_at: now,
            last_scanned_at: None,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<LibrarySection>> {
        let row = sqlx::query(
            "SELECT id, name, kind, settings, created_at, last_scanned_at \
             FROM library_sections WHERE id = $1",
        )
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(self.row_to_section(row).await?))
    }

    pub async fn list(&self) -> Result<Vec<LibrarySection>> {
        let rows = sqlx::query(
            "SELECT id, name, kind, settings, created_at, last_scanned_at \
             FROM library_sections ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut sections = Vec::with_capacity(rows.len());
        for row in rows {
            sections.push(self.row_to_section(row).await?);
        }
        Ok(sections)
    }

    /// Sections opted into scheduled scans.
    pub async fn list_auto_scan(&self) -> Result<Vec<LibrarySection>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.settings.auto_scan)
            .collect())
    }

    pub async fn update_settings(&self, id: Uuid, settings: &LibrarySettings) -> Result<()> {
        sqlx::query("UPDATE library_sections SET settings = $2 WHERE id = $1")
            .bind(uuid_to_str(id))
            .bind(to_json(settings))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_last_scanned(&self, id: Uuid) -> Result<()> {
        let now = OffsetDateTime::now_utc().format(&Rfc3339)?;
        sqlx::query("UPDATE library_sections SET last_scanned_at = $2 WHERE id = $1")
            .bind(uuid_to_str(id))
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn row_to_section(&self, row: sqlx::sqlite::SqliteRow) -> Result<LibrarySection> {
        let id = str_to_uuid(&row.get::<String, _>("id"))?;
        let kind_str: String = row.get("kind");
        let kind = LibraryKind::from_str(&kind_str)
            .with_context(|| format!("unknown library kind '{kind_str}'"))?;
        let settings: LibrarySettings =
            from_json_or_default(Some(row.get::<String, _>("settings").as_str()));

        let loc_rows = sqlx::query(
            "SELECT id, root_path, position FROM section_locations \
             WHERE library_section_id = $1 ORDER BY position",
        )
        .bind(uuid_to_str(id))
        .fetch_all(&self.pool)
        .await?;
        let locations = loc_rows
            .into_iter()
            .map(|r| {
                Ok(SectionLocation {
                    id: str_to_uuid(&r.get::<String, _>("id"))?,
                    library_section_id: id,
                    root_path: r.get("root_path"),
                    position: r.get("position"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(LibrarySection {
            id,
            name: row.get("name"),
            kind,
            locations,
            settings,
            created_at: OffsetDateTime::parse(&row.get::<String, _>("created_at"), &Rfc3339)?,
            last_scanned_at: row
                .get::<Option<String>, _>("last_scanned_at")
                .as_deref()
                .map(|s| OffsetDateTime::parse(s, &Rfc3339))
                .transpose()?,
        })
    }
}
