//! Change-data store
//!
//! Repository-pattern persistence over SQLite. The scan pipeline, merge
//! engine, playback engines and playlist generator all go through the
//! repositories here; none of them touch the pool directly.
//!
//! Every listing query excludes soft-deleted rows unless the caller opts in
//! with an explicit flag.

pub mod helpers;
pub mod library_sections;
pub mod media;
pub mod metadata_items;
pub mod playback_sessions;
pub mod playlists;
pub mod scans;
pub mod schema;
pub mod transcode_jobs;

use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

pub use library_sections::{CreateLibrarySection, LibrarySectionRepository};
pub use media::MediaRepository;
pub use metadata_items::MetadataItemRepository;
pub use playback_sessions::PlaybackSessionRepository;
pub use playlists::PlaylistRepository;
pub use scans::ScanRepository;
pub use transcode_jobs::TranscodeJobRepository;

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (and create if missing) the SQLite database at the given path.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(15));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        // A single pinned connection keeps the in-memory database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Ensure all tables exist.
    pub async fn migrate(&self) -> Result<()> {
        schema::ensure_schema(&self.pool).await?;
        info!("Database schema ready");
        Ok(())
    }

    pub fn library_sections(&self) -> LibrarySectionRepository {
        LibrarySectionRepository::new(self.pool.clone())
    }

    pub fn metadata_items(&self) -> MetadataItemRepository {
        MetadataItemRepository::new(self.pool.clone())
    }

    pub fn media(&self) -> MediaRepository {
        MediaRepository::new(self.pool.clone())
    }

    pub fn scans(&self) -> ScanRepository {
        ScanRepository::new(self.pool.clone())
    }

    pub fn playback_sessions(&self) -> PlaybackSessionRepository {
        PlaybackSessionRepository::new(self.pool.clone())
    }

    pub fn playlists(&self) -> PlaylistRepository {
        PlaylistRepository::new(self.pool.clone())
    }

    pub fn transcode_jobs(&self) -> TranscodeJobRepository {
        TranscodeJobRepository::new(self.pool.clone())
    }
}
