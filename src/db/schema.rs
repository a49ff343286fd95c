//! Embedded schema definition
//!
//! Tables are created idempotently at startup. Column changes require a
//! wipe; there is no in-place migration of existing columns.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS library_sections (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        settings TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        last_scanned_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS section_locations (
        id TEXT PRIMARY KEY,
        library_section_id TEXT NOT NULL REFERENCES library_sections(id) ON DELETE CASCADE,
        root_path TEXT NOT NULL,
        position INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metadata_items (
        id TEXT PRIMARY KEY,
        kind INTEGER NOT NULL,
        title TEXT,
        sort_title TEXT,
        original_title TEXT,
        summary TEXT,
        tagline TEXT,
        content_rating TEXT,
        content_rating_age INTEGER,
        release_date TEXT,
        year INTEGER,
        index_number INTEGER,
        absolute_index INTEGER,
        duration_ms INTEGER,
        poster_uri TEXT,
        poster_hash TEXT,
        backdrop_uri TEXT,
        backdrop_hash TEXT,
        thumb_uri TEXT,
        thumb_hash TEXT,
        parent_id TEXT,
        library_section_id TEXT,
        deleted_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        locked_fields TEXT NOT NULL DEFAULT '[]',
        extra_fields TEXT NOT NULL DEFAULT '{}',
        genres TEXT NOT NULL DEFAULT '[]',
        tags TEXT NOT NULL DEFAULT '[]',
        credits TEXT NOT NULL DEFAULT '[]',
        child_order TEXT NOT NULL DEFAULT '[]'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_metadata_items_parent ON metadata_items(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_metadata_items_section ON metadata_items(library_section_id, kind)",
    r#"
    CREATE TABLE IF NOT EXISTS external_ids (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        metadata_item_id TEXT NOT NULL REFERENCES metadata_items(id) ON DELETE CASCADE,
        library_section_id TEXT,
        kind INTEGER NOT NULL,
        provider TEXT NOT NULL,
        value TEXT NOT NULL,
        UNIQUE(metadata_item_id, provider),
        UNIQUE(library_section_id, kind, provider, value)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS item_relations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        from_id TEXT NOT NULL REFERENCES metadata_items(id) ON DELETE CASCADE,
        to_id TEXT NOT NULL REFERENCES metadata_items(id) ON DELETE CASCADE,
        UNIQUE(kind, from_id, to_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS media_items (
        id TEXT PRIMARY KEY,
        metadata_item_id TEXT NOT NULL REFERENCES metadata_items(id) ON DELETE CASCADE,
        container TEXT,
        video_codec TEXT,
        audio_codec TEXT,
        width INTEGER,
        height INTEGER,
        hdr_type TEXT,
        bitrate INTEGER,
        duration_ms INTEGER,
        file_size_bytes INTEGER,
        is_disc_image INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_media_items_metadata ON media_items(metadata_item_id)",
    r#"
    CREATE TABLE IF NOT EXISTS media_parts (
        id TEXT PRIMARY KEY,
        media_item_id TEXT NOT NULL REFERENCES media_items(id) ON DELETE CASCADE,
        part_index INTEGER NOT NULL,
        file_path TEXT NOT NULL UNIQUE,
        size_bytes INTEGER NOT NULL,
        modified_at TEXT,
        hash TEXT,
        duration_ms INTEGER,
        container TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_media_parts_item ON media_parts(media_item_id)",
    r#"
    CREATE TABLE IF NOT EXISTS media_streams (
        id TEXT PRIMARY KEY,
        media_part_id TEXT NOT NULL REFERENCES media_parts(id) ON DELETE CASCADE,
        stream_index INTEGER NOT NULL,
        stream_type TEXT NOT NULL,
        codec TEXT NOT NULL,
        language TEXT,
        title TEXT,
        width INTEGER,
        height INTEGER,
        profile TEXT,
        level INTEGER,
        bit_depth INTEGER,
        frame_rate REAL,
        hdr_type TEXT,
        channels INTEGER,
        sample_rate INTEGER,
        bitrate INTEGER,
        is_default INTEGER NOT NULL DEFAULT 0,
        is_forced INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_media_streams_part ON media_streams(media_part_id)",
    r#"
    CREATE TABLE IF NOT EXISTS library_scans (
        id TEXT PRIMARY KEY,
        library_section_id TEXT NOT NULL REFERENCES library_sections(id) ON DELETE CASCADE,
        status TEXT NOT NULL,
        items_seen INTEGER NOT NULL DEFAULT 0,
        items_created INTEGER NOT NULL DEFAULT 0,
        items_updated INTEGER NOT NULL DEFAULT 0,
        items_unchanged INTEGER NOT NULL DEFAULT 0,
        resume_stage TEXT,
        resume_cursor TEXT,
        checkpoint_version INTEGER NOT NULL DEFAULT 0,
        checkpointed_at TEXT,
        started_at TEXT NOT NULL,
        finished_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scan_seen_paths (
        scan_id TEXT NOT NULL REFERENCES library_scans(id) ON DELETE CASCADE,
        file_path TEXT NOT NULL,
        PRIMARY KEY (scan_id, file_path)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS playback_sessions (
        id TEXT PRIMARY KEY,
        user_session TEXT NOT NULL,
        capability_profile TEXT,
        capability_version INTEGER NOT NULL DEFAULT 0,
        current_metadata_item_id TEXT,
        current_media_part_id TEXT,
        playhead_ms INTEGER NOT NULL DEFAULT 0,
        state TEXT NOT NULL DEFAULT 'stopped',
        last_heartbeat_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS playlist_generators (
        id TEXT PRIMARY KEY,
        public_id TEXT NOT NULL UNIQUE,
        session_id TEXT NOT NULL REFERENCES playback_sessions(id) ON DELETE CASCADE,
        seed TEXT NOT NULL,
        cursor INTEGER NOT NULL DEFAULT 0,
        repeat INTEGER NOT NULL DEFAULT 0,
        shuffle INTEGER NOT NULL DEFAULT 0,
        shuffle_state TEXT,
        chunk_size INTEGER NOT NULL DEFAULT 20,
        total_count INTEGER,
        expires_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS playlist_generator_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        generator_id TEXT NOT NULL REFERENCES playlist_generators(id) ON DELETE CASCADE,
        metadata_item_id TEXT NOT NULL,
        media_item_id TEXT,
        media_part_id TEXT,
        sort_order INTEGER NOT NULL,
        served INTEGER NOT NULL DEFAULT 0,
        cohort TEXT,
        UNIQUE(generator_id, sort_order)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transcode_jobs (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        media_part_id TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT 'pending',
        progress_percent REAL NOT NULL DEFAULT 0,
        output_dir TEXT NOT NULL,
        seek_offset_ms INTEGER,
        target TEXT NOT NULL,
        error_message TEXT,
        last_ping_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transcode_jobs_session ON transcode_jobs(session_id, media_part_id)",
];

/// Create all tables and indexes if they do not exist.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!(statements = SCHEMA.len(), "Schema ensured");
    Ok(())
}
