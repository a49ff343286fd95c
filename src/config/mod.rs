//! Application configuration management

use std::env;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (for generating URLs)
    pub host: Option<String>,

    /// Server port
    pub port: u16,

    /// SQLite database path
    pub database_path: String,

    /// Content-addressed media tree root (artwork blobs, trickplay indexes)
    pub media_path: String,

    /// Transcode output cache directory
    pub cache_path: String,

    /// FFmpeg / ffprobe executables
    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    /// Session/generator expiry in days; heartbeats extend by this much
    pub playback_expiry_days: i64,

    /// Playlist materialization chunk size
    pub playlist_chunk_size: i64,

    /// Prefer hardware encoders when transcoding
    pub use_hardware_acceleration: bool,

    /// Tone-map HDR content down to SDR when transcoding
    pub enable_tone_mapping: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("HOST").ok(),

            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,

            database_path: env::var("CURATOR_DATABASE_PATH")
                .or_else(|_| env::var("DATABASE_PATH"))
                .unwrap_or_else(|_| "./data/curator.db".to_string()),

            media_path: env::var("CURATOR_MEDIA_PATH")
                .unwrap_or_else(|_| "./data/media".to_string()),

            cache_path: env::var("CURATOR_CACHE_PATH")
                .unwrap_or_else(|_| "./data/cache".to_string()),

            ffmpeg_path: env::var("CURATOR_FFMPEG_PATH")
                .unwrap_or_else(|_| "ffmpeg".to_string()),

            ffprobe_path: env::var("CURATOR_FFPROBE_PATH")
                .unwrap_or_else(|_| "ffprobe".to_string()),

            playback_expiry_days: env::var("CURATOR_PLAYBACK_EXPIRY_DAYS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("Invalid CURATOR_PLAYBACK_EXPIRY_DAYS")?,

            playlist_chunk_size: env::var("CURATOR_PLAYLIST_CHUNK_SIZE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("Invalid CURATOR_PLAYLIST_CHUNK_SIZE")?,

            use_hardware_acceleration: env::var("CURATOR_TRANSCODE_HWACCEL")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            enable_tone_mapping: env::var("CURATOR_TRANSCODE_TONE_MAPPING")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}
