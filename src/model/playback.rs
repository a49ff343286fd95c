//! Playback session, playlist generator and transcode job model

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Client-reported playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
    Buffering,
    Stopped,
}

impl PlaybackState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Stopped => "stopped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "playing" => PlaybackState::Playing,
            "paused" => PlaybackState::Paused,
            "buffering" => PlaybackState::Buffering,
            "stopped" => PlaybackState::Stopped,
            _ => return None,
        })
    }
}

/// A server-owned playback session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub id: Uuid,
    /// Opaque user-session token from the (out of scope) auth layer.
    pub user_session: String,
    pub capability_version: i64,
    pub current_metadata_item_id: Option<Uuid>,
    pub current_media_part_id: Option<Uuid>,
    pub playhead_ms: i64,
    pub state: PlaybackState,
    pub last_heartbeat_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Seed for a playlist generator's deterministic ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaylistSeed {
    /// Everything of a kind within a library section, sorted by sort title.
    LibraryFilter {
        library_section_id: Uuid,
        item_kind: String,
    },
    /// A smart-playlist definition blob evaluated by the store.
    Smart { definition: serde_json::Value },
    /// An explicit ordered id list.
    Explicit { item_ids: Vec<Uuid> },
}

/// Server-owned playlist cursor state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistGenerator {
    pub id: Uuid,
    pub public_id: String,
    pub session_id: Uuid,
    pub seed: PlaylistSeed,
    pub cursor: i64,
    pub repeat: bool,
    pub shuffle: bool,
    /// Opaque persisted shuffle state; reopens reproduce the permutation.
    pub shuffle_state: Option<String>,
    pub chunk_size: i64,
    pub total_count: Option<i64>,
    pub expires_at: OffsetDateTime,
}

/// One materialized playlist entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistGeneratorItem {
    pub generator_id: Uuid,
    pub metadata_item_id: Uuid,
    pub media_item_id: Option<Uuid>,
    pub media_part_id: Option<Uuid>,
    pub sort_order: i64,
    /// Set once a session actually plays the item.
    pub served: bool,
    /// Opaque grouping tag kept adjacent under shuffle.
    pub cohort: Option<String>,
}

/// Transcode job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeJobState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TranscodeJobState {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscodeJobState::Pending => "pending",
            TranscodeJobState::Running => "running",
            TranscodeJobState::Completed => "completed",
            TranscodeJobState::Cancelled => "cancelled",
            TranscodeJobState::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => TranscodeJobState::Pending,
            "running" => TranscodeJobState::Running,
            "completed" => TranscodeJobState::Completed,
            "cancelled" => TranscodeJobState::Cancelled,
            "failed" => TranscodeJobState::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TranscodeJobState::Completed | TranscodeJobState::Cancelled | TranscodeJobState::Failed
        )
    }
}

/// Effective encode target of a transcode job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeTarget {
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bitrate: Option<i64>,
    pub audio_bitrate: Option<i64>,
    pub max_width: Option<i32>,
    pub max_height: Option<i32>,
    pub audio_channels: Option<i32>,
    pub hardware_accel: bool,
    pub tone_mapping: bool,
}

/// A transcode job bound to a playback session and media part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub id: Uuid,
    pub session_id: Uuid,
    pub media_part_id: Uuid,
    pub state: TranscodeJobState,
    pub progress_percent: f64,
    pub output_dir: String,
    pub seek_offset_ms: Option<i64>,
    pub target: TranscodeTarget,
    pub error_message: Option<String>,
    pub last_ping_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
