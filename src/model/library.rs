//! Library sections and scan runs

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Top-level library kind. Drives resolver selection and agent semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryKind {
    Movies,
    TvShows,
    Music,
    Photos,
    Pictures,
    Books,
    Games,
}

impl LibraryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LibraryKind::Movies => "movies",
            LibraryKind::TvShows => "tv_shows",
            LibraryKind::Music => "music",
            LibraryKind::Photos => "photos",
            LibraryKind::Pictures => "pictures",
            LibraryKind::Books => "books",
            LibraryKind::Games => "games",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "movies" => LibraryKind::Movies,
            "tv_shows" => LibraryKind::TvShows,
            "music" => LibraryKind::Music,
            "photos" => LibraryKind::Photos,
            "pictures" => LibraryKind::Pictures,
            "books" => LibraryKind::Books,
            "games" => LibraryKind::Games,
            _ => return None,
        })
    }
}

impl std::fmt::Display for LibraryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Episode ordering preference for a TV section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeSortOrder {
    AirDate,
    #[default]
    SeasonEpisode,
    Production,
}

/// Per-section settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrarySettings {
    /// BCP-47 language biasing agent selection.
    pub preferred_metadata_language: String,
    /// Explicit agent-id ordering override; empty keeps registry priority.
    pub metadata_agent_order: Vec<String>,
    /// Per-agent config blobs keyed by agent id.
    pub agent_config: std::collections::BTreeMap<String, serde_json::Value>,
    /// ISO 639 codes, most preferred first.
    pub preferred_audio_languages: Vec<String>,
    pub preferred_subtitle_languages: Vec<String>,
    pub episode_sort_order: EpisodeSortOrder,
    pub hide_seasons_for_single_season_series: bool,
    /// Scheduled-scan opt-in.
    pub auto_scan: bool,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            preferred_metadata_language: "en".to_string(),
            metadata_agent_order: Vec::new(),
            agent_config: std::collections::BTreeMap::new(),
            preferred_audio_languages: Vec::new(),
            preferred_subtitle_languages: Vec::new(),
            episode_sort_order: EpisodeSortOrder::default(),
            hide_seasons_for_single_season_series: false,
            auto_scan: false,
        }
    }
}

/// A root directory of a section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionLocation {
    pub id: Uuid,
    pub library_section_id: Uuid,
    pub root_path: String,
    /// Position within the section's ordered root list.
    pub position: i32,
}

/// Top-level library scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrarySection {
    pub id: Uuid,
    pub name: String,
    pub kind: LibraryKind,
    pub locations: Vec<SectionLocation>,
    pub settings: LibrarySettings,
    pub created_at: OffsetDateTime,
    pub last_scanned_at: Option<OffsetDateTime>,
}

/// Scan run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => ScanStatus::Pending,
            "running" => ScanStatus::Running,
            "completed" => ScanStatus::Completed,
            "failed" => ScanStatus::Failed,
            "cancelled" => ScanStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled)
    }
}

/// Resume cursor: stage name + stage-local cursor, guarded by a monotonic
/// version so stale writers fail fast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCursor {
    pub stage: String,
    pub cursor: String,
}

/// One scan run over a library section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryScan {
    pub id: Uuid,
    pub library_section_id: Uuid,
    pub status: ScanStatus,
    pub items_seen: i64,
    pub items_created: i64,
    pub items_updated: i64,
    pub items_unchanged: i64,
    pub resume: Option<ResumeCursor>,
    /// Incremented atomically with every checkpoint write.
    pub checkpoint_version: i64,
    pub checkpointed_at: Option<OffsetDateTime>,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
}

/// Stable stage names used in checkpoint rows.
pub mod stage_names {
    pub const DIRECTORY_TRAVERSAL: &str = "directory_traversal";
    pub const CHANGE_DETECTION: &str = "change_detection";
    pub const RESOLVE_ITEMS: &str = "resolve_items";
    pub const LOCAL_METADATA: &str = "local_metadata";
    pub const REMOTE_METADATA: &str = "remote_metadata";
    pub const RECONCILE: &str = "reconcile";
}
