//! Core data model
//!
//! Plain data types shared across the scan pipeline, the playback engines
//! and the store. Items reference each other by id only; the graph is never
//! held as live object references.

pub mod capability;
pub mod item;
pub mod library;
pub mod media;
pub mod playback;

pub use capability::{AudioCodecSupport, CapabilityProfile, SubtitleSupport, VideoCodecSupport};
pub use item::{
    ArtworkRef, ArtworkSet, Credit, CreditKind, CustomValue, ExternalId, ItemKind, MetadataItem,
    Relation, RelationKind, ReleaseDate,
};
pub use library::{
    EpisodeSortOrder, LibraryKind, LibraryScan, LibrarySection, LibrarySettings, ResumeCursor,
    ScanStatus, SectionLocation,
};
pub use media::{HdrType, MediaItem, MediaPart, MediaStream, StreamType};
pub use playback::{
    PlaybackSession, PlaybackState, PlaylistGenerator, PlaylistGeneratorItem, PlaylistSeed,
    TranscodeJob, TranscodeJobState, TranscodeTarget,
};
