//! Scan work items
//!
//! A [ScanWorkItem] is a single filesystem entry in transit through the
//! pipeline, progressively enriched stage by stage. Items are immutable
//! values; a stage that fills fields in produces a new instance with struct
//! update syntax, moving the untouched fields.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::model::{LibraryKind, MediaItem, MetadataItem, RelationKind};

use super::patch::MetadataPatch;
use super::probe::Entry;

/// Outcome of resolving a filesystem entry into typed metadata. A resolver
/// may produce a whole subtree (album -> medium -> track).
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item: MetadataItem,
    pub media: Option<MediaItem>,
    pub children: Vec<ResolvedItem>,
    /// Extras carry their owner by folder until ownership is resolved.
    pub pending_owner: Option<PendingOwner>,
    /// Embedded-extractor patch for nested children (tracks, photos); the
    /// top-level entry's patches live on the work item itself.
    pub embedded_patch: Option<MetadataPatch>,
}

impl ResolvedItem {
    pub fn new(item: MetadataItem) -> Self {
        Self {
            item,
            media: None,
            children: Vec::new(),
            pending_owner: None,
            embedded_patch: None,
        }
    }
}

/// A typed relation waiting for its owner item to exist.
#[derive(Debug, Clone)]
pub struct PendingOwner {
    pub relation: RelationKind,
    /// The folder whose primary item owns this extra.
    pub owner_dir: PathBuf,
}

/// One entry flowing through the scan stages.
#[derive(Debug, Clone)]
pub struct ScanWorkItem {
    pub scan_id: Uuid,
    pub library_section_id: Uuid,
    pub section_location_id: Uuid,
    pub library_kind: LibraryKind,
    pub location_root: Arc<PathBuf>,

    pub entry: Entry,
    pub is_root: bool,
    /// Directory children (for directory entries).
    pub children: Option<Arc<Vec<Entry>>>,
    /// Entries sharing the parent directory, including this one.
    pub siblings: Arc<Vec<Entry>>,
    /// Ancestor directories from the location root downward.
    pub ancestors: Arc<Vec<PathBuf>>,

    /// Set by change detection when stored stats match on disk.
    pub is_unchanged: bool,

    /// Set by the resolve stage.
    pub resolved: Option<ResolvedItem>,

    /// Collected by the local-metadata stage.
    pub sidecar_patch: Option<MetadataPatch>,
    pub embedded_patch: Option<MetadataPatch>,
    /// Collected by the remote-metadata stage.
    pub remote_patch: Option<MetadataPatch>,
    /// Concatenated source tags, e.g. `"nfo+local-artwork"`.
    pub metadata_source: Option<String>,
}

impl ScanWorkItem {
    /// Marker for unchanged entries; later stages may short-circuit
    /// persistence but still let the item flow through.
    pub fn unchanged(self) -> Self {
        Self { is_unchanged: true, ..self }
    }

    pub fn with_resolved(self, resolved: ResolvedItem) -> Self {
        Self { resolved: Some(resolved), ..self }
    }
}
