//! Embedded extractors
//!
//! Analogous to sidecar parsers but driven by the media file itself:
//! audio tag blocks (lofty) and container-level tags (ffprobe). Extractors
//! return `None` when they add nothing.

pub mod audio_tags;
pub mod video_probe;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::model::LibraryKind;

use super::patch::MetadataPatch;
use super::probe::Entry;

/// One embedded-metadata reader.
#[async_trait]
pub trait EmbeddedExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, file: &Entry, kind: LibraryKind) -> bool;
    async fn extract(&self, file: &Entry) -> Result<Option<MetadataPatch>>;
}

/// Run all applicable extractors over a media file, merging contributions.
/// A single extractor crash never aborts the others.
pub async fn collect_embedded_results(
    extractors: &[Arc<dyn EmbeddedExtractor>],
    file: &Entry,
    kind: LibraryKind,
) -> (Option<MetadataPatch>, Option<String>) {
    let mut merged: Option<MetadataPatch> = None;
    let mut sources: Vec<&'static str> = Vec::new();

    for extractor in extractors {
        if !extractor.supports(file, kind) {
            continue;
        }
        match extractor.extract(file).await {
            Ok(Some(patch)) if !patch.is_empty() => {
                sources.push(extractor.name());
                match merged.as_mut() {
                    Some(m) => m.absorb(patch),
                    None => merged = Some(patch),
                }
            }
            Ok(_) => {
                debug!(extractor = extractor.name(), path = %file.path.display(),
                    "Embedded extractor added nothing");
            }
            Err(e) => {
                warn!(extractor = extractor.name(), path = %file.path.display(), error = %e,
                    "Embedded extractor failed");
            }
        }
    }

    let source = if sources.is_empty() { None } else { Some(sources.join("+")) };
    (merged, source)
}

/// The default extractor set registered at startup.
pub fn default_extractors(
    ffprobe: crate::media::ffprobe::FfprobeService,
) -> Vec<Arc<dyn EmbeddedExtractor>> {
    vec![
        Arc::new(audio_tags::AudioTagExtractor),
        Arc::new(video_probe::VideoProbeExtractor::new(ffprobe)),
    ]
}
