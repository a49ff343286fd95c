//! Scan engine
//!
//! A streaming, checkpoint-resumable, multi-stage pipeline that turns a
//! filesystem tree into typed metadata items with sidecar/embedded/remote
//! enrichment and deterministic dedup.

pub mod analyzers;
pub mod content_rating;
pub mod context;
pub mod dedup;
pub mod embedded;
pub mod merge;
pub mod patch;
pub mod pipeline;
pub mod probe;
pub mod reconcile;
pub mod registry;
pub mod resolvers;
pub mod sidecar;
pub mod stages;
pub mod work_item;

use std::sync::Arc;

use crate::media::ffprobe::FfprobeService;

pub use context::{ScanContext, ScanProgress};
pub use pipeline::ScannerService;
pub use registry::{PartsRegistry, RegistryBuilder};

/// Build the default parts registry: built-in ignore rules, resolvers,
/// sidecar parsers, embedded extractors and analyzers. Plugins would
/// contribute here before the freeze; the registry is immutable afterward.
pub fn build_default_registry(ffprobe: FfprobeService) -> Arc<PartsRegistry> {
    let mut builder = PartsRegistry::builder();

    builder
        .add_ignore_rule(Arc::new(probe::HiddenFileRule))
        .add_ignore_rule(Arc::new(probe::NoScanMarkerRule));

    for resolver in resolvers::default_resolvers() {
        builder.add_resolver(resolver);
    }
    for parser in sidecar::default_parsers() {
        builder.add_sidecar_parser(parser);
    }
    for extractor in embedded::default_extractors(ffprobe.clone()) {
        builder.add_embedded_extractor(extractor);
    }
    builder.add_analyzer(Arc::new(analyzers::FfprobeAnalyzer::new(ffprobe)));
    builder.add_analyzer(Arc::new(analyzers::PartHashAnalyzer));

    builder.freeze()
}
