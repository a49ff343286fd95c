//! Sidecar parsers
//!
//! A sidecar is an auxiliary file colocated with a media file (`.nfo`,
//! `metadata.json`, poster images). Multiple parsers may claim the same
//! sidecar; the pipeline collects every successful result, deduped by
//! parser name per media file, and merges them with last-writer-wins for
//! non-null fields, set-union for collections, and right-biased hints.

pub mod artwork;
pub mod json;
pub mod nfo;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::model::LibraryKind;

use super::patch::MetadataPatch;
use super::probe::Entry;

/// Parse request context.
#[derive(Debug)]
pub struct SidecarRequest<'a> {
    pub media_file: &'a Entry,
    pub sidecar_file: &'a Entry,
    pub library_kind: LibraryKind,
    pub siblings: &'a [Entry],
}

/// A single parser's contribution.
#[derive(Debug, Clone)]
pub struct SidecarResult {
    pub metadata: Option<MetadataPatch>,
    /// Source tag, e.g. `"nfo"` or `"local-artwork"`.
    pub source: &'static str,
}

impl SidecarResult {
    pub fn is_empty(&self) -> bool {
        self.metadata.as_ref().map(|m| m.is_empty()).unwrap_or(true)
    }
}

/// One sidecar format reader.
pub trait SidecarParser: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_parse(&self, file: &Entry) -> bool;
    /// Returns `None` when the parser adds nothing for this file.
    fn parse(&self, request: &SidecarRequest<'_>) -> Result<Option<SidecarResult>>;
}

/// Run every registered parser over every sibling sidecar of a media file.
/// Each parser contributes at most once per media file; a parser crash is
/// logged and skipped without affecting the others.
pub fn collect_sidecar_results(
    parsers: &[Arc<dyn SidecarParser>],
    media_file: &Entry,
    siblings: &[Entry],
    library_kind: LibraryKind,
) -> (Option<MetadataPatch>, Option<String>) {
    let mut used_parsers: HashSet<&'static str> = HashSet::new();
    let mut merged: Option<MetadataPatch> = None;
    let mut sources: Vec<&'static str> = Vec::new();

    for sidecar in siblings {
        if sidecar.path == media_file.path || sidecar.is_dir {
            continue;
        }
        for parser in parsers {
            if used_parsers.contains(parser.name()) || !parser.can_parse(sidecar) {
                continue;
            }
            let request = SidecarRequest {
                media_file,
                sidecar_file: sidecar,
                library_kind,
                siblings,
            };
            match parser.parse(&request) {
                Ok(Some(result)) if !result.is_empty() => {
                    used_parsers.insert(parser.name());
                    if !sources.contains(&result.source) {
                        sources.push(result.source);
                    }
                    if let Some(patch) = result.metadata {
                        match merged.as_mut() {
                            Some(m) => m.absorb(patch),
                            None => merged = Some(patch),
                        }
                    }
                }
                Ok(_) => {
                    debug!(
                        parser = parser.name(),
                        sidecar = %sidecar.path.display(),
                        "Sidecar parser added nothing"
                    );
                }
                Err(e) => {
                    warn!(
                        parser = parser.name(),
                        sidecar = %sidecar.path.display(),
                        error = %e,
                        "Sidecar parser failed"
                    );
                }
            }
        }
    }

    let source = if sources.is_empty() { None } else { Some(sources.join("+")) };
    (merged, source)
}

/// The default parser set registered at startup.
pub fn default_parsers() -> Vec<Arc<dyn SidecarParser>> {
    vec![
        Arc::new(nfo::NfoParser),
        Arc::new(json::JsonMetadataParser),
        Arc::new(artwork::LocalArtworkParser),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct FixedParser {
        name: &'static str,
        title: &'static str,
    }

    impl SidecarParser for FixedParser {
        fn name(&self) -> &'static str {
            self.name
        }

        fn can_parse(&self, file: &Entry) -> bool {
            file.ext.as_deref() == Some("nfo")
        }

        fn parse(&self, _request: &SidecarRequest<'_>) -> Result<Option<SidecarResult>> {
            Ok(Some(SidecarResult {
                metadata: Some(MetadataPatch {
                    title: Some(self.title.to_string()),
                    ..Default::default()
                }),
                source: self.name,
            }))
        }
    }

    fn entry(name: &str) -> Entry {
        let path = PathBuf::from("/m/dir").join(name);
        Entry {
            name: name.to_string(),
            ext: path.extension().map(|e| e.to_string_lossy().to_lowercase()),
            path,
            is_dir: false,
            size: Some(1),
            mtime: None,
            ctime: None,
            exists: true,
        }
    }

    #[test]
    fn test_results_merge_with_joined_source() {
        let parsers: Vec<Arc<dyn SidecarParser>> = vec![
            Arc::new(FixedParser { name: "a", title: "From A" }),
            Arc::new(FixedParser { name: "b", title: "From B" }),
        ];
        let media = entry("movie.mkv");
        let siblings = vec![entry("movie.mkv"), entry("movie.nfo")];

        let (patch, source) =
            collect_sidecar_results(&parsers, &media, &siblings, LibraryKind::Movies);
        // Last writer wins within the sidecar layer.
        assert_eq!(patch.unwrap().title.as_deref(), Some("From B"));
        assert_eq!(source.as_deref(), Some("a+b"));
    }

    #[test]
    fn test_parser_runs_once_per_media_file() {
        let parsers: Vec<Arc<dyn SidecarParser>> =
            vec![Arc::new(FixedParser { name: "a", title: "T" })];
        let media = entry("movie.mkv");
        // Two sidecars the parser could claim, one contribution expected.
        let siblings = vec![entry("movie.nfo"), entry("other.nfo")];

        let (patch, source) =
            collect_sidecar_results(&parsers, &media, &siblings, LibraryKind::Movies);
        assert!(patch.is_some());
        assert_eq!(source.as_deref(), Some("a"));
    }
}
