//! Local metadata stage
//!
//! Runs sidecar parsers over each media file's siblings, embedded
//! extractors over the file itself, per-kind stream analyzers, and ingests
//! sidecar-referenced artwork under the resolved item's UUID. I/O-heavy,
//! so the stage fans out over a bounded worker pool while keeping emission
//! order via `buffered`.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::services::artwork::{ArtworkKind, ArtworkService};

use super::super::context::ScanContext;
use super::super::embedded::collect_embedded_results;
use super::super::sidecar::collect_sidecar_results;
use super::super::work_item::{ResolvedItem, ScanWorkItem};
use super::{worker_pool_size, StageReceiver, STAGE_CHANNEL_CAPACITY};

pub fn spawn(
    ctx: Arc<ScanContext>,
    artwork: ArtworkService,
    input: StageReceiver,
) -> StageReceiver {
    let (tx, rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
    let workers = worker_pool_size();

    tokio::spawn(async move {
        let mut stream = ReceiverStream::new(input)
            .map(|item| {
                let ctx = ctx.clone();
                let artwork = artwork.clone();
                async move { process(ctx, artwork, item).await }
            })
            .buffered(workers);

        while let Some(item) = stream.next().await {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    });
    rx
}

async fn process(
    ctx: Arc<ScanContext>,
    artwork: ArtworkService,
    mut item: ScanWorkItem,
) -> ScanWorkItem {
    if ctx.cancel.is_cancelled() {
        return item;
    }
    let Some(mut resolved) = item.resolved.take() else {
        return item;
    };

    // The media file whose siblings hold the sidecars: the entry itself
    // for file items, the primary part for folder-resolved items (the
    // folder's children are the part's siblings).
    let probe_target = if item.entry.is_dir {
        resolved
            .media
            .as_ref()
            .and_then(|m| m.parts.first())
            .map(|part| {
                let entry =
                    super::super::probe::Entry::from_path(std::path::Path::new(&part.file_path));
                let siblings: Vec<_> =
                    item.children.as_deref().cloned().unwrap_or_default();
                (entry, siblings)
            })
    } else {
        Some((item.entry.clone(), item.siblings.to_vec()))
    };

    // Unchanged files short-circuit the expensive probes; their stored
    // state is still valid.
    if !item.is_unchanged {
        if let Some((media_entry, siblings)) = probe_target {
            let (sidecar_patch, sidecar_source) = collect_sidecar_results(
                ctx.registry.sidecar_parsers(),
                &media_entry,
                &siblings,
                item.library_kind,
            );
            let (embedded_patch, embedded_source) = collect_embedded_results(
                ctx.registry.embedded_extractors(),
                &media_entry,
                item.library_kind,
            )
            .await;

            item.metadata_source = match (sidecar_source, embedded_source) {
                (Some(s), Some(e)) => Some(format!("{s}+{e}")),
                (Some(s), None) => Some(s),
                (None, Some(e)) => Some(e),
                (None, None) => None,
            };

            // Sidecar-referenced artwork becomes content-addressed blobs
            // under the resolved item's UUID; the patch URIs are rewritten
            // in place.
            let mut sidecar_patch = sidecar_patch;
            if let Some(patch) = sidecar_patch.as_mut() {
                for (slot, uri) in [
                    (ArtworkKind::Poster, &mut patch.poster_uri),
                    (ArtworkKind::Backdrop, &mut patch.backdrop_uri),
                    (ArtworkKind::Thumb, &mut patch.thumb_uri),
                ] {
                    if let Some(source) = uri.clone() {
                        match artwork.ingest(resolved.item.id, slot, &source).await {
                            Ok(Some(stored)) => *uri = stored.uri,
                            Ok(None) => *uri = None,
                            Err(e) => {
                                warn!(uri = %source, error = %e, "Artwork ingestion failed");
                                *uri = None;
                            }
                        }
                    }
                }
            }

            item.sidecar_patch = sidecar_patch;
            item.embedded_patch = embedded_patch;
        }
    }

    // Stream analysis covers folder-resolved media too (stacked movies,
    // album tracks), whose parts never flow through as their own entries.
    if !item.is_unchanged {
        analyze_tree(&ctx, &mut resolved).await;
    }

    item.resolved = Some(resolved);
    item
}

/// Run per-kind analyzers over every media part in the resolved subtree,
/// and embedded extractors over nested children (tracks, photos) whose
/// entries never flow through the pipeline individually.
async fn analyze_tree(ctx: &ScanContext, resolved: &mut ResolvedItem) {
    if let Some(media) = resolved.media.as_mut() {
        let analyzers = ctx.registry.analyzers_for(resolved.item.kind);
        for part in media.parts.iter_mut() {
            for analyzer in &analyzers {
                if let Err(e) = analyzer.analyze(part).await {
                    debug!(
                        analyzer = analyzer.name(),
                        part = %part.file_path,
                        error = %e,
                        "Analyzer skipped part"
                    );
                }
            }
        }
        media.recompute_summary();
        if resolved.item.duration_ms.is_none() {
            resolved.item.duration_ms = media.duration_ms;
        }
    }
    for child in resolved.children.iter_mut() {
        if let Some(part) = child.media.as_ref().and_then(|m| m.parts.first()) {
            let entry = super::super::probe::Entry::from_path(std::path::Path::new(
                &part.file_path,
            ));
            let (patch, _) = collect_embedded_results(
                ctx.registry.embedded_extractors(),
                &entry,
                ctx.section.kind,
            )
            .await;
            child.embedded_patch = patch;
        }
        Box::pin(analyze_tree(ctx, child)).await;
    }
}
