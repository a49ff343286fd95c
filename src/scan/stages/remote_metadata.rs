//! Remote metadata stage
//!
//! Runs the section's ordered agent list over each resolved item. Each
//! agent call is bounded by a timeout and a single agent failure never
//! affects other items. With no agents registered (the default build) the
//! stage is a structured pass-through.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::super::context::ScanContext;
use super::super::work_item::ScanWorkItem;
use super::{worker_pool_size, StageReceiver, STAGE_CHANNEL_CAPACITY};

/// Per-agent call budget.
const AGENT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn spawn(ctx: Arc<ScanContext>, input: StageReceiver) -> StageReceiver {
    let (tx, rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
    let workers = worker_pool_size();

    tokio::spawn(async move {
        let agents = ctx
            .registry
            .agents_for_section(&ctx.section.settings.metadata_agent_order);
        let language = ctx.section.settings.preferred_metadata_language.clone();

        let mut stream = ReceiverStream::new(input)
            .map(|item| {
                let ctx = ctx.clone();
                let agents = agents.clone();
                let language = language.clone();
                async move { process(ctx, agents, language, item).await }
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
    agents: Vec<Arc<dyn super::super::registry::MetadataAgent>>,
    language: String,
    mut item: ScanWorkItem,
) -> ScanWorkItem {
    if ctx.cancel.is_cancelled() || item.is_unchanged {
        return item;
    }
    let Some(resolved) = item.resolved.as_ref() else {
        return item;
    };

    for agent in &agents {
        if !agent.supports(ctx.section.kind) {
            continue;
        }
        let call = agent.enrich(&resolved.item, &language);
        match tokio::time::timeout(AGENT_TIMEOUT, call).await {
            Ok(Ok(Some(patch))) => {
                debug!(agent = agent.id(), item = %resolved.item.id, "Agent contributed");
                match item.remote_patch.as_mut() {
                    Some(existing) => existing.absorb(patch),
                    None => item.remote_patch = Some(patch),
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                warn!(agent = agent.id(), item = %resolved.item.id, error = %e, "Agent failed");
            }
            Err(_) => {
                warn!(agent = agent.id(), item = %resolved.item.id, "Agent timed out");
            }
        }
    }

    item
}
