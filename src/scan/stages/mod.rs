//! Pipeline stages
//!
//! Each stage consumes a bounded stream of [ScanWorkItem]s and produces
//! another. Stages run as a single-producer / single-consumer chain per
//! scan; I/O-heavy stages fan out internally with a bounded worker pool
//! while preserving emission order.

pub mod change_detection;
pub mod local_metadata;
pub mod persist;
pub mod remote_metadata;
pub mod resolve;
pub mod traversal;

use super::work_item::ScanWorkItem;

/// Capacity of the inter-stage channels; the producer side suspends when
/// its output is full (backpressure).
pub const STAGE_CHANNEL_CAPACITY: usize = 64;

/// Bounded worker pool size for I/O-bound stages.
pub fn worker_pool_size() -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
    (cpus * 2).max(4)
}

pub type StageReceiver = tokio::sync::mpsc::Receiver<ScanWorkItem>;
