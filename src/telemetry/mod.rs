//! Batched telemetry: stats, errors, extracted items.
//!
//! Three structurally identical pipelines: accumulate per execution in
//! memory, flush on a timer, drain on shutdown. Readers of execution stats
//! are eventually consistent, lagging by at most one flush interval.

pub mod errors;
pub mod items;
pub mod stats;

pub use errors::{ErrorBatch, ErrorReporter};
pub use items::{BatchedItemWriter, ItemSink, MemoryItemSink, PgCopyItemWriter, PgInsertItemWriter};
pub use stats::{StatsBatch, StatsReporter, StatsUpdate};

use std::time::Duration;

/// Random start offset so a fleet of workers does not flush in lockstep
pub(crate) fn flush_jitter(interval: Duration) -> Duration {
    let half = (interval.as_millis() as u64 / 2).max(1);
    Duration::from_millis(rand::random::<u64>() % half)
}
