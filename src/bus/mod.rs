//! Task bus seam: at-least-once publish/subscribe with ack semantics.
//!
//! The production transport is an external collaborator; workers and the
//! orchestrator only see this trait. The in-crate `MemoryTaskBus` backs
//! tests and single-box runs and deliberately redelivers nacked messages,
//! so consumers must tolerate duplicates; the queue's lease discipline
//! absorbs them.

mod memory;
pub mod metrics;
mod redis_bus;

use async_trait::async_trait;

use crate::error::CrawlResult;
use crate::model::TaskMessage;

pub use memory::{MemorySubscription, MemoryTaskBus};
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use redis_bus::RedisTaskBus;

/// A delivered task plus its acknowledgement handle.
///
/// Dropping the delivery without settling it counts as a nack.
pub struct Delivery {
    pub message: TaskMessage,
    pub ack: AckHandle,
}

/// Settles a single delivery exactly once
pub struct AckHandle {
    settle: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl AckHandle {
    #[must_use]
    pub fn new(settle: Box<dyn FnOnce(bool) + Send>) -> Self {
        Self {
            settle: Some(settle),
        }
    }

    /// Acknowledge: the task reached a terminal transition
    pub fn ack(mut self) {
        if let Some(settle) = self.settle.take() {
            settle(true);
        }
    }

    /// Negative-acknowledge: redeliver later
    pub fn nack(mut self) {
        if let Some(settle) = self.settle.take() {
            settle(false);
        }
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        // Unsettled deliveries are redelivered
        if let Some(settle) = self.settle.take() {
            settle(false);
        }
    }
}

#[async_trait]
pub trait TaskBus: Send + Sync {
    /// Publish one task
    async fn publish(&self, message: TaskMessage) -> CrawlResult<()>;

    /// Publish a batch; either the whole batch is accepted or an error is
    /// returned before any consumer observes it
    async fn publish_batch(&self, messages: Vec<TaskMessage>) -> CrawlResult<()>;

    /// Open a subscription. Multiple subscribers compete for deliveries.
    async fn subscribe(&self) -> CrawlResult<Box<dyn TaskSubscription>>;

    fn metrics(&self) -> &BusMetrics;
}

#[async_trait]
pub trait TaskSubscription: Send {
    /// Next delivery; None means the bus shut down and drained
    async fn next(&mut self) -> Option<Delivery>;
}
