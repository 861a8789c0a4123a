//! In-process task bus with competing consumers and nack redelivery.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bus::{AckHandle, BusMetrics, Delivery, TaskBus, TaskSubscription};
use crate::error::{CrawlError, CrawlResult};
use crate::model::TaskMessage;

pub struct MemoryTaskBus {
    tx: Mutex<Option<mpsc::UnboundedSender<TaskMessage>>>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskMessage>>>,
    metrics: BusMetrics,
}

impl Default for MemoryTaskBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            metrics: BusMetrics::new(),
        }
    }

    /// Stop accepting publishes; subscribers drain what is buffered and then
    /// observe end-of-stream
    pub fn shutdown(&self) {
        self.tx.lock().take();
    }

    fn sender(&self) -> CrawlResult<mpsc::UnboundedSender<TaskMessage>> {
        self.tx
            .lock()
            .clone()
            .ok_or_else(|| CrawlError::Bus("bus is shut down".into()))
    }
}

#[async_trait]
impl TaskBus for MemoryTaskBus {
    async fn publish(&self, message: TaskMessage) -> CrawlResult<()> {
        self.sender()
            .and_then(|tx| {
                tx.send(message)
                    .map_err(|e| CrawlError::Bus(format!("send: {e}")))
            })?;
        self.metrics.increment_published(1);
        Ok(())
    }

    async fn publish_batch(&self, messages: Vec<TaskMessage>) -> CrawlResult<()> {
        let tx = self.sender()?;
        let count = messages.len() as u64;
        for message in messages {
            tx.send(message)
                .map_err(|e| CrawlError::Bus(format!("send: {e}")))?;
        }
        self.metrics.increment_published(count);
        Ok(())
    }

    async fn subscribe(&self) -> CrawlResult<Box<dyn TaskSubscription>> {
        Ok(Box::new(MemorySubscription {
            rx: Arc::clone(&self.rx),
            redeliver: self.tx.lock().clone(),
            metrics: self.metrics.clone(),
        }))
    }

    fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }
}

pub struct MemorySubscription {
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskMessage>>>,
    redeliver: Option<mpsc::UnboundedSender<TaskMessage>>,
    metrics: BusMetrics,
}

#[async_trait]
impl TaskSubscription for MemorySubscription {
    async fn next(&mut self) -> Option<Delivery> {
        let message = self.rx.lock().await.recv().await?;
        self.metrics.increment_delivered();

        let redeliver = self.redeliver.clone();
        let metrics = self.metrics.clone();
        let redelivery_copy = message.clone();
        let ack = AckHandle::new(Box::new(move |acked| {
            if acked {
                metrics.increment_acked();
            } else {
                metrics.increment_redelivered();
                if let Some(tx) = redeliver {
                    debug!(task_id = %redelivery_copy.task_id, "redelivering nacked task");
                    let _ = tx.send(redelivery_copy);
                }
            }
        }));

        Some(Delivery { message, ack })
    }
}
