//! Redis-list task bus adapter.
//!
//! Publish pushes serialized tasks onto a list; subscribers block-pop and
//! compete. A nack pushes the message back, which together with the queue's
//! lease discipline gives effective at-least-once behavior. Deployments
//! with a managed pub/sub transport swap this adapter out behind the same
//! trait.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::bus::{AckHandle, BusMetrics, Delivery, TaskBus, TaskSubscription};
use crate::error::{CrawlError, CrawlResult};
use crate::model::TaskMessage;

/// Blocking-pop timeout; the loop re-arms after each expiry
const POP_TIMEOUT_SECS: f64 = 5.0;

pub struct RedisTaskBus {
    manager: ConnectionManager,
    list_key: String,
    metrics: BusMetrics,
}

impl RedisTaskBus {
    pub async fn connect(url: &str, subscription: &str) -> CrawlResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| CrawlError::Bus(format!("open: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CrawlError::Bus(format!("connect: {e}")))?;
        Ok(Self {
            manager,
            list_key: format!("bus:{subscription}"),
            metrics: BusMetrics::new(),
        })
    }

    fn encode(message: &TaskMessage) -> CrawlResult<String> {
        serde_json::to_string(message).map_err(|e| CrawlError::Bus(format!("encode: {e}")))
    }
}

#[async_trait]
impl TaskBus for RedisTaskBus {
    async fn publish(&self, message: TaskMessage) -> CrawlResult<()> {
        let payload = Self::encode(&message)?;
        let mut conn = self.manager.clone();
        let _: () = conn
            .lpush(&self.list_key, payload)
            .await
            .map_err(|e| CrawlError::Bus(format!("lpush: {e}")))?;
        self.metrics.increment_published(1);
        Ok(())
    }

    async fn publish_batch(&self, messages: Vec<TaskMessage>) -> CrawlResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut payloads = Vec::with_capacity(messages.len());
        for message in &messages {
            payloads.push(Self::encode(message)?);
        }
        let mut conn = self.manager.clone();
        let count = payloads.len() as u64;
        let _: () = conn
            .lpush(&self.list_key, payloads)
            .await
            .map_err(|e| CrawlError::Bus(format!("lpush batch: {e}")))?;
        self.metrics.increment_published(count);
        Ok(())
    }

    async fn subscribe(&self) -> CrawlResult<Box<dyn TaskSubscription>> {
        Ok(Box::new(RedisSubscription {
            manager: self.manager.clone(),
            list_key: self.list_key.clone(),
            metrics: self.metrics.clone(),
        }))
    }

    fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }
}

pub struct RedisSubscription {
    manager: ConnectionManager,
    list_key: String,
    metrics: BusMetrics,
}

#[async_trait]
impl TaskSubscription for RedisSubscription {
    async fn next(&mut self) -> Option<Delivery> {
        loop {
            let popped: Result<Option<(String, String)>, redis::RedisError> = self
                .manager
                .brpop(&self.list_key, POP_TIMEOUT_SECS)
                .await;

            let payload = match popped {
                Ok(Some((_key, payload))) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!("bus pop failed: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            let message: TaskMessage = match serde_json::from_str(&payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!("dropping undecodable bus message: {e}");
                    continue;
                }
            };
            self.metrics.increment_delivered();

            let metrics = self.metrics.clone();
            let manager = self.manager.clone();
            let list_key = self.list_key.clone();
            let redelivery_copy = payload;
            let ack = AckHandle::new(Box::new(move |acked| {
                if acked {
                    metrics.increment_acked();
                    return;
                }
                metrics.increment_redelivered();
                // Settlement callbacks are synchronous; hand the re-push to
                // the runtime
                let mut conn = manager.clone();
                tokio::spawn(async move {
                    let outcome: Result<(), redis::RedisError> =
                        conn.lpush(&list_key, redelivery_copy).await;
                    if let Err(e) = outcome {
                        warn!("nack re-push failed: {e}");
                    }
                });
            }));

            return Some(Delivery { message, ack });
        }
    }
}
