//! Batched extracted-item persistence.
//!
//! `ItemSink` is the write strategy seam: bulk multi-row INSERT or a
//! COPY stream, both conforming. `BatchedItemWriter` buffers appends and
//! flushes to whichever sink it was built with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::{PgPool, PgPoolCopyExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{CrawlError, CrawlResult};
use crate::model::ExtractedItem;

/// Rows per flush for the INSERT strategy
const INSERT_BATCH_SIZE: usize = 500;
/// Rows per flush for the COPY strategy
const COPY_BATCH_SIZE: usize = 1000;

#[async_trait]
pub trait ItemSink: Send + Sync {
    async fn write_batch(&self, items: &[ExtractedItem]) -> CrawlResult<()>;

    /// Preferred rows per flush
    fn batch_size(&self) -> usize {
        INSERT_BATCH_SIZE
    }
}

/// Bulk multi-row INSERT via UNNEST
pub struct PgInsertItemWriter {
    pool: PgPool,
}

impl PgInsertItemWriter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemSink for PgInsertItemWriter {
    async fn write_batch(&self, items: &[ExtractedItem]) -> CrawlResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut ids = Vec::with_capacity(items.len());
        let mut execution_ids = Vec::with_capacity(items.len());
        let mut workflow_ids = Vec::with_capacity(items.len());
        let mut queue_item_ids = Vec::with_capacity(items.len());
        let mut node_execution_ids: Vec<Option<uuid::Uuid>> = Vec::with_capacity(items.len());
        let mut item_types = Vec::with_capacity(items.len());
        let mut titles: Vec<Option<String>> = Vec::with_capacity(items.len());
        let mut prices: Vec<Option<f64>> = Vec::with_capacity(items.len());
        let mut currencies: Vec<Option<String>> = Vec::with_capacity(items.len());
        let mut availabilities: Vec<Option<String>> = Vec::with_capacity(items.len());
        let mut ratings: Vec<Option<f64>> = Vec::with_capacity(items.len());
        let mut review_counts: Vec<Option<i64>> = Vec::with_capacity(items.len());
        let mut attributes = Vec::with_capacity(items.len());
        for item in items {
            ids.push(item.id);
            execution_ids.push(item.execution_id);
            workflow_ids.push(item.workflow_id);
            queue_item_ids.push(item.url_queue_item_id);
            node_execution_ids.push(item.node_execution_id);
            item_types.push(item.item_type.clone());
            titles.push(item.title.clone());
            prices.push(item.price);
            currencies.push(item.currency.clone());
            availabilities.push(item.availability.clone());
            ratings.push(item.rating);
            review_counts.push(item.review_count);
            attributes.push(item.attributes.to_string());
        }

        sqlx::query(
            r"
            INSERT INTO extracted_items (
                id, execution_id, workflow_id, url_queue_item_id,
                node_execution_id, item_type, title, price, currency,
                availability, rating, review_count, attributes, extracted_at
            )
            SELECT u.id, u.execution_id, u.workflow_id, u.url_queue_item_id,
                   u.node_execution_id, u.item_type, u.title, u.price,
                   u.currency, u.availability, u.rating, u.review_count,
                   u.attributes::jsonb, now()
            FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::uuid[], $4::uuid[], $5::uuid[],
                $6::text[], $7::text[], $8::float8[], $9::text[], $10::text[],
                $11::float8[], $12::int8[], $13::text[]
            ) AS u(id, execution_id, workflow_id, url_queue_item_id,
                   node_execution_id, item_type, title, price, currency,
                   availability, rating, review_count, attributes)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(&ids)
        .bind(&execution_ids)
        .bind(&workflow_ids)
        .bind(&queue_item_ids)
        .bind(&node_execution_ids)
        .bind(&item_types)
        .bind(&titles)
        .bind(&prices)
        .bind(&currencies)
        .bind(&availabilities)
        .bind(&ratings)
        .bind(&review_counts)
        .bind(&attributes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// COPY-stream writer: one CSV payload per flush
pub struct PgCopyItemWriter {
    pool: PgPool,
}

impl PgCopyItemWriter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemSink for PgCopyItemWriter {
    async fn write_batch(&self, items: &[ExtractedItem]) -> CrawlResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut payload = String::new();
        for item in items {
            let row = [
                item.id.to_string(),
                item.execution_id.to_string(),
                item.workflow_id.to_string(),
                item.url_queue_item_id.to_string(),
                item.node_execution_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                item.item_type.clone(),
                item.title.clone().unwrap_or_default(),
                item.price.map(|p| p.to_string()).unwrap_or_default(),
                item.currency.clone().unwrap_or_default(),
                item.availability.clone().unwrap_or_default(),
                item.rating.map(|r| r.to_string()).unwrap_or_default(),
                item.review_count
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
                item.attributes.to_string(),
                item.extracted_at.to_rfc3339(),
            ];
            let escaped: Vec<String> = row.iter().map(|field| csv_escape(field)).collect();
            payload.push_str(&escaped.join(","));
            payload.push('\n');
        }

        let mut copy = self
            .pool
            .copy_in_raw(
                r"COPY extracted_items (
                    id, execution_id, workflow_id, url_queue_item_id,
                    node_execution_id, item_type, title, price, currency,
                    availability, rating, review_count, attributes, extracted_at
                ) FROM STDIN WITH (FORMAT csv)",
            )
            .await?;
        copy.send(payload.as_bytes()).await?;
        copy.finish().await?;

        Ok(())
    }

    fn batch_size(&self) -> usize {
        COPY_BATCH_SIZE
    }
}

fn csv_escape(field: &str) -> String {
    if field.is_empty() {
        // Empty unquoted fields are NULL under COPY csv
        String::new()
    } else if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// In-memory sink for tests and dry runs
#[derive(Default)]
pub struct MemoryItemSink {
    pub written: Mutex<Vec<ExtractedItem>>,
}

impl MemoryItemSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ItemSink for MemoryItemSink {
    async fn write_batch(&self, items: &[ExtractedItem]) -> CrawlResult<()> {
        self.written.lock().extend_from_slice(items);
        Ok(())
    }
}

/// Buffered writer in front of a sink
pub struct BatchedItemWriter {
    sink: Arc<dyn ItemSink>,
    buffer: Mutex<Vec<ExtractedItem>>,
}

impl BatchedItemWriter {
    #[must_use]
    pub fn new(sink: Arc<dyn ItemSink>) -> Self {
        Self {
            sink,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, items: Vec<ExtractedItem>) {
        self.buffer.lock().extend(items);
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Write buffered items in sink-sized chunks; re-buffers what failed
    pub async fn flush(&self) -> CrawlResult<()> {
        let pending = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let batch_size = self.sink.batch_size().max(1);
        let mut written = 0usize;
        for chunk in pending.chunks(batch_size) {
            if let Err(e) = self.sink.write_batch(chunk).await {
                warn!("item batch write failed, re-buffering: {e}");
                self.buffer.lock().extend_from_slice(&pending[written..]);
                return Err(e);
            }
            written += chunk.len();
        }

        debug!(rows = written, "item batches flushed");
        Ok(())
    }

    pub fn spawn_flush_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let writer = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(super::flush_jitter(interval)).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = writer.flush().await {
                    warn!("item flush loop: {e}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn item() -> ExtractedItem {
        let mut fields = serde_json::Map::new();
        fields.insert("title".into(), json!("Widget, \"Deluxe\""));
        ExtractedItem::from_fields(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            "product",
            fields,
        )
    }

    #[tokio::test]
    async fn empty_buffer_flushes_to_noop() {
        let sink = Arc::new(MemoryItemSink::new());
        let writer = BatchedItemWriter::new(Arc::clone(&sink) as Arc<dyn ItemSink>);
        writer.flush().await.expect("flush");
        assert!(sink.written.lock().is_empty());
    }

    #[tokio::test]
    async fn appends_reach_sink_on_flush() {
        let sink = Arc::new(MemoryItemSink::new());
        let writer = BatchedItemWriter::new(Arc::clone(&sink) as Arc<dyn ItemSink>);
        writer.append(vec![item(), item()]);
        writer.flush().await.expect("flush");
        assert_eq!(sink.written.lock().len(), 2);
        assert_eq!(writer.buffered(), 0);
    }

    #[test]
    fn csv_escaping_quotes_specials() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape(""), "");
    }
}
