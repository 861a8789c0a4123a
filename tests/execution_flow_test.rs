//! End-to-end execution flows over the in-memory queue, bus, and cache with
//! canned pages behind the static browser.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crawlgrid::browser::{StaticBrowser, StaticSite};
use crawlgrid::bus::{MemoryTaskBus, TaskBus};
use crawlgrid::cache::{Cache, MemoryCache};
use crawlgrid::error::CrawlResult;
use crawlgrid::model::{
    NewQueueItem, NodeExecution, NodeExecutionStatus, QueueItemStatus, TaskMessage, TaskMetadata,
    WorkflowConfig,
};
use crawlgrid::nodes::{NodeRegistry, PluginRegistry};
use crawlgrid::queue::{MemoryUrlQueue, UrlDeduplicator, UrlQueue, is_drained};
use crawlgrid::recovery::{DomainBlockList, NoopAdvisor, ProxyPool, RecoveryEngine};
use crawlgrid::store::NodeExecutionSink;
use crawlgrid::telemetry::{BatchedItemWriter, ErrorReporter, ItemSink, MemoryItemSink, StatsReporter};
use crawlgrid::tracker::{CompletionNotifier, CompletionTracker, outstanding_key};
use crawlgrid::worker::{Worker, WorkerInner, WorkerOptions, WorkerShutdown};

#[derive(Default)]
struct RecordingNotifier {
    completed: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl CompletionNotifier for RecordingNotifier {
    async fn execution_completed(&self, execution_id: Uuid) -> CrawlResult<()> {
        self.completed.lock().push(execution_id);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingAuditSink {
    records: Mutex<Vec<NodeExecution>>,
}

#[async_trait]
impl NodeExecutionSink for RecordingAuditSink {
    async fn insert_batch(&self, records: &[NodeExecution]) -> CrawlResult<()> {
        self.records.lock().extend_from_slice(records);
        Ok(())
    }
}

struct Harness {
    queue: Arc<MemoryUrlQueue>,
    bus: Arc<MemoryTaskBus>,
    cache: Arc<MemoryCache>,
    sink: Arc<MemoryItemSink>,
    items: Arc<BatchedItemWriter>,
    stats: Arc<StatsReporter>,
    errors: Arc<ErrorReporter>,
    tracker: Arc<CompletionTracker>,
    notifier: Arc<RecordingNotifier>,
    audit: Arc<RecordingAuditSink>,
    shutdown: WorkerShutdown,
}

fn harness(site: Arc<StaticSite>) -> Harness {
    let queue = Arc::new(MemoryUrlQueue::new());
    let bus = Arc::new(MemoryTaskBus::new());
    let cache = Arc::new(MemoryCache::new());
    let sink = Arc::new(MemoryItemSink::new());
    let items = Arc::new(BatchedItemWriter::new(
        Arc::clone(&sink) as Arc<dyn ItemSink>
    ));
    let stats = Arc::new(StatsReporter::new("http://127.0.0.1:1", "test-worker"));
    let errors = Arc::new(ErrorReporter::new("http://127.0.0.1:1"));
    let notifier = Arc::new(RecordingNotifier::default());
    let tracker = Arc::new(CompletionTracker::new(
        Arc::clone(&cache) as Arc<dyn Cache>,
        Arc::clone(&notifier) as Arc<dyn CompletionNotifier>,
    ));
    let audit = Arc::new(RecordingAuditSink::default());
    let recovery = Arc::new(RecoveryEngine::new(
        Arc::new(DomainBlockList::new()),
        ProxyPool::new(Vec::new()),
        Arc::new(NoopAdvisor),
        3,
    ));

    let inner = Arc::new(WorkerInner::new(
        WorkerOptions {
            worker_id: "test-worker".into(),
            concurrency: 4,
            default_node_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
        },
        Arc::clone(&queue) as Arc<dyn UrlQueue>,
        Arc::clone(&bus) as Arc<dyn TaskBus>,
        Arc::clone(&cache) as Arc<dyn Cache>,
        Arc::new(StaticBrowser::new(site)),
        Arc::new(NodeRegistry::new(Arc::new(PluginRegistry::new()))),
        Arc::new(UrlDeduplicator::probabilistic()),
        Arc::clone(&tracker),
        Arc::clone(&stats),
        Arc::clone(&errors),
        Arc::clone(&items),
        recovery,
        Some(Arc::clone(&audit) as Arc<dyn NodeExecutionSink>),
    ));

    let worker = Worker::new(inner);
    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        let _ = worker.run().await;
    });

    Harness {
        queue,
        bus,
        cache,
        sink,
        items,
        stats,
        errors,
        tracker,
        notifier,
        audit,
        shutdown,
    }
}

/// Seed the queue, counter, and bus the way the orchestrator does
async fn start_execution(harness: &Harness, config: &WorkflowConfig) -> Uuid {
    let execution_id = Uuid::new_v4();
    let first_phase = config.first_phase().expect("phases");

    let seeds: Vec<NewQueueItem> = config
        .start_urls
        .iter()
        .map(|url| NewQueueItem::seed(execution_id, url, &first_phase.id).expect("seed"))
        .collect();
    let inserted = harness.queue.enqueue_batch(&seeds).await.expect("seed enqueue");

    harness
        .cache
        .incr_by(&outstanding_key(execution_id), inserted as i64)
        .await
        .expect("seed counter");

    let metadata = TaskMetadata {
        phases: config.phases.clone(),
        node_profiles: HashMap::new(),
        max_depth: config.max_depth,
        rate_limit_delay: config.rate_limit_delay,
    };
    let tasks: Vec<TaskMessage> = seeds
        .iter()
        .map(|seed| TaskMessage {
            task_id: Uuid::new_v4(),
            execution_id,
            workflow_id: Uuid::new_v4(),
            url: seed.url.clone(),
            depth: 0,
            parent_url_id: None,
            marker: String::new(),
            phase_id: first_phase.id.clone(),
            phase_config: first_phase.clone(),
            workflow_config: None,
            metadata: metadata.clone(),
            retry_count: 0,
            browser_profile_id: None,
            proxy_url: None,
            proxy_id: None,
        })
        .collect();
    harness.bus.publish_batch(tasks).await.expect("publish seeds");

    execution_id
}

/// Poll until the queue holds only terminal rows, then flush the batchers
async fn run_to_completion(harness: &Harness, execution_id: Uuid) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = harness.queue.stats(execution_id).await.expect("stats");
        if !stats.is_empty() && is_drained(&stats) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution did not drain: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // Let in-flight settlement finish before reading counters
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.items.flush().await.expect("items flush");
    harness.tracker.flush().await.expect("tracker flush");
}

fn parse_config(raw: serde_json::Value) -> WorkflowConfig {
    WorkflowConfig::from_json(&raw).expect("valid workflow config")
}

#[tokio::test]
async fn seed_only_extraction() {
    let site = StaticSite::new();
    site.add_page(
        "https://example.com/item",
        r#"<html><body><h1>Acme Widget</h1></body></html>"#,
    );
    let harness = harness(Arc::new(site));

    let config = parse_config(serde_json::json!({
        "start_urls": ["https://example.com/item"],
        "phases": [{
            "id": "extract",
            "type": "extraction",
            "nodes": [
                {"id": "nav", "type": "navigate"},
                {"id": "fields", "type": "extract", "params": {
                    "item_type": "product",
                    "fields": {"title": {"selector": "h1"}}
                }}
            ]
        }]
    }));

    let execution = start_execution(&harness, &config).await;
    run_to_completion(&harness, execution).await;

    let stats = harness.queue.stats(execution).await.expect("stats");
    assert_eq!(stats.get(&QueueItemStatus::Completed), Some(&1));

    let written = harness.sink.written.lock();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].title.as_deref(), Some("Acme Widget"));

    let audit = harness.audit.records.lock();
    assert_eq!(audit.len(), 2);
    assert!(
        audit
            .iter()
            .all(|r| r.status == NodeExecutionStatus::Completed)
    );

    let totals = harness.stats.peek(execution);
    assert_eq!(totals.urls_processed, 1);
    assert_eq!(totals.items_extracted, 1);

    harness.shutdown.shutdown();
}

#[tokio::test]
async fn two_phase_discovery_then_extraction() {
    let site = StaticSite::new();
    let cards: String = (1..=10)
        .map(|i| format!(r#"<div class="card"><a href="/p/{i}">Product {i}</a></div>"#))
        .collect();
    site.add_page(
        "https://site.test/list",
        &format!("<html><body>{cards}</body></html>"),
    );
    for i in 1..=10 {
        site.add_page(
            &format!("https://site.test/p/{i}"),
            &format!(
                r#"<html><body><h1>Product {i}</h1>
                   <span class="price">${i}9.99</span>
                   <span class="stock">in stock</span></body></html>"#
            ),
        );
    }
    let harness = harness(Arc::new(site));

    let config = parse_config(serde_json::json!({
        "start_urls": ["https://site.test/list"],
        "phases": [
            {
                "id": "discover",
                "type": "discovery",
                "nodes": [
                    {"id": "nav", "type": "navigate"},
                    {"id": "links", "type": "extract_links", "params": {
                        "selector": ".card a", "marker": "product"
                    }}
                ],
                "transition": {"next_phase": "extract"}
            },
            {
                "id": "extract",
                "type": "extraction",
                "url_filter": {"markers": ["product"]},
                "nodes": [
                    {"id": "nav", "type": "navigate"},
                    {"id": "fields", "type": "extract", "params": {
                        "item_type": "product",
                        "fields": {
                            "title": {"selector": "h1"},
                            "price": {"selector": ".price", "transform": "number"},
                            "availability": {"selector": ".stock"}
                        }
                    }}
                ]
            }
        ]
    }));

    let execution = start_execution(&harness, &config).await;
    run_to_completion(&harness, execution).await;

    let stats = harness.queue.stats(execution).await.expect("stats");
    assert_eq!(stats.get(&QueueItemStatus::Completed), Some(&11));

    let written = harness.sink.written.lock();
    assert_eq!(written.len(), 10);
    assert!(written.iter().all(|item| item.price.is_some()));

    let totals = harness.stats.peek(execution);
    assert_eq!(totals.urls_processed, 11);
    assert_eq!(totals.urls_discovered, 10);
    assert_eq!(totals.items_extracted, 10);
    assert_eq!(totals.phases.get("discover"), Some(&1));
    assert_eq!(totals.phases.get("extract"), Some(&10));

    // Every product row hangs off the seed with depth 1
    drop(written);
    let rows = harness.queue.snapshot(execution);
    let seed_row = rows
        .iter()
        .find(|row| row.url == "https://site.test/list")
        .expect("seed row");
    let product_rows: Vec<_> = rows.iter().filter(|row| row.depth == 1).collect();
    assert_eq!(product_rows.len(), 10);
    assert!(
        product_rows
            .iter()
            .all(|row| row.parent_url_id == Some(seed_row.id)
                && row.marker == "product"
                && row.discovered_by_node.as_deref() == Some("links"))
    );

    harness.shutdown.shutdown();
}

#[tokio::test]
async fn depth_cap_drops_second_level_links() {
    let site = StaticSite::new();
    site.add_page(
        "https://site.test/list",
        r#"<div class="card"><a href="/p/1">One</a></div>"#,
    );
    site.add_page(
        "https://site.test/p/1",
        r#"<h1>One</h1><div class="related"><a href="/p/2">Two</a></div>"#,
    );
    site.add_page("https://site.test/p/2", r"<h1>Two</h1>");
    let harness = harness(Arc::new(site));

    let config = parse_config(serde_json::json!({
        "start_urls": ["https://site.test/list"],
        "max_depth": 1,
        "phases": [
            {
                "id": "discover",
                "type": "discovery",
                "nodes": [
                    {"id": "nav", "type": "navigate"},
                    {"id": "links", "type": "extract_links", "params": {
                        "selector": ".card a", "marker": "product"
                    }}
                ],
                "transition": {"next_phase": "extract"}
            },
            {
                "id": "extract",
                "type": "extraction",
                "url_filter": {"markers": ["product"]},
                "nodes": [
                    {"id": "nav", "type": "navigate"},
                    {"id": "fields", "type": "extract", "params": {
                        "fields": {"title": {"selector": "h1"}}
                    }},
                    {"id": "related", "type": "extract_links", "params": {
                        "selector": ".related a", "marker": "product"
                    }}
                ]
            }
        ]
    }));

    let execution = start_execution(&harness, &config).await;
    run_to_completion(&harness, execution).await;

    let stats = harness.queue.stats(execution).await.expect("stats");
    // Seed + product complete; the depth-2 related link lands skipped
    assert_eq!(stats.get(&QueueItemStatus::Completed), Some(&2));
    assert_eq!(stats.get(&QueueItemStatus::Skipped), Some(&1));

    let totals = harness.stats.peek(execution);
    assert_eq!(totals.urls_processed, 2, "skipped rows are not processed");

    harness.shutdown.shutdown();
}

#[tokio::test]
async fn retry_then_succeed_on_server_error() {
    let site = StaticSite::new();
    site.add_response("https://example.com/item", 503, "<html>try later</html>");
    site.add_response(
        "https://example.com/item",
        200,
        "<html><h1>Recovered</h1></html>",
    );
    let harness = harness(Arc::new(site));

    let config = parse_config(serde_json::json!({
        "start_urls": ["https://example.com/item"],
        "phases": [{
            "id": "extract",
            "type": "extraction",
            "nodes": [
                {"id": "nav", "type": "navigate"},
                {"id": "fields", "type": "extract", "params": {
                    "fields": {"title": {"selector": "h1"}}
                }}
            ]
        }]
    }));

    let execution = start_execution(&harness, &config).await;
    run_to_completion(&harness, execution).await;

    let stats = harness.queue.stats(execution).await.expect("stats");
    assert_eq!(stats.get(&QueueItemStatus::Completed), Some(&1));

    // The queue row carries the retry; stats carry the error
    let totals = harness.stats.peek(execution);
    assert_eq!(totals.urls_processed, 1);
    assert_eq!(totals.errors, 1);
    assert_eq!(harness.errors.buffered_count(execution), 1);

    let written = harness.sink.written.lock();
    assert_eq!(written[0].title.as_deref(), Some("Recovered"));

    harness.shutdown.shutdown();
}

#[tokio::test]
async fn parallel_discoveries_dedup_to_one_row() {
    let site = StaticSite::new();
    site.add_page(
        "https://site.test/list-a",
        r#"<div class="card"><a href="/p/42">Hot</a></div>"#,
    );
    site.add_page(
        "https://site.test/list-b",
        r#"<div class="card"><a href="/p/42">Hot</a></div>"#,
    );
    site.add_page("https://site.test/p/42", r"<h1>Hot Item</h1>");
    let harness = harness(Arc::new(site));

    let config = parse_config(serde_json::json!({
        "start_urls": ["https://site.test/list-a", "https://site.test/list-b"],
        "phases": [
            {
                "id": "discover",
                "type": "discovery",
                "nodes": [
                    {"id": "nav", "type": "navigate"},
                    {"id": "links", "type": "extract_links", "params": {
                        "selector": ".card a", "marker": "product"
                    }}
                ],
                "transition": {"next_phase": "extract"}
            },
            {
                "id": "extract",
                "type": "extraction",
                "url_filter": {"markers": ["product"]},
                "nodes": [
                    {"id": "nav", "type": "navigate"},
                    {"id": "fields", "type": "extract", "params": {
                        "fields": {"title": {"selector": "h1"}}
                    }}
                ]
            }
        ]
    }));

    let execution = start_execution(&harness, &config).await;
    run_to_completion(&harness, execution).await;

    let stats = harness.queue.stats(execution).await.expect("stats");
    // 2 seeds + exactly one row for p/42
    let total_rows: i64 = stats.values().sum();
    assert_eq!(total_rows, 3);
    assert_eq!(stats.get(&QueueItemStatus::Completed), Some(&3));

    // Raw discovery count reflects both sightings
    let totals = harness.stats.peek(execution);
    assert_eq!(totals.urls_discovered, 2);

    let written = harness.sink.written.lock();
    assert_eq!(written.len(), 1);

    harness.shutdown.shutdown();
}

#[tokio::test]
async fn completion_detection_signals_once_drained() {
    let site = StaticSite::new();
    for seed in ["a", "b", "c"] {
        site.add_page(
            &format!("https://site.test/seed-{seed}"),
            &format!(
                r#"<div class="card"><a href="/child-{seed}-1">1</a></div>
                   <div class="card"><a href="/child-{seed}-2">2</a></div>"#
            ),
        );
        for child in 1..=2 {
            site.add_page(
                &format!("https://site.test/child-{seed}-{child}"),
                r"<h1>leaf</h1>",
            );
        }
    }
    let harness = harness(Arc::new(site));

    let config = parse_config(serde_json::json!({
        "start_urls": [
            "https://site.test/seed-a",
            "https://site.test/seed-b",
            "https://site.test/seed-c"
        ],
        "phases": [
            {
                "id": "discover",
                "type": "discovery",
                "nodes": [
                    {"id": "nav", "type": "navigate"},
                    {"id": "links", "type": "extract_links", "params": {
                        "selector": ".card a", "marker": "child"
                    }}
                ],
                "transition": {"next_phase": "leaves"}
            },
            {
                "id": "leaves",
                "type": "extraction",
                "url_filter": {"markers": ["child"]},
                "nodes": [
                    {"id": "nav", "type": "navigate"},
                    {"id": "fields", "type": "extract", "params": {
                        "fields": {"title": {"selector": "h1"}}
                    }}
                ]
            }
        ]
    }));

    let execution = start_execution(&harness, &config).await;
    run_to_completion(&harness, execution).await;

    let stats = harness.queue.stats(execution).await.expect("stats");
    let total_rows: i64 = stats.values().sum();
    assert_eq!(total_rows, 9, "3 seeds + 6 children");
    assert_eq!(stats.get(&QueueItemStatus::Completed), Some(&9));

    // Counter drained to zero and the completion signal fired exactly once
    assert_eq!(
        harness.tracker.get_outstanding(execution).await.expect("read"),
        0
    );
    let completions = harness.notifier.completed.lock();
    assert_eq!(completions.as_slice(), &[execution]);

    harness.shutdown.shutdown();
}

#[tokio::test]
async fn stopped_executions_skip_work() {
    let site = StaticSite::new();
    site.add_page("https://site.test/item", r"<h1>never visited</h1>");
    let harness = harness(Arc::new(site));

    let config = parse_config(serde_json::json!({
        "start_urls": ["https://site.test/item"],
        "phases": [{
            "id": "extract",
            "type": "extraction",
            "nodes": [
                {"id": "nav", "type": "navigate"},
                {"id": "fields", "type": "extract", "params": {
                    "fields": {"title": {"selector": "h1"}}
                }}
            ]
        }]
    }));

    // Flag the execution stopped before the worker sees the task
    let execution_id = Uuid::new_v4();
    harness
        .cache
        .incr_by(&crawlgrid::tracker::stopped_key(execution_id), 1)
        .await
        .expect("stop flag");

    let first_phase = config.first_phase().expect("phase");
    let seed = NewQueueItem::seed(execution_id, "https://site.test/item", &first_phase.id)
        .expect("seed");
    harness.queue.enqueue(&seed).await.expect("enqueue");
    harness
        .bus
        .publish(TaskMessage {
            task_id: Uuid::new_v4(),
            execution_id,
            workflow_id: Uuid::new_v4(),
            url: seed.url.clone(),
            depth: 0,
            parent_url_id: None,
            marker: String::new(),
            phase_id: first_phase.id.clone(),
            phase_config: first_phase.clone(),
            workflow_config: None,
            metadata: TaskMetadata {
                phases: config.phases.clone(),
                node_profiles: HashMap::new(),
                max_depth: config.max_depth,
                rate_limit_delay: 0,
            },
            retry_count: 0,
            browser_profile_id: None,
            proxy_url: None,
            proxy_id: None,
        })
        .await
        .expect("publish");

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Nothing was extracted and the row is untouched pending
    assert!(harness.sink.written.lock().is_empty());
    let stats = harness.queue.stats(execution_id).await.expect("stats");
    assert_eq!(stats.get(&QueueItemStatus::Pending), Some(&1));

    harness.shutdown.shutdown();
}
