//! Recovery engine behavior against the in-memory queue.

use std::sync::Arc;

use crawlgrid::error::CrawlError;
use crawlgrid::model::{NewQueueItem, QueueItemStatus};
use crawlgrid::queue::{MemoryUrlQueue, UrlQueue};
use crawlgrid::recovery::{
    DomainBlockList, NoopAdvisor, ProxyConfig, ProxyPool, RecoveryAction, RecoveryEngine,
};
use uuid::Uuid;

const WORKER: &str = "w1";

fn engine_with(proxies: Vec<ProxyConfig>, retry_cap: i32) -> RecoveryEngine {
    RecoveryEngine::new(
        Arc::new(DomainBlockList::new()),
        ProxyPool::new(proxies),
        Arc::new(NoopAdvisor),
        retry_cap,
    )
}

async fn claimed_item(
    queue: &MemoryUrlQueue,
    url: &str,
) -> crawlgrid::model::UrlQueueItem {
    let execution = Uuid::new_v4();
    queue
        .enqueue(&NewQueueItem::seed(execution, url, "phase-a").expect("seed"))
        .await
        .expect("enqueue");
    queue
        .dequeue(execution, WORKER)
        .await
        .expect("dequeue")
        .expect("item")
}

#[tokio::test]
async fn server_error_retries_until_the_cap_then_dlq() {
    let queue = MemoryUrlQueue::new();
    let engine = engine_with(Vec::new(), 2);
    let error = CrawlError::Http {
        status: 503,
        url: "https://site.test/p/1".into(),
    };

    let mut item = claimed_item(&queue, "https://site.test/p/1").await;
    loop {
        let outcome = engine
            .handle(&queue, &item, WORKER, &error, Some(503), None)
            .await
            .expect("recovery");

        match outcome.action {
            RecoveryAction::Retry => {
                item = queue
                    .dequeue(item.execution_id, WORKER)
                    .await
                    .expect("dequeue")
                    .expect("retried item comes back");
            }
            RecoveryAction::SendToDlq { category } => {
                assert_eq!(category, "retry_cap_exceeded");
                break;
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    let row = queue.get(item.id).await.expect("get").expect("row");
    assert_eq!(row.status, QueueItemStatus::Failed);
    assert_eq!(row.retry_count, 3);
}

#[tokio::test]
async fn rate_limit_pauses_intake_and_requeues() {
    let queue = MemoryUrlQueue::new();
    let engine = engine_with(Vec::new(), 3);
    let item = claimed_item(&queue, "https://site.test/p/1").await;

    let error = CrawlError::Http {
        status: 429,
        url: item.url.clone(),
    };
    let outcome = engine
        .handle(&queue, &item, WORKER, &error, Some(429), None)
        .await
        .expect("recovery");

    assert!(matches!(outcome.action, RecoveryAction::AddDelay { .. }));
    assert!(outcome.pause_intake.is_some());

    let row = queue.get(item.id).await.expect("get").expect("row");
    assert_eq!(row.status, QueueItemStatus::Pending);
    assert_eq!(row.priority, -1);
}

#[tokio::test]
async fn captcha_blocks_the_domain() {
    let queue = MemoryUrlQueue::new();
    let engine = engine_with(Vec::new(), 3);
    let item = claimed_item(&queue, "https://walled.test/p/1").await;

    let error = CrawlError::Other("challenge page served".into());
    let outcome = engine
        .handle(
            &queue,
            &item,
            WORKER,
            &error,
            None,
            Some("<form class=\"g-recaptcha\">solve the captcha</form>"),
        )
        .await
        .expect("recovery");

    assert!(matches!(outcome.action, RecoveryAction::SkipDomain { .. }));
    assert!(engine.blocklist().is_blocked("walled.test"));
}

#[tokio::test]
async fn blocked_switches_to_a_healthy_proxy() {
    let queue = MemoryUrlQueue::new();
    let engine = engine_with(
        vec![
            ProxyConfig {
                id: "p1".into(),
                url: "http://proxy-1:3128".into(),
            },
            ProxyConfig {
                id: "p2".into(),
                url: "http://proxy-2:3128".into(),
            },
        ],
        3,
    );
    engine.proxies().record_failure("p1");

    let item = claimed_item(&queue, "https://site.test/p/1").await;
    let error = CrawlError::Http {
        status: 403,
        url: item.url.clone(),
    };
    let outcome = engine
        .handle(&queue, &item, WORKER, &error, Some(403), None)
        .await
        .expect("recovery");

    assert_eq!(outcome.action, RecoveryAction::SwitchProxy);
    assert_eq!(
        outcome.proxy.expect("proxy chosen").id,
        "p2",
        "the untried proxy wins over the failed one"
    );

    let row = queue.get(item.id).await.expect("get").expect("row");
    assert_eq!(row.status, QueueItemStatus::Pending);
}

#[tokio::test]
async fn settled_outcomes_feed_rule_counters() {
    let queue = MemoryUrlQueue::new();
    let engine = engine_with(Vec::new(), 5);
    let item = claimed_item(&queue, "https://site.test/p/1").await;

    let error = CrawlError::Timeout("page load".into());
    engine
        .handle(&queue, &item, WORKER, &error, None, None)
        .await
        .expect("recovery");

    engine.note_task_settled(item.execution_id, &item.url_hash, true);
    let (successes, failures) = engine
        .rules()
        .rule_counters("timeout-retry")
        .expect("rule exists");
    assert_eq!((successes, failures), (1, 0));
}
