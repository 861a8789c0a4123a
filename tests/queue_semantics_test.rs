//! URL queue semantics against the in-memory implementation, which mirrors
//! the Postgres queue's contract.

use std::time::Duration;

use crawlgrid::error::CrawlError;
use crawlgrid::model::{NewQueueItem, QueueItemStatus};
use crawlgrid::queue::{MemoryUrlQueue, UrlQueue, is_drained};
use uuid::Uuid;

fn seed(execution_id: Uuid, url: &str) -> NewQueueItem {
    NewQueueItem::seed(execution_id, url, "phase-a").expect("valid seed url")
}

#[tokio::test]
async fn enqueue_conflict_lifts_priority_without_duplicating() {
    let queue = MemoryUrlQueue::new();
    let execution = Uuid::new_v4();

    let mut first = seed(execution, "https://site.test/p/42");
    first.priority = 1;
    assert!(queue.enqueue(&first).await.expect("enqueue"));

    let mut second = seed(execution, "https://site.test/p/42");
    second.priority = 7;
    second.marker = "other".into();
    assert!(!queue.enqueue(&second).await.expect("enqueue"));

    let stats = queue.stats(execution).await.expect("stats");
    assert_eq!(stats.get(&QueueItemStatus::Pending), Some(&1));

    let item = queue
        .dequeue(execution, "w1")
        .await
        .expect("dequeue")
        .expect("item present");
    assert_eq!(item.priority, 7);
    // First discovery's fields win
    assert_eq!(item.marker, "");
}

#[tokio::test]
async fn conflicting_enqueue_resurrects_failed_rows() {
    let queue = MemoryUrlQueue::new();
    let execution = Uuid::new_v4();
    queue
        .enqueue(&seed(execution, "https://site.test/p/1"))
        .await
        .expect("enqueue");

    let item = queue
        .dequeue(execution, "w1")
        .await
        .expect("dequeue")
        .expect("item");
    queue
        .mark_failed(item.id, "w1", "boom", false)
        .await
        .expect("mark failed");

    assert!(!queue
        .enqueue(&seed(execution, "https://site.test/p/1"))
        .await
        .expect("enqueue"));

    let row = queue.get(item.id).await.expect("get").expect("row");
    assert_eq!(row.status, QueueItemStatus::Pending);
    assert_eq!(row.retry_count, 1);
}

#[tokio::test]
async fn dequeue_orders_by_priority_then_age() {
    let queue = MemoryUrlQueue::new();
    let execution = Uuid::new_v4();

    let mut low = seed(execution, "https://site.test/low");
    low.priority = 0;
    let mut high = seed(execution, "https://site.test/high");
    high.priority = 5;
    queue.enqueue(&low).await.expect("enqueue");
    queue.enqueue(&high).await.expect("enqueue");

    let first = queue
        .dequeue(execution, "w1")
        .await
        .expect("dequeue")
        .expect("item");
    assert_eq!(first.url, "https://site.test/high");

    let second = queue
        .dequeue(execution, "w1")
        .await
        .expect("dequeue")
        .expect("item");
    assert_eq!(second.url, "https://site.test/low");

    assert!(queue.dequeue(execution, "w1").await.expect("dequeue").is_none());
}

#[tokio::test]
async fn concurrent_dequeues_never_share_an_item() {
    let queue = std::sync::Arc::new(MemoryUrlQueue::new());
    let execution = Uuid::new_v4();
    for i in 0..20 {
        queue
            .enqueue(&seed(execution, &format!("https://site.test/p/{i}")))
            .await
            .expect("enqueue");
    }

    let mut handles = Vec::new();
    for w in 0..4 {
        let queue = std::sync::Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            let worker = format!("w{w}");
            let mut claimed = Vec::new();
            while let Some(item) = queue.dequeue(execution, &worker).await.expect("dequeue") {
                claimed.push(item.id);
            }
            claimed
        }));
    }

    let mut all: Vec<Uuid> = Vec::new();
    for handle in handles {
        all.extend(handle.await.expect("join"));
    }
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 20, "every item claimed exactly once");
}

#[tokio::test]
async fn only_the_lease_holder_transitions() {
    let queue = MemoryUrlQueue::new();
    let execution = Uuid::new_v4();
    queue
        .enqueue(&seed(execution, "https://site.test/p/1"))
        .await
        .expect("enqueue");

    let item = queue
        .dequeue(execution, "w1")
        .await
        .expect("dequeue")
        .expect("item");
    assert_eq!(item.lease_held_by.as_deref(), Some("w1"));

    let stolen = queue.mark_completed(item.id, "w2").await;
    assert!(matches!(stolen, Err(CrawlError::LeaseLost(_))));

    queue.mark_completed(item.id, "w1").await.expect("holder completes");
    // Idempotent for the holder
    queue
        .mark_completed(item.id, "w1")
        .await
        .expect("second completion is a no-op");
}

#[tokio::test]
async fn stale_leases_are_reclaimed_by_dequeue() {
    let queue = MemoryUrlQueue::with_lease_timeout(Duration::from_millis(20));
    let execution = Uuid::new_v4();
    queue
        .enqueue(&seed(execution, "https://site.test/p/1"))
        .await
        .expect("enqueue");

    let first = queue
        .dequeue(execution, "w1")
        .await
        .expect("dequeue")
        .expect("item");

    // Lease not yet stale: nothing eligible
    assert!(queue.dequeue(execution, "w2").await.expect("dequeue").is_none());

    tokio::time::sleep(Duration::from_millis(40)).await;
    let reclaimed = queue
        .dequeue(execution, "w2")
        .await
        .expect("dequeue")
        .expect("stale item reclaimed");
    assert_eq!(reclaimed.id, first.id);
    assert_eq!(reclaimed.lease_held_by.as_deref(), Some("w2"));

    // The original holder lost the item
    assert!(matches!(
        queue.mark_completed(first.id, "w1").await,
        Err(CrawlError::LeaseLost(_))
    ));
}

#[tokio::test]
async fn cleanup_stale_batch_reclaims() {
    let queue = MemoryUrlQueue::with_lease_timeout(Duration::from_millis(10));
    let execution = Uuid::new_v4();
    for i in 0..3 {
        queue
            .enqueue(&seed(execution, &format!("https://site.test/p/{i}")))
            .await
            .expect("enqueue");
    }
    for _ in 0..3 {
        queue.dequeue(execution, "w1").await.expect("dequeue");
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    let reclaimed = queue
        .cleanup_stale(Duration::from_millis(10))
        .await
        .expect("cleanup");
    assert_eq!(reclaimed, 3);

    let stats = queue.stats(execution).await.expect("stats");
    assert_eq!(stats.get(&QueueItemStatus::Pending), Some(&3));
}

#[tokio::test]
async fn requeue_decrements_priority() {
    let queue = MemoryUrlQueue::new();
    let execution = Uuid::new_v4();
    let mut item = seed(execution, "https://site.test/p/1");
    item.priority = 3;
    queue.enqueue(&item).await.expect("enqueue");

    let claimed = queue
        .dequeue(execution, "w1")
        .await
        .expect("dequeue")
        .expect("item");
    queue
        .requeue_for_later(claimed.id, "w1")
        .await
        .expect("requeue");

    let row = queue.get(claimed.id).await.expect("get").expect("row");
    assert_eq!(row.status, QueueItemStatus::Pending);
    assert_eq!(row.priority, 2);
    assert!(row.lease_held_by.is_none());
}

#[tokio::test]
async fn retry_converges_to_failed_under_a_cap() {
    let queue = MemoryUrlQueue::new();
    let execution = Uuid::new_v4();
    queue
        .enqueue(&seed(execution, "https://site.test/p/1"))
        .await
        .expect("enqueue");

    let retry_cap = 3;
    loop {
        let item = queue
            .dequeue(execution, "w1")
            .await
            .expect("dequeue")
            .expect("item");
        let retry = item.retry_count < retry_cap;
        queue
            .mark_failed(item.id, "w1", "still broken", retry)
            .await
            .expect("mark failed");
        if !retry {
            break;
        }
    }

    let stats = queue.stats(execution).await.expect("stats");
    assert_eq!(stats.get(&QueueItemStatus::Failed), Some(&1));
    assert!(is_drained(&stats));
}

#[tokio::test]
async fn batch_enqueue_collapses_internal_duplicates() {
    let queue = MemoryUrlQueue::new();
    let execution = Uuid::new_v4();

    let batch = vec![
        seed(execution, "https://site.test/p/1"),
        seed(execution, "https://site.test/p/2"),
        seed(execution, "https://site.test/p/1#fragment"),
    ];
    let inserted = queue.enqueue_batch(&batch).await.expect("batch enqueue");
    assert_eq!(inserted, 2);
}
