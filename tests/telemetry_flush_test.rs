//! Batched reporter flushes against a mock orchestrator.

use crawlgrid::error::ErrorKind;
use crawlgrid::model::ExecutionError;
use crawlgrid::telemetry::{ErrorReporter, StatsReporter};
use uuid::Uuid;

#[tokio::test]
async fn stats_flush_posts_one_batch() {
    let mut server = mockito::Server::new_async().await;
    let endpoint = server
        .mock("POST", "/internal/stats/batch")
        .match_header("content-type", "application/json")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let reporter = StatsReporter::new(&server.url(), "worker-test");
    let execution = Uuid::new_v4();
    reporter.record_processed(execution, "discover");
    reporter.record_processed(execution, "discover");
    reporter.record_discovered(execution, 10);
    reporter.record_items(execution, 3);
    reporter.record_error(execution);

    reporter.flush().await.expect("flush");
    endpoint.assert_async().await;

    // Counters swapped to zero
    let after = reporter.peek(execution);
    assert_eq!(after.urls_processed, 0);
    assert_eq!(after.urls_discovered, 0);
}

#[tokio::test]
async fn empty_stats_flush_sends_nothing() {
    let mut server = mockito::Server::new_async().await;
    let endpoint = server
        .mock("POST", "/internal/stats/batch")
        .expect(0)
        .create_async()
        .await;

    let reporter = StatsReporter::new(&server.url(), "worker-test");
    reporter.flush().await.expect("flush");
    endpoint.assert_async().await;
}

#[tokio::test]
async fn failed_stats_flush_readds_counters() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/internal/stats/batch")
        .with_status(503)
        .create_async()
        .await;

    let reporter = StatsReporter::new(&server.url(), "worker-test");
    let execution = Uuid::new_v4();
    reporter.record_discovered(execution, 5);

    reporter.flush().await.expect("flush swallows the failure");

    let after = reporter.peek(execution);
    assert_eq!(after.urls_discovered, 5, "counts survive a failed flush");
}

#[tokio::test]
async fn errors_flush_posts_and_drains() {
    let mut server = mockito::Server::new_async().await;
    let endpoint = server
        .mock("POST", "/internal/errors/batch")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let reporter = ErrorReporter::new(&server.url());
    let execution = Uuid::new_v4();
    reporter.report(ExecutionError::new(
        execution,
        "https://site.test/p/1",
        ErrorKind::Timeout,
        "page load timed out",
        Some("discover".into()),
        1,
    ));
    assert_eq!(reporter.buffered_count(execution), 1);

    reporter.flush().await.expect("flush");
    endpoint.assert_async().await;
    assert_eq!(reporter.buffered_count(execution), 0);
}

#[tokio::test]
async fn failed_error_flush_rebuffers() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/internal/errors/batch")
        .with_status(500)
        .create_async()
        .await;

    let reporter = ErrorReporter::new(&server.url());
    let execution = Uuid::new_v4();
    reporter.report(ExecutionError::new(
        execution,
        "https://site.test/p/1",
        ErrorKind::Network,
        "connection reset",
        None,
        0,
    ));

    reporter.flush().await.expect("flush swallows the failure");
    assert_eq!(reporter.buffered_count(execution), 1);
}
