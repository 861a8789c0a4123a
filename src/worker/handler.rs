//! Per-task flow: claim, route, execute, report, settle.
//!
//! The bus delivery is only a wake-up; the durable claim is the queue lease
//! taken by `dequeue`. Duplicate deliveries find nothing to claim and ack
//! immediately. Terminal transitions ack the delivery; a task cancelled by
//! shutdown drops its delivery unsettled, which nacks it for redelivery
//! while the lease expiry protects the row.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::{BrowserContext, BrowserProfile};
use crate::bus::Delivery;
use crate::error::{CrawlError, ErrorKind};
use crate::executor::{self, PhaseOutcome};
use crate::model::{
    ExecutionError, NewQueueItem, Phase, TaskMessage, UrlQueueItem,
};
use crate::recovery::RecoveryAction;
use crate::router::{self, RouteDecision};
use crate::utils::extract_domain;
use crate::worker::WorkerInner;

pub async fn handle_delivery(
    inner: Arc<WorkerInner>,
    delivery: Delivery,
    shutdown: Arc<Notify>,
) {
    let message = delivery.message.clone();

    // Stopped executions skip work; the delivery is settled and gone
    if inner.is_execution_stopped(message.execution_id).await {
        debug!(execution_id = %message.execution_id, "execution stopped, skipping task");
        delivery.ack.ack();
        return;
    }

    // The bus woke us; the queue row is the real claim
    let item = match inner
        .queue
        .dequeue(message.execution_id, &inner.options.worker_id)
        .await
    {
        Ok(Some(item)) => item,
        Ok(None) => {
            // Duplicate delivery or another worker got there first
            delivery.ack.ack();
            return;
        }
        Err(e) => {
            warn!("dequeue failed: {e}");
            delivery.ack.nack();
            return;
        }
    };

    let processed = tokio::select! {
        processed = process_item(&inner, &message, &item) => processed,
        () = shutdown.notified() => {
            // Do not settle anything; the lease expires and another worker
            // retries the item
            info!(url = %item.url, "task cancelled by shutdown");
            drop(delivery);
            return;
        }
    };

    match processed {
        Ok(()) => delivery.ack.ack(),
        Err(e) => {
            warn!(url = %item.url, "task settlement failed: {e}");
            delivery.ack.ack();
        }
    }
}

/// Everything between claim and settlement
async fn process_item(
    inner: &Arc<WorkerInner>,
    message: &TaskMessage,
    item: &UrlQueueItem,
) -> Result<(), CrawlError> {
    let execution_id = item.execution_id;

    // Domain block list from skip_domain recovery actions
    if let Some(domain) = extract_domain(&item.url)
        && inner.recovery.blocklist().is_blocked(&domain)
    {
        inner
            .queue
            .mark_skipped(item.id, &inner.options.worker_id, "domain_blocked")
            .await?;
        inner.tracker.task_completed(execution_id);
        return Ok(());
    }

    // Per-domain politeness delay
    let delay = Duration::from_millis(message.metadata.rate_limit_delay.max(0) as u64);
    inner.limiter.acquire(&item.url, delay).await;

    // Phase routing; drops are terminal skips
    let phase = match router::route(item, &message.metadata.phases, message.metadata.max_depth) {
        RouteDecision::Run(phase) => phase.clone(),
        RouteDecision::Drop(reason) => {
            debug!(url = %item.url, reason, "router dropped item");
            inner
                .queue
                .mark_skipped(item.id, &inner.options.worker_id, reason)
                .await?;
            inner.tracker.task_completed(execution_id);
            return Ok(());
        }
    };

    let profile = select_profile(message, &phase);
    let browser = match inner.browser.acquire(profile.as_ref()).await {
        Ok(browser) => browser,
        Err(e) => {
            // No browser, no work: surface through recovery like any failure
            settle_failure(inner, message, item, &phase, &e, None, None).await;
            return Ok(());
        }
    };

    let (outcome, phase_error) = executor::run_phase(
        inner.registry.as_ref(),
        browser.as_ref(),
        message,
        item,
        &phase,
        inner.options.default_node_timeout,
    )
    .await;

    persist_audit(inner, &outcome).await;

    match phase_error {
        None => {
            settle_success(inner, message, item, &phase, outcome).await?;
            if let Err(e) = browser.close().await {
                warn!("browser close: {e}");
            }
        }
        Some(error) => {
            let http_status = match &error {
                CrawlError::Http { status, .. } => Some(*status),
                _ => None,
            };
            // Page content refines classification (captcha and block walls)
            let content = browser.content().await.ok();
            if let Err(e) = browser.close().await {
                warn!("browser close: {e}");
            }
            settle_failure(
                inner,
                message,
                item,
                &phase,
                &error,
                http_status,
                content.as_deref(),
            )
            .await;
        }
    }

    Ok(())
}

/// Enqueue discoveries, hand off items, close out the queue row
async fn settle_success(
    inner: &Arc<WorkerInner>,
    message: &TaskMessage,
    item: &UrlQueueItem,
    phase: &Phase,
    outcome: PhaseOutcome,
) -> Result<(), CrawlError> {
    let execution_id = item.execution_id;

    // Raw discovery count, before dedup (clients see every sighting)
    let raw_discoveries = outcome.discoveries.len() as i64;
    if raw_discoveries > 0 {
        inner.stats.record_discovered(execution_id, raw_discoveries);
    }

    // Discovered URLs route to the phase's transition target, or stay put
    let target_phase_id = phase
        .transition
        .as_ref()
        .map_or(phase.id.as_str(), |t| t.next_phase.as_str());

    let mut new_items = Vec::new();
    for discovery in &outcome.discoveries {
        let marker = router::resolve_marker(discovery.url.marker.as_deref(), &item.marker);
        let duplicate = inner
            .dedup
            .is_duplicate(execution_id, target_phase_id, &discovery.url.url)
            .await
            .unwrap_or(false);
        if duplicate {
            continue;
        }
        match NewQueueItem::discovered(
            execution_id,
            &discovery.url.url,
            item,
            &discovery.node_id,
            marker,
            Some(target_phase_id.to_string()),
        ) {
            Ok(new_item) => new_items.push(new_item),
            Err(e) => debug!(url = %discovery.url.url, "dropping undiscoverable url: {e}"),
        }
    }

    if !new_items.is_empty() {
        let inserted = inner.queue.enqueue_batch(&new_items).await?;
        if inserted > 0 {
            inner.tracker.task_queued(execution_id, inserted as i64);
        }

        let follow_ups = build_follow_ups(message, item, &new_items, target_phase_id);
        if let Err(e) = inner.bus.publish_batch(follow_ups).await {
            // Queue rows exist; the stale sweep or later deliveries will
            // reach them even though the wake-up was lost
            warn!("follow-up publish failed: {e}");
        }
    }

    let item_count = outcome.items.len() as i64;
    if item_count > 0 {
        inner.items.append(outcome.items);
        inner.stats.record_items(execution_id, item_count);
    }

    inner
        .queue
        .mark_completed(item.id, &inner.options.worker_id)
        .await?;
    inner.stats.record_processed(execution_id, &phase.id);
    inner.tracker.task_completed(execution_id);
    inner
        .recovery
        .note_task_settled(execution_id, &item.url_hash, true);

    Ok(())
}

/// Report the error and let the recovery engine pick the path out
async fn settle_failure(
    inner: &Arc<WorkerInner>,
    message: &TaskMessage,
    item: &UrlQueueItem,
    phase: &Phase,
    error: &CrawlError,
    http_status: Option<u16>,
    page_content: Option<&str>,
) {
    let execution_id = item.execution_id;

    inner.stats.record_error(execution_id);
    inner.errors.report(ExecutionError::new(
        execution_id,
        item.url.clone(),
        ErrorKind::classify(error),
        error.to_string(),
        Some(phase.id.clone()),
        item.retry_count,
    ));

    let outcome = match inner
        .recovery
        .handle(
            inner.queue.as_ref(),
            item,
            &inner.options.worker_id,
            error,
            http_status,
            page_content,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            // Lease lost or queue unavailable; the lease discipline has it
            warn!(url = %item.url, "recovery failed: {e}");
            return;
        }
    };

    debug!(
        url = %item.url,
        pattern = ?outcome.pattern,
        action = ?outcome.action,
        "recovery action applied"
    );

    if let Some(pause) = outcome.pause_intake {
        inner.pause_intake(pause);
    }

    match outcome.action {
        RecoveryAction::SendToDlq { .. } => {
            // Terminal: the item is done as far as completion counting goes
            inner.stats.record_processed(execution_id, &phase.id);
            inner.tracker.task_completed(execution_id);
            inner
                .recovery
                .note_task_settled(execution_id, &item.url_hash, false);
        }
        RecoveryAction::Retry
        | RecoveryAction::SwitchProxy
        | RecoveryAction::AddDelay { .. }
        | RecoveryAction::SkipDomain { .. } => {
            // The row went back to pending; wake a worker up for it
            let mut task = retry_task(message, item);
            if let Some(proxy) = outcome.proxy {
                task.proxy_url = Some(proxy.url);
                task.proxy_id = Some(proxy.id);
            }
            if let Err(e) = inner.bus.publish(task).await {
                warn!("retry publish failed: {e}");
            }
        }
    }
}

async fn persist_audit(inner: &Arc<WorkerInner>, outcome: &PhaseOutcome) {
    if let Some(store) = &inner.node_executions
        && let Err(e) = store.insert_batch(&outcome.node_executions).await
    {
        warn!("node execution audit write failed: {e}");
    }
}

/// Pick the context profile: first node-level override in the phase, then
/// the workflow-level profile, with any task proxy layered on top
fn select_profile(message: &TaskMessage, phase: &Phase) -> Option<BrowserProfile> {
    let mut profile = phase
        .nodes
        .iter()
        .find_map(|node| message.metadata.node_profiles.get(&node.id))
        .or_else(|| message.metadata.node_profiles.get(""))
        .cloned();

    if let Some(proxy_url) = &message.proxy_url {
        let mut effective = profile.take().unwrap_or_else(|| BrowserProfile {
            id: Uuid::new_v4(),
            name: "task-proxy".into(),
            user_agent: None,
            viewport: None,
            locale: None,
            timezone: None,
            geolocation: None,
            proxy_url: None,
            fingerprint_overrides: Default::default(),
        });
        effective.proxy_url = Some(proxy_url.clone());
        profile = Some(effective);
    }
    profile
}

/// Task messages for freshly enqueued discoveries
fn build_follow_ups(
    message: &TaskMessage,
    parent: &UrlQueueItem,
    new_items: &[NewQueueItem],
    target_phase_id: &str,
) -> Vec<TaskMessage> {
    let target_phase = message
        .metadata
        .phases
        .iter()
        .find(|p| p.id == target_phase_id)
        .cloned()
        .unwrap_or_else(|| message.phase_config.clone());

    new_items
        .iter()
        .map(|new_item| TaskMessage {
            task_id: Uuid::new_v4(),
            execution_id: new_item.execution_id,
            workflow_id: message.workflow_id,
            url: new_item.url.clone(),
            depth: new_item.depth,
            parent_url_id: Some(parent.id),
            marker: new_item.marker.clone(),
            phase_id: target_phase_id.to_string(),
            phase_config: target_phase.clone(),
            workflow_config: message.workflow_config.clone(),
            metadata: message.metadata.clone(),
            retry_count: 0,
            browser_profile_id: message.browser_profile_id,
            proxy_url: None,
            proxy_id: None,
        })
        .collect()
}

/// Wake-up for a retried item
fn retry_task(message: &TaskMessage, item: &UrlQueueItem) -> TaskMessage {
    TaskMessage {
        task_id: Uuid::new_v4(),
        retry_count: item.retry_count + 1,
        ..message.clone()
    }
}
