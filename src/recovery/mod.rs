//! Recovery engine: classify a failure, decide an action, execute it
//! against the queue.
//!
//! Classification and decision are pure; execution touches the queue, the
//! proxy pool, and the domain block list. Retries are bounded by the
//! per-workflow retry cap, after which the item goes to the DLQ (terminal
//! `failed` plus a categorized error log entry).

pub mod advisor;
pub mod blocklist;
pub mod classifier;
pub mod proxy;
pub mod rules;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CrawlError, CrawlResult};
use crate::model::UrlQueueItem;
use crate::queue::UrlQueue;
use crate::utils::extract_domain;

pub use advisor::{AdviceContext, NoopAdvisor, RecoveryAdvisor};
pub use blocklist::DomainBlockList;
pub use classifier::{Classification, ErrorClassifier, ErrorContext, ErrorPattern};
pub use proxy::{ProxyConfig, ProxyPool};
pub use rules::{RecoveryAction, RecoveryRule, RuleEngine, default_rules};

/// What the engine did with a failed task
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub pattern: ErrorPattern,
    pub confidence: f64,
    pub action: RecoveryAction,
    pub rule_id: Option<String>,
    /// Proxy chosen by a switch_proxy action, to ride on the republished task
    pub proxy: Option<ProxyConfig>,
    /// The worker should pause its intake this long (add_delay)
    pub pause_intake: Option<Duration>,
}

pub struct RecoveryEngine {
    classifier: ErrorClassifier,
    rules: RuleEngine,
    proxies: ProxyPool,
    blocklist: Arc<DomainBlockList>,
    advisor: Arc<dyn RecoveryAdvisor>,
    retry_cap: i32,
    /// Rule attribution for retried items, resolved when the item settles
    attributions: DashMap<(Uuid, String), String>,
}

impl RecoveryEngine {
    #[must_use]
    pub fn new(
        blocklist: Arc<DomainBlockList>,
        proxies: ProxyPool,
        advisor: Arc<dyn RecoveryAdvisor>,
        retry_cap: i32,
    ) -> Self {
        Self {
            classifier: ErrorClassifier::new(),
            rules: RuleEngine::new(),
            proxies,
            blocklist,
            advisor,
            retry_cap,
            attributions: DashMap::new(),
        }
    }

    #[must_use]
    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Classify, decide, and execute the action for one failed item
    pub async fn handle(
        &self,
        queue: &dyn UrlQueue,
        item: &UrlQueueItem,
        worker_id: &str,
        error: &CrawlError,
        http_status: Option<u16>,
        page_content: Option<&str>,
    ) -> CrawlResult<RecoveryOutcome> {
        let message = error.to_string();
        let classification = self.classifier.classify(&ErrorContext {
            message: &message,
            http_status,
            page_content,
        });
        let domain = extract_domain(&item.url).unwrap_or_default();

        let decided = self.rules.decide(classification.pattern, &domain);
        let (rule_id, mut action) = match decided {
            Some((rule_id, action)) => (Some(rule_id), action),
            None => {
                // No rule answered; ask the advisor, fall back to a bounded retry
                let advice = self
                    .advisor
                    .advise(&AdviceContext {
                        pattern: classification.pattern,
                        confidence: classification.confidence,
                        domain: domain.clone(),
                        message: message.clone(),
                        retry_count: item.retry_count,
                    })
                    .await
                    .unwrap_or_else(|e| {
                        warn!("advisor failed: {e}");
                        None
                    });
                (None, advice.unwrap_or(RecoveryAction::Retry))
            }
        };

        // A retry past the cap becomes a DLQ delivery
        if action == RecoveryAction::Retry && item.retry_count >= self.retry_cap {
            debug!(
                url = %item.url,
                retries = item.retry_count,
                "retry cap reached, sending to DLQ"
            );
            action = RecoveryAction::SendToDlq {
                category: "retry_cap_exceeded".into(),
            };
        }

        let mut outcome = RecoveryOutcome {
            pattern: classification.pattern,
            confidence: classification.confidence,
            action: action.clone(),
            rule_id: rule_id.clone(),
            proxy: None,
            pause_intake: None,
        };

        match action {
            RecoveryAction::Retry => {
                queue
                    .mark_failed(item.id, worker_id, &message, true)
                    .await?;
                self.attribute(item, rule_id);
            }
            RecoveryAction::SwitchProxy => {
                if let Some(proxy) = self.proxies.select_healthy() {
                    outcome.proxy = Some(proxy.config.clone());
                }
                queue
                    .mark_failed(item.id, worker_id, &message, true)
                    .await?;
                self.attribute(item, rule_id);
            }
            RecoveryAction::AddDelay { seconds } => {
                outcome.pause_intake = Some(Duration::from_secs(seconds));
                queue.requeue_for_later(item.id, worker_id).await?;
                self.attribute(item, rule_id);
            }
            RecoveryAction::SkipDomain { minutes } => {
                if !domain.is_empty() {
                    self.blocklist
                        .block(&domain, Duration::from_secs(minutes * 60));
                }
                queue.requeue_for_later(item.id, worker_id).await?;
            }
            RecoveryAction::SendToDlq { .. } => {
                queue
                    .mark_failed(item.id, worker_id, &message, false)
                    .await?;
                if let Some(rule_id) = &rule_id {
                    // A DLQ delivery is the rule working as intended
                    self.rules.record_outcome(rule_id, true);
                }
            }
        }

        Ok(outcome)
    }

    /// A previously retried item settled; credit or debit its rule
    pub fn note_task_settled(&self, execution_id: Uuid, url_hash: &str, success: bool) {
        if let Some((_, rule_id)) = self
            .attributions
            .remove(&(execution_id, url_hash.to_string()))
        {
            self.rules.record_outcome(&rule_id, success);
        }
    }

    /// Release attribution state for a finished execution
    pub fn clear(&self, execution_id: Uuid) {
        self.attributions.retain(|(id, _), _| *id != execution_id);
    }

    #[must_use]
    pub fn blocklist(&self) -> &DomainBlockList {
        &self.blocklist
    }

    #[must_use]
    pub fn proxies(&self) -> &ProxyPool {
        &self.proxies
    }

    fn attribute(&self, item: &UrlQueueItem, rule_id: Option<String>) {
        if let Some(rule_id) = rule_id {
            self.attributions
                .insert((item.execution_id, item.url_hash.clone()), rule_id);
        }
    }
}
