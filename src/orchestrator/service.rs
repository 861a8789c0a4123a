//! Execution lifecycle service.
//!
//! Start validates the workflow, resolves every referenced browser profile
//! in one scan, creates the execution row, seeds the outstanding counter,
//! and only then publishes the seed batch. Finalization is idempotent and
//! double-checks the queue before trusting a completion signal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::TaskBus;
use crate::cache::Cache;
use crate::error::{CrawlError, CrawlResult};
use crate::model::{
    ExecutionStatus, NewQueueItem, TaskMessage, TaskMetadata, Workflow, WorkflowDefaults,
    WorkflowStatus,
};
use crate::nodes::NodeRegistry;
use crate::queue::{UrlQueue, is_drained};
use crate::store::{CachedWorkflows, ExecutionStore, ProfileStore};
use crate::tracker::{outstanding_key, stopped_key};

pub struct ExecutionService {
    workflows: CachedWorkflows,
    executions: ExecutionStore,
    profiles: ProfileStore,
    queue: Arc<dyn UrlQueue>,
    bus: Arc<dyn TaskBus>,
    cache: Arc<dyn Cache>,
    registry: Arc<NodeRegistry>,
    /// Executions whose error ratio exceeds this are finalized as failed
    error_rate_threshold: f64,
}

impl ExecutionService {
    #[must_use]
    pub fn new(
        workflows: CachedWorkflows,
        executions: ExecutionStore,
        profiles: ProfileStore,
        queue: Arc<dyn UrlQueue>,
        bus: Arc<dyn TaskBus>,
        cache: Arc<dyn Cache>,
        registry: Arc<NodeRegistry>,
        error_rate_threshold: f64,
    ) -> Self {
        Self {
            workflows,
            executions,
            profiles,
            queue,
            bus,
            cache,
            registry,
            error_rate_threshold,
        }
    }

    /// Validate, seed, and launch one execution of a workflow
    pub async fn start_execution(&self, workflow_id: Uuid) -> CrawlResult<Uuid> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| CrawlError::Config(format!("unknown workflow {workflow_id}")))?;

        if workflow.status != WorkflowStatus::Active {
            return Err(CrawlError::Config(format!(
                "workflow {workflow_id} is not active"
            )));
        }
        self.registry.validate_workflow(&workflow.config)?;

        let node_profiles = self.resolve_profiles(&workflow).await?;

        let execution = self.executions.create(workflow_id).await?;
        let first_phase = workflow.config.first_phase()?;

        let mut seeds = Vec::with_capacity(workflow.config.start_urls.len());
        for raw_url in &workflow.config.start_urls {
            seeds.push(NewQueueItem::seed(execution.id, raw_url, &first_phase.id)?);
        }
        // Canonicalization can collapse seed spellings
        let seed_count = self.queue.enqueue_batch(&seeds).await?;

        let metadata = TaskMetadata {
            phases: workflow.config.phases.clone(),
            node_profiles,
            max_depth: workflow.config.max_depth,
            rate_limit_delay: workflow.config.rate_limit_delay,
        };
        let defaults = WorkflowDefaults {
            default_driver: workflow.config.default_driver.clone(),
            headers: workflow.config.headers.clone(),
        };

        let tasks: Vec<TaskMessage> = seeds
            .iter()
            .map(|seed| TaskMessage {
                task_id: Uuid::new_v4(),
                execution_id: execution.id,
                workflow_id,
                url: seed.url.clone(),
                depth: 0,
                parent_url_id: None,
                marker: String::new(),
                phase_id: first_phase.id.clone(),
                phase_config: first_phase.clone(),
                workflow_config: Some(defaults.clone()),
                metadata: metadata.clone(),
                retry_count: 0,
                browser_profile_id: workflow.browser_profile_id,
                proxy_url: None,
                proxy_id: None,
            })
            .collect();

        // The counter must cover the seeds before any worker can observe
        // them, or a fast completion could signal against a zero counter
        self.cache
            .incr_by(&outstanding_key(execution.id), seed_count as i64)
            .await?;
        self.bus.publish_batch(tasks).await?;

        info!(
            execution_id = %execution.id,
            %workflow_id,
            seeds = seed_count,
            "execution started"
        );
        Ok(execution.id)
    }

    /// Stop a running execution; in-flight tasks notice and skip work
    pub async fn stop_execution(&self, execution_id: Uuid) -> CrawlResult<bool> {
        let stopped = self
            .executions
            .finalize(execution_id, ExecutionStatus::Stopped, Some("stopped"))
            .await?;
        if stopped {
            // Workers poll this flag and skip the execution's tasks
            self.cache.incr_by(&stopped_key(execution_id), 1).await?;
            self.cache.del(&outstanding_key(execution_id)).await?;
            info!(%execution_id, "execution stopped");
        }
        Ok(stopped)
    }

    /// Handle a worker's completion signal. Idempotent; re-checks the queue
    /// so a racing flush window cannot finalize an execution with live work.
    pub async fn finalize_completed(&self, execution_id: Uuid) -> CrawlResult<bool> {
        let stats = self.queue.stats(execution_id).await?;
        if !is_drained(&stats) {
            warn!(
                %execution_id,
                ?stats,
                "completion signal with live queue items, ignoring"
            );
            return Ok(false);
        }

        let finalized = self
            .executions
            .finalize(execution_id, ExecutionStatus::Completed, None)
            .await?;
        if finalized {
            self.cache.del(&outstanding_key(execution_id)).await?;
            info!(%execution_id, "execution finalized as completed");
        }
        Ok(finalized)
    }

    /// Catastrophic-failure guard: finalize as failed past the error ratio
    pub async fn check_error_rate(&self, execution_id: Uuid) -> CrawlResult<bool> {
        let Some(execution) = self.executions.get(execution_id).await? else {
            return Ok(false);
        };
        if execution.status.is_terminal() || execution.urls_processed < 10 {
            return Ok(false);
        }

        let ratio = execution.errors as f64 / execution.urls_processed.max(1) as f64;
        if ratio <= self.error_rate_threshold {
            return Ok(false);
        }

        let finalized = self
            .executions
            .finalize(
                execution_id,
                ExecutionStatus::Failed,
                Some("error rate threshold exceeded"),
            )
            .await?;
        if finalized {
            self.cache.del(&outstanding_key(execution_id)).await?;
            warn!(%execution_id, ratio, "execution failed on error rate");
        }
        Ok(finalized)
    }

    /// Background reclamation of expired leases
    pub fn spawn_stale_sweep(
        self: &Arc<Self>,
        interval: Duration,
        lease_timeout: Duration,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match service.queue.cleanup_stale(lease_timeout).await {
                    Ok(0) => {}
                    Ok(reclaimed) => info!(reclaimed, "reclaimed stale leases"),
                    Err(e) => warn!("stale sweep failed: {e}"),
                }
            }
        })
    }

    /// Workflow profile + every node-referenced profile, one scan
    async fn resolve_profiles(
        &self,
        workflow: &Workflow,
    ) -> CrawlResult<std::collections::HashMap<String, crate::browser::BrowserProfile>> {
        let mut wanted: HashSet<Uuid> = HashSet::new();
        if let Some(id) = workflow.browser_profile_id {
            wanted.insert(id);
        }

        // node id -> referenced profile id
        let mut references: Vec<(String, Uuid)> = Vec::new();
        for phase in &workflow.config.phases {
            for node in &phase.nodes {
                if let Some(raw) = node.params.get("browser_profile_id").and_then(|v| v.as_str())
                {
                    let id = raw.parse::<Uuid>().map_err(|e| {
                        CrawlError::Config(format!(
                            "node {} has malformed browser_profile_id: {e}",
                            node.id
                        ))
                    })?;
                    wanted.insert(id);
                    references.push((node.id.clone(), id));
                }
            }
        }

        let ids: Vec<Uuid> = wanted.into_iter().collect();
        let resolved = self.profiles.resolve(&ids).await?;

        let mut node_profiles = std::collections::HashMap::new();
        if let Some(id) = workflow.browser_profile_id {
            let profile = resolved.get(&id).ok_or_else(|| {
                CrawlError::Config(format!("workflow references unknown profile {id}"))
            })?;
            // Workflow-level fallback keys under the empty string
            node_profiles.insert(String::new(), profile.clone());
        }
        for (node_id, profile_id) in references {
            let profile = resolved.get(&profile_id).ok_or_else(|| {
                CrawlError::Config(format!(
                    "node {node_id} references unknown profile {profile_id}"
                ))
            })?;
            node_profiles.insert(node_id, profile.clone());
        }
        Ok(node_profiles)
    }
}
