//! Advisory seam for unknown error patterns.
//!
//! When the rules engine has no opinion, an advisor may be consulted; its
//! answer is constrained to the same action set. The default advisor
//! abstains, leaving the engine's fallback in charge. An LLM-backed
//! implementation plugs in here as an external collaborator.

use async_trait::async_trait;

use crate::error::CrawlResult;
use crate::recovery::classifier::ErrorPattern;
use crate::recovery::rules::RecoveryAction;

#[derive(Debug, Clone)]
pub struct AdviceContext {
    pub pattern: ErrorPattern,
    pub confidence: f64,
    pub domain: String,
    pub message: String,
    pub retry_count: i32,
}

#[async_trait]
pub trait RecoveryAdvisor: Send + Sync {
    /// None means no advice; the engine falls back to its own default
    async fn advise(&self, context: &AdviceContext) -> CrawlResult<Option<RecoveryAction>>;
}

/// Abstains from every decision
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdvisor;

#[async_trait]
impl RecoveryAdvisor for NoopAdvisor {
    async fn advise(&self, _context: &AdviceContext) -> CrawlResult<Option<RecoveryAction>> {
        Ok(None)
    }
}
