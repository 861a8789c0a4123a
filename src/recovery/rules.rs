//! Recovery rules engine.
//!
//! An ordered rule list maps (pattern, domain) to an action. Rules carry
//! success/failure counters fed back from task outcomes; a rule whose
//! success rate drops below the floor after enough uses is demoted to
//! priority zero. The table is swappable at runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::recovery::classifier::ErrorPattern;

/// Rules below this success rate get demoted
const MIN_SUCCESS_RATE: f64 = 0.90;
/// Demotion only applies after this many uses
const MIN_USAGE_COUNT: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    SwitchProxy,
    AddDelay { seconds: u64 },
    SkipDomain { minutes: u64 },
    SendToDlq { category: String },
}

/// Declarative rule definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRule {
    pub id: String,
    /// Higher priority evaluates first
    pub priority: i32,
    /// Pattern this rule answers; None matches any
    #[serde(default)]
    pub pattern: Option<ErrorPattern>,
    /// Regex over the failing domain; None matches any
    #[serde(default)]
    pub domain_pattern: Option<String>,
    pub action: RecoveryAction,
}

struct RuleState {
    rule: RecoveryRule,
    domain_regex: Option<Regex>,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    demoted: AtomicBool,
}

impl RuleState {
    fn usage(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed) + self.failure_count.load(Ordering::Relaxed)
    }

    fn success_rate(&self) -> f64 {
        let usage = self.usage();
        if usage == 0 {
            return 1.0;
        }
        self.success_count.load(Ordering::Relaxed) as f64 / usage as f64
    }

    fn effective_priority(&self) -> i32 {
        if self.demoted.load(Ordering::Relaxed) {
            0
        } else {
            self.rule.priority
        }
    }
}

pub struct RuleEngine {
    rules: RwLock<Vec<Arc<RuleState>>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_rules(default_rules())
    }
}

impl RuleEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rules(rules: Vec<RecoveryRule>) -> Self {
        let engine = Self {
            rules: RwLock::new(Vec::new()),
        };
        engine.reload(rules);
        engine
    }

    /// Swap in a fresh rule table; counters start over
    pub fn reload(&self, rules: Vec<RecoveryRule>) {
        let mut states: Vec<Arc<RuleState>> = rules
            .into_iter()
            .filter_map(|rule| {
                let domain_regex = match rule.domain_pattern.as_deref() {
                    Some(pattern) => match Regex::new(pattern) {
                        Ok(regex) => Some(regex),
                        Err(e) => {
                            warn!("dropping rule {} with bad domain pattern: {e}", rule.id);
                            return None;
                        }
                    },
                    None => None,
                };
                Some(Arc::new(RuleState {
                    rule,
                    domain_regex,
                    success_count: AtomicU64::new(0),
                    failure_count: AtomicU64::new(0),
                    demoted: AtomicBool::new(false),
                }))
            })
            .collect();
        states.sort_by_key(|s| std::cmp::Reverse(s.rule.priority));
        *self.rules.write() = states;
    }

    /// Resolve the action for a classified error; first match by priority
    #[must_use]
    pub fn decide(&self, pattern: ErrorPattern, domain: &str) -> Option<(String, RecoveryAction)> {
        let rules = self.rules.read();
        let mut candidates: Vec<&Arc<RuleState>> = rules.iter().collect();
        candidates.sort_by_key(|s| std::cmp::Reverse(s.effective_priority()));

        for state in candidates {
            if let Some(expected) = state.rule.pattern
                && expected != pattern
            {
                continue;
            }
            if let Some(regex) = &state.domain_regex
                && !regex.is_match(domain)
            {
                continue;
            }
            return Some((state.rule.id.clone(), state.rule.action.clone()));
        }
        None
    }

    /// Feed back whether the action ultimately worked out
    pub fn record_outcome(&self, rule_id: &str, success: bool) {
        let rules = self.rules.read();
        let Some(state) = rules.iter().find(|s| s.rule.id == rule_id) else {
            return;
        };
        if success {
            state.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            state.failure_count.fetch_add(1, Ordering::Relaxed);
        }

        if state.usage() >= MIN_USAGE_COUNT
            && state.success_rate() < MIN_SUCCESS_RATE
            && !state.demoted.swap(true, Ordering::Relaxed)
        {
            info!(
                "demoting rule {} (success rate {:.2})",
                rule_id,
                state.success_rate()
            );
        }
    }

    /// (success, failure) counters for a rule
    #[must_use]
    pub fn rule_counters(&self, rule_id: &str) -> Option<(u64, u64)> {
        let rules = self.rules.read();
        rules.iter().find(|s| s.rule.id == rule_id).map(|s| {
            (
                s.success_count.load(Ordering::Relaxed),
                s.failure_count.load(Ordering::Relaxed),
            )
        })
    }
}

/// Built-in rule table
#[must_use]
pub fn default_rules() -> Vec<RecoveryRule> {
    let rule = |id: &str, priority, pattern, action| RecoveryRule {
        id: id.to_string(),
        priority,
        pattern: Some(pattern),
        domain_pattern: None,
        action,
    };

    vec![
        rule(
            "rate-limited-delay",
            100,
            ErrorPattern::RateLimited,
            RecoveryAction::AddDelay { seconds: 30 },
        ),
        rule(
            "blocked-proxy",
            90,
            ErrorPattern::Blocked,
            RecoveryAction::SwitchProxy,
        ),
        rule(
            "captcha-skip",
            90,
            ErrorPattern::Captcha,
            RecoveryAction::SkipDomain { minutes: 30 },
        ),
        rule(
            "auth-skip",
            80,
            ErrorPattern::AuthRequired,
            RecoveryAction::SkipDomain { minutes: 60 },
        ),
        rule(
            "server-error-retry",
            70,
            ErrorPattern::ServerError,
            RecoveryAction::Retry,
        ),
        rule(
            "timeout-retry",
            70,
            ErrorPattern::Timeout,
            RecoveryAction::Retry,
        ),
        rule(
            "connection-retry",
            70,
            ErrorPattern::Connection,
            RecoveryAction::Retry,
        ),
        rule(
            "not-found-dlq",
            60,
            ErrorPattern::NotFound,
            RecoveryAction::SendToDlq {
                category: "not_found".into(),
            },
        ),
        rule(
            "layout-dlq",
            60,
            ErrorPattern::LayoutChanged,
            RecoveryAction::SendToDlq {
                category: "layout_changed".into(),
            },
        ),
        rule("unknown-retry", 10, ErrorPattern::Unknown, RecoveryAction::Retry),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_wins() {
        let engine = RuleEngine::with_rules(vec![
            RecoveryRule {
                id: "specific".into(),
                priority: 100,
                pattern: Some(ErrorPattern::ServerError),
                domain_pattern: Some(r"slow\.example$".into()),
                action: RecoveryAction::AddDelay { seconds: 60 },
            },
            RecoveryRule {
                id: "generic".into(),
                priority: 50,
                pattern: Some(ErrorPattern::ServerError),
                domain_pattern: None,
                action: RecoveryAction::Retry,
            },
        ]);

        let (id, action) = engine
            .decide(ErrorPattern::ServerError, "slow.example")
            .expect("rule");
        assert_eq!(id, "specific");
        assert_eq!(action, RecoveryAction::AddDelay { seconds: 60 });

        let (id, _) = engine
            .decide(ErrorPattern::ServerError, "fast.example")
            .expect("rule");
        assert_eq!(id, "generic");
    }

    #[test]
    fn failing_rules_get_demoted() {
        let engine = RuleEngine::with_rules(vec![
            RecoveryRule {
                id: "flaky".into(),
                priority: 100,
                pattern: Some(ErrorPattern::Timeout),
                domain_pattern: None,
                action: RecoveryAction::Retry,
            },
            RecoveryRule {
                id: "fallback".into(),
                priority: 1,
                pattern: Some(ErrorPattern::Timeout),
                domain_pattern: None,
                action: RecoveryAction::SendToDlq {
                    category: "timeout".into(),
                },
            },
        ]);

        for _ in 0..5 {
            engine.record_outcome("flaky", false);
        }

        // Demoted to priority 0, so the fallback at priority 1 wins
        let (id, _) = engine
            .decide(ErrorPattern::Timeout, "any.example")
            .expect("rule");
        assert_eq!(id, "fallback");
    }

    #[test]
    fn default_table_covers_every_pattern() {
        let engine = RuleEngine::new();
        for pattern in [
            ErrorPattern::Blocked,
            ErrorPattern::RateLimited,
            ErrorPattern::Captcha,
            ErrorPattern::Timeout,
            ErrorPattern::Connection,
            ErrorPattern::LayoutChanged,
            ErrorPattern::AuthRequired,
            ErrorPattern::NotFound,
            ErrorPattern::ServerError,
            ErrorPattern::Unknown,
        ] {
            assert!(
                engine.decide(pattern, "site.example").is_some(),
                "no rule for {pattern:?}"
            );
        }
    }
}
