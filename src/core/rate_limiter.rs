//! Rate limiting implementation for the gateway guard service.
//!
//! This module evaluates requests against fixed-window counters held in the
//! shared counter store. Fixed windows keep the per-request cost at one
//! atomic increment and distribute trivially across gateway replicas.

use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::counter_store::CounterStore;
use crate::models::{EndpointLimit, RateLimitConfig};
use crate::utils::{format_counter_key, get_current_timestamp};

/// Scope name of the default rule
pub const GLOBAL_SCOPE: &str = "global-default";

/// A rate limit rule for one scope
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    /// Scope identifier used in counter keys
    pub scope: String,
    /// Maximum requests per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
    /// Burst tolerance on top of the limit
    pub burst: u32,
}

/// The applicable rule set: one default plus per-endpoint overrides.
///
/// Endpoint patterns are exact paths or trailing-`*` prefixes. The most
/// specific matching pattern wins; an exact match outranks a wildcard of the
/// same length, and among equally specific patterns the first-declared wins.
#[derive(Debug, Clone)]
pub struct RuleSet {
    default_rule: RateLimitRule,
    endpoint_rules: Vec<(String, RateLimitRule)>,
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    }
}

fn pattern_specificity(pattern: &str) -> usize {
    match pattern.strip_suffix('*') {
        Some(prefix) => prefix.len() * 2,
        None => pattern.len() * 2 + 1,
    }
}

impl RuleSet {
    /// Build a rule set from explicit `(pattern, rule)` pairs in declaration
    /// order
    pub fn new(default_rule: RateLimitRule, endpoint_rules: Vec<(String, RateLimitRule)>) -> Self {
        Self {
            default_rule,
            endpoint_rules,
        }
    }

    /// Build a rule set from configuration.
    ///
    /// Config maps carry no declaration order, so patterns are sorted
    /// lexicographically to keep resolution identical across replicas.
    pub fn from_config(
        default: &RateLimitConfig,
        endpoint_limits: &HashMap<String, EndpointLimit>,
    ) -> Self {
        let default_rule = RateLimitRule {
            scope: GLOBAL_SCOPE.to_string(),
            limit: default.default_limit,
            window: Duration::from_secs(default.window_seconds as u64),
            burst: default.burst_size,
        };

        let mut patterns: Vec<&String> = endpoint_limits.keys().collect();
        patterns.sort();
        let endpoint_rules = patterns
            .into_iter()
            .map(|pattern| {
                let limit = &endpoint_limits[pattern];
                (
                    pattern.clone(),
                    RateLimitRule {
                        scope: format!("endpoint:{}", pattern),
                        limit: limit.limit,
                        window: Duration::from_secs(limit.window_seconds as u64),
                        burst: 0,
                    },
                )
            })
            .collect();

        Self {
            default_rule,
            endpoint_rules,
        }
    }

    /// Find the rule applicable to `path`
    pub fn resolve(&self, path: &str) -> &RateLimitRule {
        let mut best: Option<(usize, &RateLimitRule)> = None;
        for (pattern, rule) in &self.endpoint_rules {
            if !pattern_matches(pattern, path) {
                continue;
            }
            let specificity = pattern_specificity(pattern);
            // Strictly greater only: the first-declared rule keeps ties.
            if best.map_or(true, |(s, _)| specificity > s) {
                best = Some((specificity, rule));
            }
        }
        best.map(|(_, rule)| rule).unwrap_or(&self.default_rule)
    }
}

/// Outcome of a rate limit evaluation
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request is within its quota
    pub allowed: bool,
    /// Scope of the rule that applied
    pub scope: String,
    /// Remaining quota in the current window, absent when the store was
    /// unreachable
    pub remaining: Option<u32>,
    /// Time until the window resets, set on deny
    pub retry_after: Option<Duration>,
}

/// Rate limiter evaluating identities against the shared counter store
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    rules: RwLock<RuleSet>,
    fail_open: bool,
}

impl RateLimiter {
    /// Create a new rate limiter instance
    pub fn new(store: Arc<dyn CounterStore>, rules: RuleSet, fail_open: bool) -> Self {
        Self {
            store,
            rules: RwLock::new(rules),
            fail_open,
        }
    }

    /// Swap in a new rule set, e.g. after a configuration reload.
    /// In-flight windows keep counting under their existing keys.
    pub async fn replace_rules(&self, rules: RuleSet) {
        let mut current = self.rules.write().await;
        *current = rules;
        info!("rate limit rule set replaced");
    }

    /// Evaluate one request for `identity` against the rule matching `path`
    pub async fn check(&self, identity: &str, path: &str) -> RateLimitDecision {
        self.check_at(identity, path, get_current_timestamp()).await
    }

    pub(crate) async fn check_at(&self, identity: &str, path: &str, now: u64) -> RateLimitDecision {
        // Copy the resolved rule out so the lock is not held across store I/O.
        let rule = {
            let rules = self.rules.read().await;
            rules.resolve(path).clone()
        };
        let bucket = now / rule.window.as_secs().max(1);
        let key = format_counter_key(&rule.scope, identity, bucket);

        match self.store.increment(&key, rule.window).await {
            Ok((count, ttl)) => {
                let cap = rule.limit as u64 + rule.burst as u64;
                if count <= cap {
                    RateLimitDecision {
                        allowed: true,
                        scope: rule.scope.clone(),
                        remaining: Some((cap - count).min(u32::MAX as u64) as u32),
                        retry_after: None,
                    }
                } else {
                    RateLimitDecision {
                        allowed: false,
                        scope: rule.scope.clone(),
                        remaining: Some(0),
                        retry_after: Some(ttl),
                    }
                }
            }
            Err(e) => {
                if self.fail_open {
                    warn!("counter store unavailable, failing open: {}", e);
                    RateLimitDecision {
                        allowed: true,
                        scope: rule.scope.clone(),
                        remaining: None,
                        retry_after: None,
                    }
                } else {
                    warn!("counter store unavailable, failing closed: {}", e);
                    RateLimitDecision {
                        allowed: false,
                        scope: rule.scope.clone(),
                        remaining: None,
                        retry_after: None,
                    }
                }
            }
        }
    }
}
