//! Gateway decision facade for the gateway guard service.
//!
//! Single entry point evaluated once per inbound request: blacklist check,
//! whitelist bypass, then rate limit evaluation, recording threat events on
//! the way out.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;

use crate::core::access_lists::{AccessListManager, ListKind};
use crate::core::rate_limiter::RateLimiter;
use crate::core::threats::{ThreatEventRecorder, ThreatKind};

/// One inbound request as seen by the engine
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_ip: IpAddr,
    pub principal_id: Option<String>,
    pub endpoint_path: String,
    pub method: String,
}

impl RequestContext {
    /// Rate-limit identity: authenticated principal id when present, client
    /// IP otherwise. Principal scoping keeps NAT'd users from starving each
    /// other and stops spoofed-IP evasion.
    pub fn identity(&self) -> String {
        match &self.principal_id {
            Some(principal) => format!("principal:{}", principal),
            None => self.client_ip.to_string(),
        }
    }
}

/// Final outcome of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// Why the decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    Blacklisted,
    Whitelisted,
    WithinLimit,
    RateLimited,
    StorePolicy,
}

impl VerdictReason {
    fn as_str(&self) -> &'static str {
        match self {
            VerdictReason::Blacklisted => "blacklisted",
            VerdictReason::Whitelisted => "whitelisted",
            VerdictReason::WithinLimit => "within_limit",
            VerdictReason::RateLimited => "rate_limited",
            VerdictReason::StorePolicy => "store_policy",
        }
    }
}

/// Per-request verdict returned to the serving layer
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: VerdictReason,
    pub remaining: Option<u32>,
    pub retry_after_seconds: Option<u64>,
}

impl Verdict {
    pub fn allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// Orchestrates access lists, rate limiter and threat recording
pub struct Gateway {
    access_lists: Arc<AccessListManager>,
    limiter: RateLimiter,
    recorder: Arc<ThreatEventRecorder>,
}

impl Gateway {
    /// Create a new gateway facade
    pub fn new(
        access_lists: Arc<AccessListManager>,
        limiter: RateLimiter,
        recorder: Arc<ThreatEventRecorder>,
    ) -> Self {
        Self {
            access_lists,
            limiter,
            recorder,
        }
    }

    /// Evaluate one request. Each request passes through exactly once.
    pub async fn evaluate(&self, req: &RequestContext) -> Verdict {
        self.evaluate_at(req, Utc::now()).await
    }

    pub(crate) async fn evaluate_at(&self, req: &RequestContext, now: DateTime<Utc>) -> Verdict {
        if self
            .access_lists
            .lookup_at(req.client_ip, ListKind::Deny, now)
            .await
        {
            self.recorder
                .record_at(req.client_ip, ThreatKind::BlacklistedAccess, now)
                .await;
            return self.finish(Verdict {
                decision: Decision::Deny,
                reason: VerdictReason::Blacklisted,
                remaining: None,
                retry_after_seconds: None,
            });
        }

        if self
            .access_lists
            .lookup_at(req.client_ip, ListKind::Allow, now)
            .await
        {
            return self.finish(Verdict {
                decision: Decision::Allow,
                reason: VerdictReason::Whitelisted,
                remaining: None,
                retry_after_seconds: None,
            });
        }

        let decision = self
            .limiter
            .check_at(&req.identity(), &req.endpoint_path, now.timestamp() as u64)
            .await;

        let verdict = if decision.allowed {
            Verdict {
                decision: Decision::Allow,
                // remaining is absent only when the store was unreachable and
                // the fail-open policy applied.
                reason: if decision.remaining.is_some() {
                    VerdictReason::WithinLimit
                } else {
                    VerdictReason::StorePolicy
                },
                remaining: decision.remaining,
                retry_after_seconds: None,
            }
        } else if decision.remaining.is_some() {
            self.recorder
                .record_at(req.client_ip, ThreatKind::RateLimitViolation, now)
                .await;
            Verdict {
                decision: Decision::Deny,
                reason: VerdictReason::RateLimited,
                remaining: Some(0),
                retry_after_seconds: decision.retry_after.map(|d| d.as_secs()),
            }
        } else {
            // Fail-closed store outage: a policy deny, not a client
            // violation, so no threat event.
            Verdict {
                decision: Decision::Deny,
                reason: VerdictReason::StorePolicy,
                remaining: None,
                retry_after_seconds: None,
            }
        };
        self.finish(verdict)
    }

    fn finish(&self, verdict: Verdict) -> Verdict {
        match verdict.decision {
            Decision::Allow => {
                counter!("gateway_requests_allowed_total", 1, "reason" => verdict.reason.as_str())
            }
            Decision::Deny => {
                counter!("gateway_requests_denied_total", 1, "reason" => verdict.reason.as_str())
            }
        }
        verdict
    }

    /// Feed an `invalid_token` event observed by the authentication
    /// collaborator into the threat pipeline.
    pub async fn report_invalid_token(&self, ip: IpAddr) {
        self.recorder.record(ip, ThreatKind::InvalidToken).await;
    }

    /// Swap the rate limit rule set after a configuration reload
    pub async fn replace_rules(&self, rules: crate::core::rate_limiter::RuleSet) {
        self.limiter.replace_rules(rules).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::access_lists::MemoryAccessListStore;
    use crate::core::counter_store::MemoryCounterStore;
    use crate::core::rate_limiter::{RateLimitRule, RuleSet, GLOBAL_SCOPE};
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn request(client_ip: &str, path: &str) -> RequestContext {
        RequestContext {
            client_ip: ip(client_ip),
            principal_id: None,
            endpoint_path: path.to_string(),
            method: "GET".to_string(),
        }
    }

    fn gateway(limit: u32) -> (Gateway, Arc<AccessListManager>, Arc<ThreatEventRecorder>) {
        let access_lists = Arc::new(AccessListManager::new(Arc::new(
            MemoryAccessListStore::new(),
        )));
        let recorder = Arc::new(ThreatEventRecorder::new(24, 1000));
        let rules = RuleSet::new(
            RateLimitRule {
                scope: GLOBAL_SCOPE.to_string(),
                limit,
                window: StdDuration::from_secs(60),
                burst: 0,
            },
            vec![(
                "/login".to_string(),
                RateLimitRule {
                    scope: "endpoint:/login".to_string(),
                    limit: 5,
                    window: StdDuration::from_secs(60),
                    burst: 0,
                },
            )],
        );
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), rules, true);
        let gateway = Gateway::new(access_lists.clone(), limiter, recorder.clone());
        (gateway, access_lists, recorder)
    }

    #[tokio::test]
    async fn test_sixth_login_denied_with_one_violation_event() {
        let (gateway, _, recorder) = gateway(100);
        let req = request("1.2.3.4", "/login");

        for expected_remaining in [4, 3, 2, 1, 0] {
            let verdict = gateway.evaluate(&req).await;
            assert!(verdict.allowed());
            assert_eq!(verdict.reason, VerdictReason::WithinLimit);
            assert_eq!(verdict.remaining, Some(expected_remaining));
        }

        let verdict = gateway.evaluate(&req).await;
        assert!(!verdict.allowed());
        assert_eq!(verdict.reason, VerdictReason::RateLimited);
        assert!(verdict.retry_after_seconds.unwrap() <= 60);

        let events = recorder.snapshot_since(Utc::now() - Duration::hours(1)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ip, ip("1.2.3.4"));
        assert_eq!(events[0].kind, ThreatKind::RateLimitViolation);
    }

    #[tokio::test]
    async fn test_blacklisted_ip_denied_regardless_of_quota() {
        let (gateway, access_lists, recorder) = gateway(100);
        access_lists
            .add_to_blacklist("9.9.9.9", Some(1), "abuse")
            .await
            .unwrap();

        let verdict = gateway.evaluate(&request("9.9.9.9", "/login")).await;
        assert!(!verdict.allowed());
        assert_eq!(verdict.reason, VerdictReason::Blacklisted);

        let events = recorder.snapshot_since(Utc::now() - Duration::hours(1)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ThreatKind::BlacklistedAccess);
    }

    #[tokio::test]
    async fn test_blacklist_expiry_restores_rate_limiting() {
        let (gateway, access_lists, _) = gateway(100);
        access_lists
            .add_to_blacklist("9.9.9.9", Some(1), "short ban")
            .await
            .unwrap();

        let now = Utc::now();
        let req = request("9.9.9.9", "/videos");
        assert!(!gateway.evaluate_at(&req, now).await.allowed());

        let later = now + Duration::hours(2);
        let verdict = gateway.evaluate_at(&req, later).await;
        assert!(verdict.allowed());
        assert_eq!(verdict.reason, VerdictReason::WithinLimit);
    }

    #[tokio::test]
    async fn test_whitelisted_ip_bypasses_the_limiter() {
        let (gateway, access_lists, _) = gateway(100);
        access_lists
            .add_to_whitelist("8.8.8.8", None, "health checker")
            .await
            .unwrap();

        let req = request("8.8.8.8", "/login");
        for _ in 0..20 {
            let verdict = gateway.evaluate(&req).await;
            assert!(verdict.allowed());
            assert_eq!(verdict.reason, VerdictReason::Whitelisted);
        }
    }

    #[tokio::test]
    async fn test_principal_identity_shares_quota_across_ips() {
        let (gateway, _, _) = gateway(100);

        let mut from_first = request("1.1.1.1", "/login");
        from_first.principal_id = Some("user-42".to_string());
        let mut from_second = request("2.2.2.2", "/login");
        from_second.principal_id = Some("user-42".to_string());

        for _ in 0..3 {
            assert!(gateway.evaluate(&from_first).await.allowed());
        }
        for _ in 0..2 {
            assert!(gateway.evaluate(&from_second).await.allowed());
        }
        // Same principal, shared window: the sixth request is over quota.
        assert!(!gateway.evaluate(&from_second).await.allowed());
        // An anonymous client from the first IP still has its own quota.
        assert!(gateway.evaluate(&request("1.1.1.1", "/login")).await.allowed());
    }

    #[tokio::test]
    async fn test_invalid_token_reports_flow_into_the_log() {
        let (gateway, _, recorder) = gateway(100);

        gateway.report_invalid_token(ip("6.6.6.6")).await;

        let events = recorder.snapshot_since(Utc::now() - Duration::hours(1)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ThreatKind::InvalidToken);
    }
}
