//! Threat event recording and analysis for the gateway guard service.
//!
//! Denied requests and policy violations are appended to a bounded
//! recent-events log; the analyzer projects that log into summary statistics
//! and a coarse threat level on demand.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::ThreatThresholds;

/// Threat event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    RateLimitViolation,
    InvalidToken,
    BlacklistedAccess,
}

/// One recorded violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvent {
    pub ip: IpAddr,
    pub kind: ThreatKind,
    pub timestamp: DateTime<Utc>,
}

/// Append-only log of recent threat events.
///
/// Bounded by a trailing retention window and a hard event cap. Recording is
/// best-effort relative to the request path: it cannot fail and never affects
/// a verdict already made.
pub struct ThreatEventRecorder {
    events: RwLock<VecDeque<ThreatEvent>>,
    retention: Duration,
    max_events: usize,
}

impl ThreatEventRecorder {
    /// Create a new recorder
    pub fn new(retention_hours: u64, max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            retention: Duration::hours(retention_hours as i64),
            max_events,
        }
    }

    /// Append an event for `ip`
    pub async fn record(&self, ip: IpAddr, kind: ThreatKind) {
        self.record_at(ip, kind, Utc::now()).await;
    }

    pub(crate) async fn record_at(&self, ip: IpAddr, kind: ThreatKind, now: DateTime<Utc>) {
        let mut events = self.events.write().await;
        events.push_back(ThreatEvent {
            ip,
            kind,
            timestamp: now,
        });
        Self::prune_locked(&mut events, now - self.retention, self.max_events);
    }

    /// Drop events older than the retention window
    pub async fn prune_expired(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let mut events = self.events.write().await;
        let before = events.len();
        Self::prune_locked(&mut events, cutoff, self.max_events);
        before - events.len()
    }

    fn prune_locked(events: &mut VecDeque<ThreatEvent>, cutoff: DateTime<Utc>, max_events: usize) {
        while events
            .front()
            .map_or(false, |event| event.timestamp <= cutoff)
        {
            events.pop_front();
        }
        while events.len() > max_events {
            events.pop_front();
        }
    }

    /// Snapshot of events newer than `cutoff`
    pub async fn snapshot_since(&self, cutoff: DateTime<Utc>) -> Vec<ThreatEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|event| event.timestamp > cutoff)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

/// Coarse severity label for recent violation volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Minimal,
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    /// Map a total event count onto a level via monotonic thresholds
    pub fn from_total(total: u64, thresholds: &ThreatThresholds) -> Self {
        if total < thresholds.low {
            ThreatLevel::Minimal
        } else if total < thresholds.medium {
            ThreatLevel::Low
        } else if total < thresholds.high {
            ThreatLevel::Medium
        } else {
            ThreatLevel::High
        }
    }
}

/// Per-kind event counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreatKindCounts {
    pub rate_limit_violation: u64,
    pub invalid_token: u64,
    pub blacklisted_access: u64,
}

/// One offending IP with its event count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpThreatCount {
    pub ip: IpAddr,
    pub count: u64,
}

/// Summary statistics over a trailing window of threat events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAnalysis {
    pub window_hours: u64,
    pub total_threats: u64,
    pub counts: ThreatKindCounts,
    pub unique_ips: u64,
    pub top_threat_ips: Vec<IpThreatCount>,
    pub threat_level: ThreatLevel,
}

/// On-demand projection of the event log into a `ThreatAnalysis`
pub struct ThreatAnalyzer {
    recorder: Arc<ThreatEventRecorder>,
    thresholds: ThreatThresholds,
    top_n: usize,
}

impl ThreatAnalyzer {
    /// Create a new analyzer over the given recorder
    pub fn new(
        recorder: Arc<ThreatEventRecorder>,
        thresholds: ThreatThresholds,
        top_n: usize,
    ) -> Self {
        Self {
            recorder,
            thresholds,
            top_n,
        }
    }

    /// Aggregate the last `window_hours` of events
    pub async fn analyze(&self, window_hours: u64) -> ThreatAnalysis {
        self.analyze_at(window_hours, Utc::now()).await
    }

    pub(crate) async fn analyze_at(
        &self,
        window_hours: u64,
        now: DateTime<Utc>,
    ) -> ThreatAnalysis {
        let cutoff = now - Duration::hours(window_hours as i64);
        let events = self.recorder.snapshot_since(cutoff).await;

        let mut counts = ThreatKindCounts::default();
        let mut per_ip: HashMap<IpAddr, (u64, DateTime<Utc>)> = HashMap::new();
        for event in &events {
            match event.kind {
                ThreatKind::RateLimitViolation => counts.rate_limit_violation += 1,
                ThreatKind::InvalidToken => counts.invalid_token += 1,
                ThreatKind::BlacklistedAccess => counts.blacklisted_access += 1,
            }
            let slot = per_ip.entry(event.ip).or_insert((0, event.timestamp));
            slot.0 += 1;
            if event.timestamp > slot.1 {
                slot.1 = event.timestamp;
            }
        }

        let total_threats = events.len() as u64;
        let unique_ips = per_ip.len() as u64;

        let mut ranked: Vec<(IpAddr, u64, DateTime<Utc>)> = per_ip
            .into_iter()
            .map(|(ip, (count, last_seen))| (ip, count, last_seen))
            .collect();
        // Count descending, ties broken by most-recent event.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
        ranked.truncate(self.top_n);

        ThreatAnalysis {
            window_hours,
            total_threats,
            counts,
            unique_ips,
            top_threat_ips: ranked
                .into_iter()
                .map(|(ip, count, _)| IpThreatCount { ip, count })
                .collect(),
            threat_level: ThreatLevel::from_total(total_threats, &self.thresholds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn analyzer(recorder: Arc<ThreatEventRecorder>) -> ThreatAnalyzer {
        ThreatAnalyzer::new(recorder, ThreatThresholds::default(), 10)
    }

    #[tokio::test]
    async fn test_analysis_of_mixed_event_log() {
        let recorder = Arc::new(ThreatEventRecorder::new(24, 1000));
        let now = Utc::now();

        for _ in 0..3 {
            recorder
                .record_at(ip("1.1.1.1"), ThreatKind::RateLimitViolation, now)
                .await;
        }
        for _ in 0..2 {
            recorder
                .record_at(ip("2.2.2.2"), ThreatKind::InvalidToken, now)
                .await;
        }

        let analysis = analyzer(recorder).analyze_at(24, now).await;
        assert_eq!(analysis.total_threats, 5);
        assert_eq!(analysis.counts.rate_limit_violation, 3);
        assert_eq!(analysis.counts.invalid_token, 2);
        assert_eq!(analysis.counts.blacklisted_access, 0);
        assert_eq!(analysis.unique_ips, 2);
        assert_eq!(analysis.threat_level, ThreatLevel::Minimal);

        assert_eq!(analysis.top_threat_ips.len(), 2);
        assert_eq!(analysis.top_threat_ips[0].ip, ip("1.1.1.1"));
        assert_eq!(analysis.top_threat_ips[0].count, 3);
        assert_eq!(analysis.top_threat_ips[1].ip, ip("2.2.2.2"));
        assert_eq!(analysis.top_threat_ips[1].count, 2);
    }

    #[tokio::test]
    async fn test_equal_counts_rank_by_recency() {
        let recorder = Arc::new(ThreatEventRecorder::new(24, 1000));
        let now = Utc::now();

        recorder
            .record_at(
                ip("1.1.1.1"),
                ThreatKind::RateLimitViolation,
                now - Duration::minutes(30),
            )
            .await;
        recorder
            .record_at(
                ip("2.2.2.2"),
                ThreatKind::RateLimitViolation,
                now - Duration::minutes(5),
            )
            .await;

        let analysis = analyzer(recorder).analyze_at(24, now).await;
        assert_eq!(analysis.top_threat_ips[0].ip, ip("2.2.2.2"));
        assert_eq!(analysis.top_threat_ips[1].ip, ip("1.1.1.1"));
    }

    #[tokio::test]
    async fn test_top_list_is_capped() {
        let recorder = Arc::new(ThreatEventRecorder::new(24, 1000));
        let now = Utc::now();

        for octet in 1..=15u8 {
            recorder
                .record_at(
                    IpAddr::from([10, 0, 0, octet]),
                    ThreatKind::RateLimitViolation,
                    now,
                )
                .await;
        }

        let analysis = ThreatAnalyzer::new(recorder, ThreatThresholds::default(), 10)
            .analyze_at(24, now)
            .await;
        assert_eq!(analysis.unique_ips, 15);
        assert_eq!(analysis.top_threat_ips.len(), 10);
    }

    #[tokio::test]
    async fn test_events_outside_window_are_excluded() {
        let recorder = Arc::new(ThreatEventRecorder::new(48, 1000));
        let now = Utc::now();

        recorder
            .record_at(
                ip("1.1.1.1"),
                ThreatKind::RateLimitViolation,
                now - Duration::hours(30),
            )
            .await;
        recorder
            .record_at(ip("2.2.2.2"), ThreatKind::InvalidToken, now)
            .await;

        let analysis = analyzer(recorder.clone()).analyze_at(24, now).await;
        assert_eq!(analysis.total_threats, 1);
        assert_eq!(analysis.unique_ips, 1);

        let wider = analyzer(recorder).analyze_at(48, now).await;
        assert_eq!(wider.total_threats, 2);
    }

    #[tokio::test]
    async fn test_retention_prunes_old_events_on_append() {
        let recorder = ThreatEventRecorder::new(24, 1000);
        let now = Utc::now();

        recorder
            .record_at(
                ip("1.1.1.1"),
                ThreatKind::RateLimitViolation,
                now - Duration::hours(25),
            )
            .await;
        assert_eq!(recorder.len().await, 1);

        recorder
            .record_at(ip("2.2.2.2"), ThreatKind::RateLimitViolation, now)
            .await;
        assert_eq!(recorder.len().await, 1);
    }

    #[tokio::test]
    async fn test_event_cap_drops_oldest_first() {
        let recorder = ThreatEventRecorder::new(24, 3);
        let now = Utc::now();

        for octet in 1..=5u8 {
            recorder
                .record_at(
                    IpAddr::from([10, 0, 0, octet]),
                    ThreatKind::RateLimitViolation,
                    now,
                )
                .await;
        }

        assert_eq!(recorder.len().await, 3);
        let events = recorder.snapshot_since(now - Duration::hours(1)).await;
        assert_eq!(events[0].ip, IpAddr::from([10, 0, 0, 3]));
    }

    #[test]
    fn test_threat_level_threshold_boundaries() {
        let thresholds = ThreatThresholds::default();

        assert_eq!(ThreatLevel::from_total(0, &thresholds), ThreatLevel::Minimal);
        assert_eq!(ThreatLevel::from_total(9, &thresholds), ThreatLevel::Minimal);
        assert_eq!(ThreatLevel::from_total(10, &thresholds), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_total(49, &thresholds), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_total(50, &thresholds), ThreatLevel::Medium);
        assert_eq!(
            ThreatLevel::from_total(199, &thresholds),
            ThreatLevel::Medium
        );
        assert_eq!(ThreatLevel::from_total(200, &thresholds), ThreatLevel::High);
    }
}
