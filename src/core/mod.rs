//! Core functionality for the gateway guard service.
//!
//! This module contains the core components of the engine:
//! counter storage, allow/deny lists, rate limiting, threat recording and
//! analysis, and the per-request decision facade.

pub mod access_lists;
pub mod counter_store;
pub mod gateway;
pub mod rate_limiter;
pub mod threats;

pub use access_lists::{AccessEntry, AccessListManager, AccessListError, ListKind};
pub use counter_store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreError};
pub use gateway::{Decision, Gateway, RequestContext, Verdict, VerdictReason};
pub use rate_limiter::{RateLimitDecision, RateLimitRule, RateLimiter, RuleSet};
pub use threats::{ThreatAnalysis, ThreatAnalyzer, ThreatEventRecorder, ThreatKind, ThreatLevel};
