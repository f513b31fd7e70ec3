//! Shared counter storage for rate limiting.
//!
//! This module abstracts the distributed atomic counter backend behind a
//! trait, with a Redis adapter for production and an in-memory adapter for
//! tests and single-instance deployments.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

/// Errors that can occur during counter store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Abstract storage interface for window counters.
///
/// Implementations must provide a single atomic increment primitive; callers
/// never emulate it with separate read and write calls.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` and return `(count, ttl_remaining)`.
    ///
    /// The first increment of a key sets its expiry to `window`; later
    /// increments within the window must not reset it.
    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, Duration), StoreError>;

    /// Read the current count for `key`, zero if absent.
    async fn get(&self, key: &str) -> Result<u64, StoreError>;

    /// Probe backend connectivity.
    async fn ping(&self) -> bool;
}

/// Counter store backed by Redis
pub struct RedisCounterStore {
    /// Redis client
    client: redis::Client,
    /// Per-call timeout, after which the caller's fail policy applies
    call_timeout: Duration,
}

impl RedisCounterStore {
    /// Create a new Redis-backed counter store
    pub fn new(client: redis::Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, Duration), StoreError> {
        let op = async {
            let mut conn = self.client.get_async_connection().await?;

            let count: u64 = conn.incr(key, 1u32).await?;

            if count == 1 {
                conn.expire::<_, ()>(key, window.as_secs() as usize).await?;
                return Ok((count, window));
            }

            // Trust the store's own clock for the remaining window so buckets
            // stay consistent across gateway replicas.
            let ttl: i64 = conn.ttl(key).await?;
            let remaining = if ttl > 0 {
                Duration::from_secs(ttl as u64)
            } else {
                window
            };
            Ok((count, remaining))
        };

        match timeout(self.call_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "increment timed out after {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        let op = async {
            let mut conn = self.client.get_async_connection().await?;
            let count: Option<u64> = conn.get(key).await?;
            Ok(count.unwrap_or(0))
        };

        match timeout(self.call_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "get timed out after {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }

    async fn ping(&self) -> bool {
        let op = async {
            let mut conn = self.client.get_async_connection().await.ok()?;
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .ok()
        };

        matches!(timeout(self.call_timeout, op).await, Ok(Some(_)))
    }
}

struct CounterSlot {
    count: u64,
    expires_at: Instant,
}

/// In-memory counter store for tests and single-instance deployments
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, CounterSlot>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, Duration), StoreError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap();

        let slot = counters.entry(key.to_string()).or_insert(CounterSlot {
            count: 0,
            expires_at: now + window,
        });
        if slot.expires_at <= now {
            slot.count = 0;
            slot.expires_at = now + window;
        }
        slot.count += 1;

        Ok((slot.count, slot.expires_at.duration_since(now)))
    }

    async fn get(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let counters = self.counters.lock().unwrap();
        Ok(counters
            .get(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| slot.count)
            .unwrap_or(0))
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_counts_within_window() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(60);

        let (count, ttl) = store.increment("k", window).await.unwrap();
        assert_eq!(count, 1);
        assert!(ttl <= window);

        let (count, _) = store.increment("k", window).await.unwrap();
        assert_eq!(count, 2);

        assert_eq!(store.get("k").await.unwrap(), 2);
        assert_eq!(store.get("absent").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_counter_resets() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_millis(20);

        let (count, _) = store.increment("k", window).await.unwrap();
        assert_eq!(count, 1);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let (count, _) = store.increment("k", window).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let store = Arc::new(MemoryCounterStore::new());
        let window = Duration::from_secs(60);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment("shared", window).await.unwrap().0 })
            })
            .collect();

        let counts: Vec<u64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        // Every increment observed a distinct count: none lost, none doubled.
        let mut sorted = counts.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (1..=50).collect::<Vec<u64>>());
        assert_eq!(store.get("shared").await.unwrap(), 50);
    }
}
