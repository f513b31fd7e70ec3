//! Blacklist and whitelist management for the gateway guard service.
//!
//! This module owns allow/deny entries with optional expiry. Entries are
//! cached in-process for request-path lookups and written through to the
//! shared store so they survive gateway restarts.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ipnet::IpNet;
use log::{info, warn};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors that can occur during allow/deny list operations
#[derive(Error, Debug)]
pub enum AccessListError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no active entry for {0}")]
    NotFound(String),
    #[error("conflicting entry: {0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Store(String),
}

impl From<redis::RedisError> for AccessListError {
    fn from(err: redis::RedisError) -> Self {
        AccessListError::Store(err.to_string())
    }
}

/// Which list an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Allow,
    Deny,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Allow => "allow",
            ListKind::Deny => "deny",
        }
    }
}

/// A blacklist or whitelist entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEntry {
    /// Entry ID
    pub id: Uuid,
    /// Covered address or network
    pub ip: IpNet,
    /// Whether this entry allows or denies
    pub kind: ListKind,
    /// Operator-supplied reason
    pub reason: String,
    /// Entry creation timestamp
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp, `None` for permanent entries
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Parse an IP address or CIDR network, widening bare addresses to
/// full-length prefixes.
fn parse_net(input: &str) -> Result<IpNet, AccessListError> {
    if let Ok(net) = input.parse::<IpNet>() {
        return Ok(net);
    }
    input
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| AccessListError::InvalidInput(format!("not a valid IP or CIDR: {}", input)))
}

/// Persistence backend for allow/deny entries.
#[async_trait]
pub trait AccessListStore: Send + Sync {
    async fn save(&self, entry: &AccessEntry) -> Result<(), AccessListError>;
    async fn delete(&self, kind: ListKind, net: &IpNet) -> Result<(), AccessListError>;
    async fn load_all(&self) -> Result<Vec<AccessEntry>, AccessListError>;
}

/// Access list persistence in Redis, one hash per list kind
pub struct RedisAccessListStore {
    client: redis::Client,
}

impl RedisAccessListStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    fn hash_key(kind: ListKind) -> String {
        format!("access_list:{}", kind.as_str())
    }
}

#[async_trait]
impl AccessListStore for RedisAccessListStore {
    async fn save(&self, entry: &AccessEntry) -> Result<(), AccessListError> {
        let mut conn = self.client.get_async_connection().await?;
        let json = serde_json::to_string(entry)
            .map_err(|e| AccessListError::Store(format!("entry serialization error: {}", e)))?;
        conn.hset::<_, _, _, ()>(Self::hash_key(entry.kind), entry.ip.to_string(), json)
            .await?;
        Ok(())
    }

    async fn delete(&self, kind: ListKind, net: &IpNet) -> Result<(), AccessListError> {
        let mut conn = self.client.get_async_connection().await?;
        conn.hdel::<_, _, ()>(Self::hash_key(kind), net.to_string())
            .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<AccessEntry>, AccessListError> {
        let mut conn = self.client.get_async_connection().await?;
        let mut entries = Vec::new();
        for kind in [ListKind::Allow, ListKind::Deny] {
            let raw: HashMap<String, String> = conn.hgetall(Self::hash_key(kind)).await?;
            for (field, json) in raw {
                match serde_json::from_str::<AccessEntry>(&json) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!("skipping unparseable access entry {}: {}", field, e),
                }
            }
        }
        Ok(entries)
    }
}

/// In-memory access list persistence for tests
#[derive(Default)]
pub struct MemoryAccessListStore {
    entries: Mutex<HashMap<(ListKind, String), AccessEntry>>,
}

impl MemoryAccessListStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessListStore for MemoryAccessListStore {
    async fn save(&self, entry: &AccessEntry) -> Result<(), AccessListError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert((entry.kind, entry.ip.to_string()), entry.clone());
        Ok(())
    }

    async fn delete(&self, kind: ListKind, net: &IpNet) -> Result<(), AccessListError> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&(kind, net.to_string()));
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<AccessEntry>, AccessListError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.values().cloned().collect())
    }
}

/// Allow/deny list manager.
///
/// Keeps a write-through in-process cache of all entries. At most one active
/// entry exists per network; on conflict, deny wins.
pub struct AccessListManager {
    store: Arc<dyn AccessListStore>,
    entries: RwLock<HashMap<IpNet, AccessEntry>>,
}

impl AccessListManager {
    /// Create a new manager backed by the given store
    pub fn new(store: Arc<dyn AccessListStore>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Populate the cache from the persistence backend
    pub async fn load(&self) -> Result<usize, AccessListError> {
        let now = Utc::now();
        let loaded = self.store.load_all().await?;
        let mut entries = self.entries.write().await;
        entries.clear();
        for entry in loaded {
            if entry.is_expired_at(now) {
                continue;
            }
            match entries.get(&entry.ip) {
                // One active entry per net; deny wins over a persisted allow.
                Some(existing) if existing.kind == ListKind::Deny => {}
                _ => {
                    entries.insert(entry.ip, entry);
                }
            }
        }
        Ok(entries.len())
    }

    /// Add a deny entry for an IP or CIDR network.
    ///
    /// `duration_hours = None` makes the entry permanent. A conflicting
    /// active allow entry is superseded.
    pub async fn add_to_blacklist(
        &self,
        ip: &str,
        duration_hours: Option<i64>,
        reason: &str,
    ) -> Result<Uuid, AccessListError> {
        self.add(ListKind::Deny, ip, duration_hours, reason).await
    }

    /// Add an allow entry for an IP or CIDR network.
    ///
    /// Fails with `Conflict` while an active deny entry covers the same
    /// network: deny wins.
    pub async fn add_to_whitelist(
        &self,
        ip: &str,
        duration_hours: Option<i64>,
        reason: &str,
    ) -> Result<Uuid, AccessListError> {
        self.add(ListKind::Allow, ip, duration_hours, reason).await
    }

    async fn add(
        &self,
        kind: ListKind,
        ip: &str,
        duration_hours: Option<i64>,
        reason: &str,
    ) -> Result<Uuid, AccessListError> {
        let net = parse_net(ip)?;
        if let Some(hours) = duration_hours {
            if hours <= 0 {
                return Err(AccessListError::InvalidInput(format!(
                    "duration_hours must be positive, got {}",
                    hours
                )));
            }
        }

        let now = Utc::now();
        let entry = AccessEntry {
            id: Uuid::new_v4(),
            ip: net,
            kind,
            reason: reason.to_string(),
            created_at: now,
            expires_at: duration_hours.map(|h| now + Duration::hours(h)),
        };

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&net).filter(|e| !e.is_expired_at(now)) {
            match (existing.kind, kind) {
                (ListKind::Deny, ListKind::Allow) => {
                    warn!(
                        "refusing allow entry for {}: active deny entry {} takes precedence",
                        net, existing.id
                    );
                    return Err(AccessListError::Conflict(format!(
                        "{} holds an active deny entry",
                        net
                    )));
                }
                (ListKind::Allow, ListKind::Deny) => {
                    warn!(
                        "allow entry {} for {} superseded by new deny entry",
                        existing.id, net
                    );
                    self.store.delete(ListKind::Allow, &net).await?;
                }
                _ => {}
            }
        }

        self.store.save(&entry).await?;
        let id = entry.id;
        entries.insert(net, entry);

        // Operator audit trail, separate from the threat pipeline.
        info!(
            "{} entry added: ip={} duration_hours={:?} reason={:?} id={}",
            kind.as_str(),
            net,
            duration_hours,
            reason,
            id
        );
        Ok(id)
    }

    /// Remove an active deny entry. `NotFound` if none exists.
    pub async fn remove_from_blacklist(&self, ip: &str) -> Result<(), AccessListError> {
        self.remove(ListKind::Deny, ip).await
    }

    /// Remove an active allow entry. `NotFound` if none exists.
    pub async fn remove_from_whitelist(&self, ip: &str) -> Result<(), AccessListError> {
        self.remove(ListKind::Allow, ip).await
    }

    async fn remove(&self, kind: ListKind, ip: &str) -> Result<(), AccessListError> {
        let net = parse_net(ip)?;
        let now = Utc::now();

        let mut entries = self.entries.write().await;
        let active = entries
            .get(&net)
            .filter(|e| e.kind == kind && !e.is_expired_at(now))
            .is_some();
        if !active {
            return Err(AccessListError::NotFound(net.to_string()));
        }

        self.store.delete(kind, &net).await?;
        entries.remove(&net);
        info!("{} entry removed: ip={}", kind.as_str(), net);
        Ok(())
    }

    pub async fn is_blacklisted(&self, ip: IpAddr) -> bool {
        self.lookup_at(ip, ListKind::Deny, Utc::now()).await
    }

    pub async fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.lookup_at(ip, ListKind::Allow, Utc::now()).await
    }

    /// Check whether `ip` is covered by an active entry of `kind` as of `now`.
    ///
    /// Expired entries are treated as absent without requiring a delete.
    pub(crate) async fn lookup_at(&self, ip: IpAddr, kind: ListKind, now: DateTime<Utc>) -> bool {
        let entries = self.entries.read().await;

        // Host entries resolve in one map probe; network entries are scanned.
        if let Some(entry) = entries.get(&IpNet::from(ip)) {
            if entry.kind == kind && !entry.is_expired_at(now) {
                return true;
            }
        }
        entries.values().any(|entry| {
            entry.kind == kind
                && !entry.is_expired_at(now)
                && entry.ip.prefix_len() < entry.ip.max_prefix_len()
                && entry.ip.contains(&ip)
        })
    }

    /// List active entries of one kind, newest first
    pub async fn list(&self, kind: ListKind) -> Vec<AccessEntry> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut listed: Vec<AccessEntry> = entries
            .values()
            .filter(|e| e.kind == kind && !e.is_expired_at(now))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        listed
    }

    /// Count active `(allow, deny)` entries
    pub async fn counts(&self) -> (usize, usize) {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut allow = 0;
        let mut deny = 0;
        for entry in entries.values().filter(|e| !e.is_expired_at(now)) {
            match entry.kind {
                ListKind::Allow => allow += 1,
                ListKind::Deny => deny += 1,
            }
        }
        (allow, deny)
    }

    /// Drop expired entries from the cache and the store, returning how many
    /// were removed
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let expired: Vec<AccessEntry> = entries
            .values()
            .filter(|e| e.is_expired_at(now))
            .cloned()
            .collect();
        for entry in &expired {
            entries.remove(&entry.ip);
            if let Err(e) = self.store.delete(entry.kind, &entry.ip).await {
                warn!("failed to delete expired entry {} from store: {}", entry.ip, e);
            }
        }
        expired.len()
    }
}
