//! Short-lived read caches for badge and leaderboard views
//!
//! Entries are fresh for the configured TTL. Score-affecting writes
//! invalidate them. When a recomputation fails or times out, the last value
//! is served even if it has expired.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::badges::BadgeStatus;
use crate::error::{TrustError, TrustResult};
use crate::leaderboard::ScopeKey;
use crate::models::User;

struct CachedValue<V> {
    value: V,
    stored_at: Instant,
    expired: bool,
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, CachedValue<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Value stored within the TTL
    pub fn get_fresh(&self, key: &K) -> Option<V> {
        self.entries
            .get(key)
            .filter(|entry| !entry.expired && entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    /// Last stored value regardless of age
    pub fn get_stale(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CachedValue {
                value,
                stored_at: Instant::now(),
                expired: false,
            },
        );
    }

    /// Mark the entry expired but keep it as a fallback
    pub fn invalidate(&self, key: &K) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expired = true;
        }
    }

    /// Mark every entry expired but keep them as fallbacks
    pub fn invalidate_all(&self) {
        for mut entry in self.entries.iter_mut() {
            entry.expired = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serve a fresh entry, otherwise compute under `timeout`, falling back
    /// to the stale entry when the computation fails.
    pub async fn read_through<F>(&self, key: K, timeout: Duration, label: &str, compute: F) -> TrustResult<V>
    where
        F: Future<Output = TrustResult<V>>,
    {
        if let Some(value) = self.get_fresh(&key) {
            return Ok(value);
        }

        let result = match tokio::time::timeout(timeout, compute).await {
            Ok(result) => result,
            Err(_) => Err(TrustError::Timeout(format!("{} read exceeded {:?}", label, timeout))),
        };

        match result {
            Ok(value) => {
                self.insert(key, value.clone());
                Ok(value)
            }
            Err(e) if e.is_infrastructure() => match self.get_stale(&key) {
                Some(value) => {
                    warn!(error = %e, "{} unavailable, serving last-known value", label);
                    Ok(value)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

/// Caches shared by the read paths and invalidated by score writes
pub struct ReadCaches {
    pub badges: TtlCache<String, Vec<BadgeStatus>>,
    pub leaderboards: TtlCache<ScopeKey, Arc<Vec<User>>>,
}

impl ReadCaches {
    pub fn new(ttl: Duration) -> Self {
        Self {
            badges: TtlCache::new(ttl),
            leaderboards: TtlCache::new(ttl),
        }
    }

    /// A user's score or vouch set changed
    pub fn invalidate_user(&self, user_id: &str) {
        self.badges.invalidate(&user_id.to_string());
        self.leaderboards.invalidate_all();
    }
}
