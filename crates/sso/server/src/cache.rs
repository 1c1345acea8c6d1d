//! Link cache: `SSO-{broker}-{token}` -> session id, with expiry.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

/// Cache key linking a broker token to a client session.
pub fn link_key(broker_id: &str, token: &str) -> String {
    format!("SSO-{}-{}", broker_id, token)
}

/// Key/value store holding broker-token to session links.
///
/// Implementations must be safe for concurrent use by many request handlers.
/// `insert_if_vacant` is the compare-and-set primitive that serializes
/// concurrent attaches of the same token.
#[async_trait]
pub trait LinkCache: Send + Sync {
    /// Get the session id linked to `key`, if any and not expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` under `key` unless a live entry exists.
    ///
    /// Returns `None` when the value was stored, or the existing value. An
    /// existing entry equal to `value` has its TTL refreshed.
    async fn insert_if_vacant(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<Option<String>>;

    /// Remove `key`. Returns whether a live entry was removed.
    async fn remove(&self, key: &str) -> StoreResult<bool>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory link cache for development and testing
#[derive(Debug, Default)]
pub struct InMemoryLinkCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryLinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let now = Instant::now();
        let mut guard = self
            .entries
            .write()
            .map_err(|_| StoreError::Backend("link cache lock poisoned".to_string()))?;
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now));
        Ok(before - guard.len())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LinkCache for InMemoryLinkCache {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let guard = self
            .entries
            .read()
            .map_err(|_| StoreError::Backend("link cache lock poisoned".to_string()))?;
        let now = Instant::now();
        Ok(guard
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn insert_if_vacant(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> StoreResult<Option<String>> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| StoreError::Backend("link cache lock poisoned".to_string()))?;
        let now = Instant::now();
        let expires_at = now + ttl;

        match guard.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                if entry.value == value {
                    entry.expires_at = expires_at;
                }
                Ok(Some(entry.value.clone()))
            }
            _ => {
                guard.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at,
                    },
                );
                Ok(None)
            }
        }
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| StoreError::Backend("link cache lock poisoned".to_string()))?;
        let now = Instant::now();
        Ok(guard.remove(key).is_some_and(|entry| entry.is_live(now)))
    }
}
