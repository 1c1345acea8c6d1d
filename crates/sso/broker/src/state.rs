//! Persisted broker state.
//!
//! The broker keeps its client token and verification code in host-provided
//! storage, usually cookies or the broker site's own session.

use crate::error::{BrokerError, BrokerResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// Key/value storage for the client token and verification code.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> BrokerResult<()>;

    /// Remove a key. Never fails.
    fn remove(&self, key: &str);
}

/// Storage key of the client token: `sso_token_{broker}`.
pub fn token_key(broker_id: &str) -> String {
    format!("sso_token_{}", normalize(broker_id))
}

/// Storage key of the verification code: `sso_verify_{broker}`.
pub fn verify_key(broker_id: &str) -> String {
    format!("sso_verify_{}", normalize(broker_id))
}

/// Lowercase, with runs of `_` and non-word characters folded into one `_`.
fn normalize(broker_id: &str) -> String {
    let mut normalized = String::with_capacity(broker_id.len());
    let mut in_separator = false;

    for c in broker_id.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            normalized.push(c);
            in_separator = false;
        } else if !in_separator {
            normalized.push('_');
            in_separator = true;
        }
    }

    normalized
}

/// In-memory state, for tests and single-process hosts
#[derive(Debug, Default)]
pub struct MemoryState {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            values: RwLock::new(
                pairs
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
        }
    }
}

impl StateStore for MemoryState {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> BrokerResult<()> {
        let mut guard = self
            .values
            .write()
            .map_err(|_| BrokerError::State("state lock poisoned".to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        if let Ok(mut guard) = self.values.write() {
            guard.remove(key);
        }
    }
}
