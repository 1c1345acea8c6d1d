//! Registered brokers: id -> secret and allowed domains.

use crate::error::StoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A broker registered with the SSO server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerRecord {
    /// Alphanumeric broker id
    pub id: String,

    /// Shared secret for attach and bearer checksums
    pub secret: String,

    /// Hosts the broker may attach from or return to, lowercased
    #[serde(default, alias = "domains", deserialize_with = "lowercase_domains")]
    pub allowed_domains: BTreeSet<String>,
}

impl BrokerRecord {
    pub fn new(
        id: impl Into<String>,
        secret: impl Into<String>,
        allowed_domains: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            allowed_domains: allowed_domains
                .into_iter()
                .map(|domain| Into::<String>::into(domain).to_ascii_lowercase())
                .collect(),
        }
    }

    /// `host` as parsed from a URL, i.e. already lowercase.
    pub fn allows_host(&self, host: &str) -> bool {
        self.allowed_domains.contains(host)
    }
}

fn lowercase_domains<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let domains = Vec::<String>::deserialize(deserializer)?;
    Ok(domains
        .into_iter()
        .map(|domain| domain.to_ascii_lowercase())
        .collect())
}

impl fmt::Debug for BrokerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerRecord")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .field("allowed_domains", &self.allowed_domains)
            .finish()
    }
}

/// Lookup of broker records by id.
#[async_trait]
pub trait BrokerDirectory: Send + Sync {
    /// Get an enabled broker by id.
    async fn broker(&self, id: &str) -> StoreResult<Option<BrokerRecord>>;
}

/// Fixed set of brokers, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticBrokerDirectory {
    brokers: HashMap<String, BrokerRecord>,
}

impl StaticBrokerDirectory {
    pub fn new(brokers: impl IntoIterator<Item = BrokerRecord>) -> Self {
        Self {
            brokers: brokers
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }
}

#[async_trait]
impl BrokerDirectory for StaticBrokerDirectory {
    async fn broker(&self, id: &str) -> StoreResult<Option<BrokerRecord>> {
        Ok(self.brokers.get(id).cloned())
    }
}
