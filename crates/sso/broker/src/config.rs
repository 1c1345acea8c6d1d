//! Broker configuration

use crate::broker::{Broker, DEFAULT_TIMEOUT};
use crate::error::BrokerResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Credentials and endpoint issued to a broker by the SSO provider
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Attach endpoint of the SSO server
    pub server_url: String,

    /// Broker identifier
    pub broker_id: String,

    /// Shared secret
    pub secret: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl BrokerConfig {
    /// Load from an optional file and `SSO_BROKER_*` env vars
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("timeout_secs", default_timeout_secs() as i64)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // e.g. SSO_BROKER_SERVER_URL, SSO_BROKER_SECRET
        builder = builder.add_source(
            config::Environment::with_prefix("SSO_BROKER")
                .prefix_separator("_")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build a broker with in-memory state and the default HTTP client
    pub fn build(&self) -> BrokerResult<Broker> {
        Broker::with_timeout(&self.server_url, &self.broker_id, &self.secret, self.timeout())
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("server_url", &self.server_url)
            .field("broker_id", &self.broker_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}
