//! Configuration for the SSO server

use crate::auth::UserEntry;
use crate::directory::BrokerRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoConfig {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: HttpConfig,

    /// User session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Broker-token link configuration
    #[serde(default)]
    pub link: LinkConfig,

    /// Registered brokers
    #[serde(default)]
    pub brokers: Vec<BrokerRecord>,

    /// Static user table. Usernames are case-insensitive.
    #[serde(default)]
    pub users: HashMap<String, UserEntry>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            server: HttpConfig::default(),
            session: SessionConfig::default(),
            link: LinkConfig::default(),
            brokers: Vec::new(),
            users: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
        }
    }
}

/// User session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name of the session cookie on the server domain
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// Mark the session cookie `Secure`
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            ttl_secs: default_session_ttl(),
            secure_cookie: false,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Broker-token link configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Link lifetime in seconds; defaults to ten session lifetimes
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

fn default_cookie_name() -> String {
    "sso_session".to_string()
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SsoConfig {
    /// Load configuration from defaults, an optional file and `SSO_*` env vars
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&SsoConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // e.g. SSO_SERVER__LISTEN_ADDR, SSO_SESSION__TTL_SECS
        builder = builder.add_source(
            config::Environment::with_prefix("SSO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Effective lifetime of a broker-token link.
    pub fn link_ttl(&self) -> Duration {
        match self.link.ttl_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.session.ttl() * 10,
        }
    }
}
