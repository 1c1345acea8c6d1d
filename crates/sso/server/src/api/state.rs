//! Application state for API handlers

use crate::auth::Authenticator;
use crate::config::SessionConfig;
use crate::server::Server;
use crate::session::{ActiveSession, SessionStore};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// SSO server core
    pub server: Server,

    /// Session backend
    pub sessions: Arc<dyn SessionStore>,

    /// Credential check for the login endpoint
    pub authenticator: Arc<dyn Authenticator>,

    /// Session cookie settings
    pub session_config: SessionConfig,

    /// Server version
    pub version: String,

    /// Server start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        server: Server,
        sessions: Arc<dyn SessionStore>,
        authenticator: Arc<dyn Authenticator>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            server,
            sessions,
            authenticator,
            session_config,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Fresh per-request session handle
    pub fn active_session(&self) -> ActiveSession {
        ActiveSession::new(self.sessions.clone())
    }

    /// `Set-Cookie` value carrying the server session id
    pub fn session_cookie(&self, session_id: &str) -> String {
        let config = &self.session_config;
        let same_site = if config.secure_cookie {
            "SameSite=None; Secure"
        } else {
            "SameSite=Lax"
        };
        format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; {}",
            config.cookie_name, session_id, config.ttl_secs, same_site
        )
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
