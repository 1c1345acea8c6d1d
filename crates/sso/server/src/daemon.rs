//! Daemon setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::auth::StaticAuthenticator;
use crate::cache::InMemoryLinkCache;
use crate::config::SsoConfig;
use crate::directory::StaticBrokerDirectory;
use crate::error::{DaemonError, DaemonResult};
use crate::server::Server;
use crate::session::InMemorySessionStore;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Interval of the expired-entry sweep
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// SSO server daemon
pub struct Daemon {
    config: SsoConfig,
    cache: Arc<InMemoryLinkCache>,
    sessions: Arc<InMemorySessionStore>,
    state: AppState,
}

impl Daemon {
    /// Create a new daemon with the given configuration
    pub fn new(config: SsoConfig) -> DaemonResult<Self> {
        if config.brokers.is_empty() {
            tracing::warn!("No brokers configured; every attach will be rejected");
        }

        let cache = Arc::new(InMemoryLinkCache::new());
        let sessions = Arc::new(InMemorySessionStore::new(config.session.ttl()));
        let brokers = Arc::new(StaticBrokerDirectory::new(config.brokers.clone()));
        let authenticator = Arc::new(StaticAuthenticator::new(config.users.clone()));

        let server = Server::new(brokers, cache.clone()).with_link_ttl(config.link_ttl());

        let state = AppState::new(
            server,
            sessions.clone(),
            authenticator,
            config.session.clone(),
        );

        Ok(Self {
            config,
            cache,
            sessions,
            state,
        })
    }

    /// Router serving the daemon's endpoints
    pub fn router(&self) -> Router {
        create_router(self.state.clone(), self.config.server.enable_cors)
    }

    /// Run the daemon until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = self.router();

        let listener = TcpListener::bind(addr).await?;

        tracing::info!("SSO server listening on {}", addr);
        tracing::info!(
            brokers = self.config.brokers.len(),
            link_ttl_secs = self.config.link_ttl().as_secs(),
            "Broker directory loaded"
        );

        let sweeper = tokio::spawn(purge_loop(self.cache.clone(), self.sessions.clone()));

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("SSO server shutting down");
        sweeper.abort();

        Ok(())
    }
}

/// Periodically drop expired links and sessions
async fn purge_loop(cache: Arc<InMemoryLinkCache>, sessions: Arc<InMemorySessionStore>) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);
    loop {
        interval.tick().await;

        match cache.purge_expired() {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Purged expired broker links"),
            Err(e) => tracing::error!(error = %e, "Failed to purge broker links"),
        }
        match sessions.purge_expired() {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Purged expired sessions"),
            Err(e) => tracing::error!(error = %e, "Failed to purge sessions"),
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
