//! SSO server library
//!
//! This crate provides the identity-provider side of the single sign-on
//! handshake:
//! - The [`Server`] core with `attach`, `start_broker_session` and `detach`
//! - Link cache, session store, broker directory and authenticator backends
//! - The axum HTTP surface and daemon lifecycle

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod daemon;
pub mod directory;
pub mod error;
pub mod request;
pub mod server;
pub mod session;

pub use api::{create_router, AppState};
pub use auth::{Authenticator, StaticAuthenticator, UserEntry, UserInfo};
pub use cache::{link_key, InMemoryLinkCache, LinkCache};
pub use config::SsoConfig;
pub use daemon::Daemon;
pub use directory::{BrokerDirectory, BrokerRecord, StaticBrokerDirectory};
pub use error::{DaemonError, SsoError, SsoResult, StoreError, StoreResult};
pub use request::SsoRequest;
pub use server::{Bearer, BrokerLink, DomainSource, Server};
pub use session::{ActiveSession, InMemorySessionStore, Session, SessionStore};
