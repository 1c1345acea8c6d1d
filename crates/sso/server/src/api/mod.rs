//! HTTP surface of the SSO server

pub mod extract;
pub mod handlers;
pub mod router;
pub mod state;

pub use extract::BrokerSession;
pub use router::create_router;
pub use state::AppState;
