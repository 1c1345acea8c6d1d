//! SSO broker client
//!
//! A broker is a website that relies on the SSO server for authentication.
//! It provides:
//! - Client token generation and attach URLs
//! - Verification code handling on the return from the server
//! - Bearer-signed API requests with allow-listed commands

pub mod broker;
pub mod commands;
pub mod config;
pub mod error;
pub mod http;
pub mod response;
pub mod state;

pub use broker::{Broker, RequestData};
pub use commands::{ApiCommand, UnknownCommand};
pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
pub use state::{MemoryState, StateStore};

pub use reqwest::Method;
