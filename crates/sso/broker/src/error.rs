//! Error types for the SSO broker

use std::fmt;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Broker errors
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Invalid server URL or broker id; raised at construction
    #[error("{0}")]
    Configuration(String),

    /// No verification code stored; the client must (re-)attach
    #[error("{0}")]
    NotAttached(String),

    /// Transport failure or unusable server response
    #[error("{message}")]
    Request {
        status: Option<u16>,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Token storage failure
    #[error("Token storage error: {0}")]
    State(String),
}

impl BrokerError {
    pub fn request(message: impl Into<String>) -> Self {
        BrokerError::Request {
            status: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn request_with_status(status: u16, message: impl Into<String>) -> Self {
        BrokerError::Request {
            status: Some(status),
            message: message.into(),
            source: None,
        }
    }

    /// Attach a nested cause to a `Request` error. Other variants are unchanged.
    pub fn with_source(self, cause: impl Into<BoxError>) -> Self {
        match self {
            BrokerError::Request {
                status, message, ..
            } => BrokerError::Request {
                status,
                message,
                source: Some(cause.into()),
            },
            other => other,
        }
    }

    /// HTTP status returned by the server, if the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            BrokerError::Request { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether the client has to run the attach flow again.
    pub fn requires_attach(&self) -> bool {
        matches!(self, BrokerError::NotAttached(_)) || self.status() == Some(403)
    }
}

/// Raw response kept as the cause of a rejected response.
#[derive(Debug)]
pub struct UnexpectedResponse {
    pub status: u16,
    pub body: String,
}

impl fmt::Display for UnexpectedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}: {}", self.status, self.body)
    }
}

impl std::error::Error for UnexpectedResponse {}

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
