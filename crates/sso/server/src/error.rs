//! Error types for the SSO server

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the attach and broker-session operations.
///
/// `Broker` errors are caused by the broker or the client (bad checksum,
/// unknown broker, disallowed domain, ...) and are never retried. `Server`
/// errors are infrastructure failures and surface as an opaque 5xx.
#[derive(Debug, Error)]
pub enum SsoError {
    /// Client-caused rejection (4xx)
    #[error("{message}")]
    Broker { status: StatusCode, message: String },

    /// Infrastructure failure (5xx)
    #[error("{message}")]
    Server { status: StatusCode, message: String },
}

impl SsoError {
    /// Client-caused error with the given status.
    pub fn broker(status: StatusCode, message: impl Into<String>) -> Self {
        SsoError::Broker {
            status,
            message: message.into(),
        }
    }

    /// Infrastructure error; always a 500.
    pub fn server(message: impl Into<String>) -> Self {
        SsoError::Server {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            SsoError::Broker { status, .. } | SsoError::Server { status, .. } => *status,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SsoError::Broker { message, .. } | SsoError::Server { message, .. } => message,
        }
    }

    pub fn is_broker_error(&self) -> bool {
        matches!(self, SsoError::Broker { .. })
    }
}

/// Failures of the link cache or session store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the operation
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for SsoError {
    fn from(err: StoreError) -> Self {
        SsoError::server(err.to_string())
    }
}

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body: `{"error": "...", "code": N}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl From<&SsoError> for ErrorResponse {
    fn from(err: &SsoError) -> Self {
        Self {
            error: err.message().to_string(),
            code: err.status().as_u16(),
        }
    }
}

impl IntoResponse for SsoError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse::from(&self);
        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

/// Result type alias for SSO operations
pub type SsoResult<T> = Result<T, SsoError>;

/// Result type alias for store backends
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            SsoError::broker(StatusCode::FORBIDDEN, "nope")
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );

        assert_eq!(
            SsoError::server("cache down").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized_carries_challenge() {
        let response = SsoError::broker(StatusCode::UNAUTHORIZED, "no bearer").into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[test]
    fn test_store_error_is_server_error() {
        let err: SsoError = StoreError::Unavailable("redis".to_string()).into();
        assert!(!err.is_broker_error());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
