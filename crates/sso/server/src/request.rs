//! Explicit request view handed to the SSO operations.
//!
//! Nothing in the core reads ambient process state; handlers build an
//! [`SsoRequest`] from the incoming HTTP request and pass it in.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;

/// Query parameters, headers and server session cookie of one request.
#[derive(Debug, Clone, Default)]
pub struct SsoRequest {
    query: HashMap<String, String>,
    headers: HeaderMap,
    session_id: Option<String>,
}

impl SsoRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        query: HashMap<String, String>,
        headers: HeaderMap,
        session_id: Option<String>,
    ) -> Self {
        Self {
            query,
            headers,
            session_id,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add a header. Invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_bearer(self, bearer: &str) -> Self {
        self.with_header(header::AUTHORIZATION.as_str(), &format!("Bearer {}", bearer))
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Header value as text; missing, empty or non-ASCII headers yield `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
    }

    /// Server session id carried by the client's cookie.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Read a cookie value from a `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
