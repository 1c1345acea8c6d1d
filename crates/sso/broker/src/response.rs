//! Interpretation of SSO server responses

use crate::error::{BrokerError, BrokerResult, UnexpectedResponse};
use crate::http::HttpResponse;
use serde_json::Value;

/// Parse a server response.
///
/// `204` yields `None`. Anything that is not JSON, or any status from 400 up,
/// is a `Request` error.
pub fn handle_response(response: &HttpResponse) -> BrokerResult<Option<Value>> {
    if response.status == 204 {
        return Ok(None);
    }

    let content_type = media_type(response.content_type.as_deref());
    if content_type != "application/json" {
        return Err(BrokerError::request_with_status(
            response.status,
            format!("Expected 'application/json' response, got '{}'", content_type),
        )
        .with_source(UnexpectedResponse {
            status: response.status,
            body: response.body_text(),
        }));
    }

    let data: Value = serde_json::from_slice(&response.body).map_err(|e| {
        BrokerError::request_with_status(response.status, "Invalid JSON response from server")
            .with_source(e)
    })?;

    if response.status >= 400 {
        let message = data
            .get("error")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| response.body_text());
        return Err(BrokerError::request_with_status(response.status, message));
    }

    Ok(Some(data))
}

/// `application/json; charset=utf-8` -> `application/json`
fn media_type(content_type: Option<&str>) -> String {
    content_type
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
