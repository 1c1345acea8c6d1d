//! Attach endpoint
//!
//! The broker sends the user's browser here. The response shape is picked
//! from the request: `return_url` -> redirect, `callback` -> JSONP,
//! otherwise JSON.

use crate::api::state::AppState;
use crate::error::{ErrorResponse, SsoError};
use crate::request::{cookie_value, SsoRequest};
use crate::session::ActiveSession;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

static CALLBACK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$.]*$").expect("callback pattern is valid")
});

/// Successful attach body
#[derive(Debug, Serialize, Deserialize)]
pub struct AttachResponse {
    pub verify: String,
}

/// How the attach result is returned to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachReply {
    Redirect(String),
    Jsonp(String),
    Json,
}

impl AttachReply {
    pub fn negotiate(params: &HashMap<String, String>) -> Self {
        if let Some(url) = params.get("return_url") {
            AttachReply::Redirect(url.clone())
        } else if let Some(callback) = params.get("callback") {
            AttachReply::Jsonp(callback.clone())
        } else {
            AttachReply::Json
        }
    }
}

/// Attach the broker token to the user's session
pub async fn attach(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let reply = AttachReply::negotiate(&params);

    if let AttachReply::Jsonp(callback) = &reply {
        if !CALLBACK_PATTERN.is_match(callback) {
            return SsoError::broker(StatusCode::BAD_REQUEST, "Invalid callback").into_response();
        }
    }

    let cookie = cookie_value(&headers, &state.session_config.cookie_name);
    let request = SsoRequest::from_parts(params.clone(), headers, cookie);
    let mut session = state.active_session();

    let outcome = match state.server.attach(&request, &mut session).await {
        Ok(code) => match session.save().await {
            Ok(()) => Ok(code),
            Err(err) => Err(SsoError::from(err)),
        },
        Err(err) => Err(err),
    };

    match outcome {
        Ok(code) => {
            let mut response = success_response(&reply, code);
            if let Some(session_id) = session.id() {
                if let Ok(value) = HeaderValue::from_str(&state.session_cookie(session_id)) {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
            }
            response
        }
        Err(err) => {
            discard_started_session(&state, &session, request.session_id()).await;
            error_response(&state, &params, &reply, err).await
        }
    }
}

/// Drop a session created by a rejected attach. The browser's own session is
/// left alone.
async fn discard_started_session(state: &AppState, session: &ActiveSession, cookie: Option<&str>) {
    let Some(session_id) = session.id().filter(|id| Some(*id) != cookie) else {
        return;
    };
    if let Err(err) = state.sessions.destroy(session_id).await {
        tracing::warn!(
            session = %session_id,
            error = %err,
            "Failed to discard session of rejected attach"
        );
    }
}

fn success_response(reply: &AttachReply, code: String) -> Response {
    match reply {
        AttachReply::Redirect(return_url) => {
            match append_query(return_url, "sso_verify", &code) {
                Some(url) => Redirect::to(&url).into_response(),
                None => SsoError::broker(StatusCode::BAD_REQUEST, "Invalid return_url")
                    .into_response(),
            }
        }
        AttachReply::Jsonp(callback) => {
            let body = serde_json::json!({ "verify": code });
            jsonp(callback, &body, StatusCode::OK)
        }
        AttachReply::Json => Json(AttachResponse { verify: code }).into_response(),
    }
}

async fn error_response(
    state: &AppState,
    params: &HashMap<String, String>,
    reply: &AttachReply,
    err: SsoError,
) -> Response {
    match reply {
        AttachReply::Redirect(return_url) => {
            // Only bounce errors back to hosts the broker owns.
            let allowed = match params.get("broker") {
                Some(broker) => state.server.is_allowed_return_url(broker, return_url).await,
                None => false,
            };
            match allowed
                .then(|| append_query(return_url, "sso_error", err.message()))
                .flatten()
            {
                Some(url) => Redirect::to(&url).into_response(),
                None => err.into_response(),
            }
        }
        AttachReply::Jsonp(callback) => {
            let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap_or_default();
            jsonp(callback, &body, err.status())
        }
        AttachReply::Json => err.into_response(),
    }
}

fn jsonp(callback: &str, body: &serde_json::Value, status: StatusCode) -> Response {
    let script = format!("{}({}, {});", callback, body, status.as_u16());
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        script,
    )
        .into_response()
}

fn append_query(url: &str, key: &str, value: &str) -> Option<String> {
    let mut url = Url::parse(url).ok()?;
    url.query_pairs_mut().append_pair(key, value);
    Some(url.to_string())
}
