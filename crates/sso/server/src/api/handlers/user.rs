//! Broker API handlers
//!
//! Every handler here is called by a broker on behalf of a user and runs
//! with the user's session resumed from the bearer token.

use crate::api::extract::{mask_forbidden, BrokerSession};
use crate::api::state::AppState;
use crate::auth::UserInfo;
use crate::error::{SsoError, SsoResult};
use crate::request::SsoRequest;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use std::collections::HashMap;

/// Session key holding the logged in username.
pub const USER_KEY: &str = "user";

/// Login form
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Info about the logged in user; 204 when nobody is logged in
pub async fn user_info(
    State(state): State<AppState>,
    BrokerSession { session, .. }: BrokerSession,
) -> SsoResult<Response> {
    let Some(username) = session.get(USER_KEY).and_then(|value| value.as_str()) else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    match state.authenticator.user(username).await? {
        Some(user) => Ok(Json(user).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Log the user in
pub async fn login(
    State(state): State<AppState>,
    BrokerSession { link, mut session }: BrokerSession,
    Form(form): Form<LoginForm>,
) -> SsoResult<Json<UserInfo>> {
    if form.username.is_empty() || form.password.is_empty() {
        return Err(SsoError::broker(
            StatusCode::BAD_REQUEST,
            "Username and password are required",
        ));
    }

    let user = state
        .authenticator
        .authenticate(&form.username, &form.password)
        .await?
        .ok_or_else(|| {
            tracing::info!(broker = %link.broker_id, username = %form.username, "Login failed");
            SsoError::broker(StatusCode::BAD_REQUEST, "Incorrect credentials")
        })?;

    session.set(USER_KEY, user.username.clone());
    session.save().await?;

    tracing::info!(
        broker = %link.broker_id,
        session = %link.session_id,
        username = %user.username,
        "User logged in"
    );

    Ok(Json(user))
}

/// Log the user out
pub async fn logout(BrokerSession { link, mut session }: BrokerSession) -> SsoResult<StatusCode> {
    if let Some(username) = session.remove(USER_KEY) {
        session.save().await?;
        tracing::info!(
            broker = %link.broker_id,
            session = %link.session_id,
            username = %username,
            "User logged out"
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Drop the broker token's link to the user session
pub async fn detach(State(state): State<AppState>, headers: HeaderMap) -> SsoResult<StatusCode> {
    let request = SsoRequest::from_parts(HashMap::new(), headers, None);
    state.server.detach(&request).await.map_err(mask_forbidden)?;
    Ok(StatusCode::NO_CONTENT)
}
