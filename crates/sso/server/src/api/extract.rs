//! Extractor that resumes the user session from a broker's bearer token

use crate::api::state::AppState;
use crate::error::SsoError;
use crate::request::SsoRequest;
use crate::server::BrokerLink;
use crate::session::ActiveSession;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use std::collections::HashMap;

/// Broker request with its user session resumed.
pub struct BrokerSession {
    pub link: BrokerLink,
    pub session: ActiveSession,
}

#[async_trait]
impl FromRequestParts<AppState> for BrokerSession {
    type Rejection = SsoError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let request = SsoRequest::from_parts(HashMap::new(), parts.headers.clone(), None);
        let mut session = state.active_session();

        let link = state
            .server
            .start_broker_session(&request, &mut session)
            .await
            .map_err(mask_forbidden)?;

        Ok(Self { link, session })
    }
}

/// Brokers only need to know that they must re-attach.
pub(crate) fn mask_forbidden(err: SsoError) -> SsoError {
    if err.status() == StatusCode::FORBIDDEN {
        SsoError::broker(StatusCode::FORBIDDEN, "Invalid or expired bearer token")
    } else {
        err
    }
}
