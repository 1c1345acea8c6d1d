//! Single sign-on server.
//!
//! The server owns the user sessions and makes them available to brokers:
//! - `attach` binds a broker token to the user's session and returns the
//!   verification code the broker must keep
//! - `start_broker_session` resumes that session from a broker's bearer token
//! - `detach` drops the binding again

use crate::cache::{link_key, LinkCache};
use crate::directory::{BrokerDirectory, BrokerRecord};
use crate::error::{SsoError, SsoResult};
use crate::request::SsoRequest;
use crate::session::ActiveSession;
use axum::http::{header, StatusCode};
use regex::Regex;
use sso_checksum::{checksums_match, verification_code, Command};
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use url::Url;

static BEARER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^SSO-([A-Za-z0-9_]+)-([A-Za-z0-9_]+)-([a-z0-9]+)$")
        .expect("bearer pattern is valid")
});

/// Default lifetime of a broker-token link: ten typical session lifetimes.
pub const DEFAULT_LINK_TTL: Duration = Duration::from_secs(10 * 3600);

/// Where a URL checked against a broker's allowed domains came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainSource {
    Origin,
    Referer,
    ReturnUrl,
}

impl DomainSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainSource::Origin => "origin",
            DomainSource::Referer => "referer",
            DomainSource::ReturnUrl => "return_url",
        }
    }
}

impl fmt::Display for DomainSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker token resolved from a valid bearer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerLink {
    pub broker_id: String,
    pub token: String,
    pub session_id: String,
}

/// Parsed `SSO-{broker}-{token}-{checksum}` bearer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bearer {
    pub broker_id: String,
    pub token: String,
    pub checksum: String,
}

impl Bearer {
    pub fn parse(bearer: &str) -> Option<Self> {
        let captures = BEARER_PATTERN.captures(bearer)?;
        Some(Self {
            broker_id: captures[1].to_string(),
            token: captures[2].to_string(),
            checksum: captures[3].to_string(),
        })
    }
}

/// The SSO server core.
#[derive(Clone)]
pub struct Server {
    brokers: Arc<dyn BrokerDirectory>,
    cache: Arc<dyn LinkCache>,
    link_ttl: Duration,
}

impl Server {
    pub fn new(brokers: Arc<dyn BrokerDirectory>, cache: Arc<dyn LinkCache>) -> Self {
        Self {
            brokers,
            cache,
            link_ttl: DEFAULT_LINK_TTL,
        }
    }

    /// Copy of the server with a different link lifetime.
    pub fn with_link_ttl(mut self, ttl: Duration) -> Self {
        self.link_ttl = ttl;
        self
    }

    pub fn link_ttl(&self) -> Duration {
        self.link_ttl
    }

    // ========== Broker requests ==========

    /// Start the session for a broker request, using its bearer token.
    pub async fn start_broker_session(
        &self,
        request: &SsoRequest,
        session: &mut ActiveSession,
    ) -> SsoResult<BrokerLink> {
        if session.is_active() {
            return Err(SsoError::server("Session is already started"));
        }

        let link = self.resolve_bearer(request).await?;

        session.resume(&link.session_id).await?;

        tracing::debug!(
            broker = %link.broker_id,
            token = %link.token,
            session = %link.session_id,
            "Broker request with session"
        );

        Ok(link)
    }

    /// Remove the link of a broker token after validating its bearer.
    pub async fn detach(&self, request: &SsoRequest) -> SsoResult<BrokerLink> {
        let link = self.resolve_bearer(request).await?;

        let key = link_key(&link.broker_id, &link.token);
        self.cache.remove(&key).await.map_err(|err| {
            tracing::error!(
                broker = %link.broker_id,
                token = %link.token,
                error = %err,
                "Failed to detach broker token due to cache issue"
            );
            SsoError::server("Failed to detach bearer token")
        })?;

        tracing::info!(
            broker = %link.broker_id,
            token = %link.token,
            session = %link.session_id,
            "Detached broker token from session"
        );

        Ok(link)
    }

    async fn resolve_bearer(&self, request: &SsoRequest) -> SsoResult<BrokerLink> {
        let bearer = bearer_token(request)?;

        let Bearer {
            broker_id,
            token,
            checksum,
        } = Bearer::parse(bearer).ok_or_else(|| {
            tracing::warn!(bearer = %bearer, "Invalid bearer token");
            SsoError::broker(StatusCode::FORBIDDEN, "Invalid bearer token")
        })?;

        let session_id = self
            .cache
            .get(&link_key(&broker_id, &token))
            .await?
            .ok_or_else(|| {
                tracing::warn!(
                    broker = %broker_id,
                    token = %token,
                    "Bearer token isn't attached to a client session"
                );
                SsoError::broker(
                    StatusCode::FORBIDDEN,
                    "Bearer token isn't attached to a client session",
                )
            })?;

        let broker = self.lookup_broker(&broker_id, &token).await?;
        let code = verification_code(&broker_id, &token, &session_id);
        validate_checksum(&broker, Command::Bearer(&code), &token, &checksum)?;

        Ok(BrokerLink {
            broker_id,
            token,
            session_id,
        })
    }

    // ========== Attach ==========

    /// Attach a client session to a broker token.
    ///
    /// Returns the verification code the broker must store.
    pub async fn attach(
        &self,
        request: &SsoRequest,
        session: &mut ActiveSession,
    ) -> SsoResult<String> {
        let broker_id = required_query_param(request, "broker")?;
        let token = required_query_param(request, "token")?;
        let checksum = required_query_param(request, "checksum")?;

        let broker = self.lookup_broker(broker_id, token).await?;
        validate_checksum(&broker, Command::Attach, token, checksum)?;

        if let Some(origin) = request.header(header::ORIGIN.as_str()) {
            validate_domain(&broker, DomainSource::Origin, origin, Some(token))?;
        }
        if let Some(referer) = request.header(header::REFERER.as_str()) {
            validate_domain(&broker, DomainSource::Referer, referer, Some(token))?;
        }
        if let Some(return_url) = request.query("return_url") {
            validate_domain(&broker, DomainSource::ReturnUrl, return_url, Some(token))?;
        }

        let session_id = session
            .start(request.session_id())
            .await?
            .id()
            .to_string();

        let key = link_key(broker_id, token);
        let existing = self
            .cache
            .insert_if_vacant(&key, &session_id, self.link_ttl)
            .await
            .map_err(|err| {
                tracing::error!(
                    broker = %broker_id,
                    token = %token,
                    session = %session_id,
                    error = %err,
                    "Failed to attach bearer token to session id due to cache issue"
                );
                SsoError::server("Failed to attach bearer token to session id")
            })?;

        if let Some(attached_to) = existing.filter(|attached| *attached != session_id) {
            tracing::warn!(
                broker = %broker_id,
                token = %token,
                attached_to = %attached_to,
                session = %session_id,
                "Token is already attached"
            );
            return Err(SsoError::broker(
                StatusCode::BAD_REQUEST,
                "Token is already attached",
            ));
        }

        tracing::info!(
            broker = %broker_id,
            token = %token,
            session = %session_id,
            "Attached broker token to session"
        );

        Ok(verification_code(broker_id, token, &session_id))
    }

    /// Whether `url` may be used as a redirect target for `broker_id`.
    pub async fn is_allowed_return_url(&self, broker_id: &str, url: &str) -> bool {
        match self.brokers.broker(broker_id).await {
            Ok(Some(broker)) => url_host(url).is_some_and(|host| broker.allows_host(&host)),
            _ => false,
        }
    }

    async fn lookup_broker(&self, broker_id: &str, token: &str) -> SsoResult<BrokerRecord> {
        self.brokers.broker(broker_id).await?.ok_or_else(|| {
            tracing::warn!(broker = %broker_id, token = %token, "Unknown broker");
            SsoError::broker(StatusCode::FORBIDDEN, "Broker is unknown or disabled")
        })
    }
}

/// Assert that the URL's host is in the broker's allowed domains.
pub fn validate_domain(
    broker: &BrokerRecord,
    source: DomainSource,
    url: &str,
    token: Option<&str>,
) -> SsoResult<()> {
    let allowed = url_host(url).is_some_and(|host| broker.allows_host(&host));

    if !allowed {
        tracing::warn!(
            broker = %broker.id,
            token = token.unwrap_or_default(),
            url = %url,
            "Domain of {} is not allowed for broker",
            source
        );
        return Err(SsoError::broker(
            StatusCode::BAD_REQUEST,
            format!("Domain of {} is not allowed", source),
        ));
    }

    Ok(())
}

fn validate_checksum(
    broker: &BrokerRecord,
    command: Command<'_>,
    token: &str,
    checksum: &str,
) -> SsoResult<()> {
    let expected = command.checksum(token, &broker.secret);
    let name = match command {
        Command::Attach => "attach",
        Command::Bearer(_) => "bearer",
    };

    if !checksums_match(&expected, checksum) {
        tracing::warn!(
            broker = %broker.id,
            token = %token,
            "Invalid {} checksum",
            name
        );
        return Err(SsoError::broker(
            StatusCode::FORBIDDEN,
            format!("Invalid {} checksum", name),
        ));
    }

    Ok(())
}

fn bearer_token(request: &SsoRequest) -> SsoResult<&str> {
    let authorization = request.header(header::AUTHORIZATION.as_str()).unwrap_or("");
    let (kind, token) = authorization.split_once(' ').unwrap_or((authorization, ""));

    if kind != "Bearer" {
        if authorization.is_empty() {
            tracing::warn!("Broker didn't use bearer authentication: No 'Authorization' header");
        } else {
            tracing::warn!(
                "Broker didn't use bearer authentication: {} authorization used",
                kind
            );
        }
        return Err(SsoError::broker(
            StatusCode::UNAUTHORIZED,
            "Broker didn't use bearer authentication",
        ));
    }

    Ok(token.trim())
}

fn required_query_param<'a>(request: &'a SsoRequest, key: &str) -> SsoResult<&'a str> {
    request.query(key).ok_or_else(|| {
        SsoError::broker(
            StatusCode::BAD_REQUEST,
            format!("Missing '{}' query parameter", key),
        )
    })
}

fn url_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
}
