//! Single sign-on broker.
//!
//! The broker runs on a website that holds no user credentials. It attaches
//! the visitor's browser to the SSO server once, then talks to the server on
//! the user's behalf with a bearer token derived from that attach.

use crate::error::{BrokerError, BrokerResult};
use crate::http::{HttpClient, HttpRequest, ReqwestClient};
use crate::response::handle_response;
use crate::state::{token_key, verify_key, MemoryState, StateStore};
use reqwest::Method;
use serde_json::Value;
use sso_checksum::{generate_token, Command};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default timeout of requests to the SSO server
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Payload of a broker API request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    /// Query string for GET/DELETE, urlencoded body otherwise
    Form(Vec<(String, String)>),
    /// JSON body
    Json(Value),
}

impl RequestData {
    pub fn form<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        RequestData::Form(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// SSO broker client
#[derive(Clone)]
pub struct Broker {
    url: Url,
    broker_id: String,
    secret: String,
    state: Arc<dyn StateStore>,
    http: Arc<dyn HttpClient>,
}

impl Broker {
    /// Create a broker with in-memory state and the default HTTP client.
    ///
    /// Fails with `Configuration` if the URL isn't http(s) or the broker id
    /// isn't alphanumeric.
    pub fn new(server_url: &str, broker_id: &str, secret: &str) -> BrokerResult<Self> {
        Self::with_timeout(server_url, broker_id, secret, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        server_url: &str,
        broker_id: &str,
        secret: &str,
        timeout: Duration,
    ) -> BrokerResult<Self> {
        let url = parse_server_url(server_url)?;

        if broker_id.is_empty()
            || !broker_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(BrokerError::Configuration(format!(
                "Invalid broker id '{}': must be alphanumeric",
                broker_id
            )));
        }

        Ok(Self {
            url,
            broker_id: broker_id.to_string(),
            secret: secret.to_string(),
            state: Arc::new(MemoryState::new()),
            http: Arc::new(ReqwestClient::new(timeout)?),
        })
    }

    /// Copy that keeps its token and verification code in `state`.
    pub fn with_state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = state;
        self
    }

    /// Copy that sends requests through `http`.
    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    pub fn server_url(&self) -> &Url {
        &self.url
    }

    fn token(&self) -> Option<String> {
        self.state.get(&token_key(&self.broker_id))
    }

    fn verification_code(&self) -> Option<String> {
        self.state.get(&verify_key(&self.broker_id))
    }

    /// Whether the server has confirmed the attach.
    pub fn is_attached(&self) -> bool {
        self.verification_code().is_some()
    }

    /// Existing client token, or a freshly generated and stored one.
    fn ensure_token(&self) -> BrokerResult<String> {
        if let Some(token) = self.token() {
            return Ok(token);
        }

        let token = generate_token();
        self.state.set(&token_key(&self.broker_id), &token)?;
        tracing::debug!(broker = %self.broker_id, token = %token, "Generated client token");

        Ok(token)
    }

    /// URL the browser must visit to attach the client token to its server
    /// session. `extra` is appended to the query, e.g. `return_url`.
    pub fn attach_url(&self, extra: &[(&str, &str)]) -> BrokerResult<String> {
        let token = self.ensure_token()?;
        let checksum = Command::Attach.checksum(&token, &self.secret);

        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("broker", &self.broker_id)
                .append_pair("token", &token)
                .append_pair("checksum", &checksum);
            query.extend_pairs(extra);
        }

        Ok(url.into())
    }

    /// Store the verification code issued by the server.
    ///
    /// A code is only written once; a different second code is logged and
    /// ignored.
    pub fn verify(&self, code: &str) -> BrokerResult<()> {
        match self.verification_code() {
            Some(existing) if existing == code => Ok(()),
            Some(_) => {
                tracing::warn!(broker = %self.broker_id, "SSO attach already verified");
                Ok(())
            }
            None => {
                self.state.set(&verify_key(&self.broker_id), code)?;
                tracing::debug!(broker = %self.broker_id, "SSO attach verified");
                Ok(())
            }
        }
    }

    /// Bearer token for API requests: `SSO-{broker}-{token}-{checksum}`.
    pub fn bearer_token(&self) -> BrokerResult<String> {
        match (self.token(), self.verification_code()) {
            (Some(token), Some(code)) => {
                let checksum = Command::Bearer(&code).checksum(&token, &self.secret);
                Ok(format!("SSO-{}-{}-{}", self.broker_id, token, checksum))
            }
            _ => Err(BrokerError::NotAttached(format!(
                "The client isn't attached to the SSO server for this broker. \
                 Make sure that the '{}' cookie is set.",
                verify_key(&self.broker_id)
            ))),
        }
    }

    /// Forget the client token and verification code.
    pub fn clear_token(&self) {
        self.state.remove(&token_key(&self.broker_id));
        self.state.remove(&verify_key(&self.broker_id));
    }

    /// Send an authenticated request to the SSO server.
    ///
    /// `path` is resolved against the server URL: an absolute path replaces
    /// the whole path, a relative one only the last segment. Returns `None`
    /// for `204 No Content`. A `403` clears the local token.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        data: Option<RequestData>,
    ) -> BrokerResult<Option<Value>> {
        let bearer = self.bearer_token()?;
        let request = self.build_request(method, path, &bearer, data)?;

        tracing::debug!(
            broker = %self.broker_id,
            method = %request.method,
            url = %request.url,
            "SSO server request"
        );

        let response = self.http.send(request).await?;

        if response.status == 403 {
            tracing::info!(
                broker = %self.broker_id,
                "Bearer token rejected by SSO server, clearing client token"
            );
            self.clear_token();
        }

        handle_response(&response)
    }

    /// Resolve `path` against the server URL without leaving its origin, so
    /// the bearer is never sent to another host.
    fn request_url(&self, path: &str) -> BrokerResult<Url> {
        let invalid = |reason: &str| {
            BrokerError::request(format!("Invalid request path '{}': {}", path, reason))
        };

        if path.starts_with("//") || path.starts_with("\\\\") || Url::parse(path).is_ok() {
            return Err(invalid("must be a path on the SSO server"));
        }

        let url = self.url.join(path).map_err(|e| invalid(&e.to_string()))?;
        if url.origin() != self.url.origin() {
            return Err(invalid("must be a path on the SSO server"));
        }

        Ok(url)
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        bearer: &str,
        data: Option<RequestData>,
    ) -> BrokerResult<HttpRequest> {
        let mut url = self.request_url(path)?;

        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {}", bearer)),
        ];

        let body = match data {
            None => None,
            Some(RequestData::Form(pairs)) if method == Method::GET || method == Method::DELETE => {
                if !pairs.is_empty() {
                    url.query_pairs_mut().extend_pairs(pairs);
                }
                None
            }
            Some(RequestData::Form(pairs)) => {
                headers.push((
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ));
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish();
                Some(body.into_bytes())
            }
            Some(RequestData::Json(value)) => {
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                Some(value.to_string().into_bytes())
            }
        };

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }

    /// Handle the browser's return from the attach redirect.
    ///
    /// Consumes `sso_verify` (stored via [`Broker::verify`]) or `sso_error`
    /// (returned as a `Request` error) from `url` and returns the URL without
    /// those parameters.
    pub fn handle_return(&self, url: &str) -> BrokerResult<String> {
        let mut url = Url::parse(url)
            .map_err(|e| BrokerError::request(format!("Invalid return URL '{}': {}", url, e)))?;

        let mut verify = None;
        let mut error = None;
        let mut kept = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sso_verify" => verify = Some(value.into_owned()),
                "sso_error" => error = Some(value.into_owned()),
                _ => kept.push((key.into_owned(), value.into_owned())),
            }
        }

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        if let Some(message) = error {
            tracing::warn!(broker = %self.broker_id, error = %message, "SSO attach failed");
            return Err(BrokerError::request(message));
        }
        if let Some(code) = verify {
            self.verify(&code)?;
        }

        Ok(url.into())
    }
}

fn parse_server_url(server_url: &str) -> BrokerResult<Url> {
    let invalid = || BrokerError::Configuration(format!("Invalid SSO server URL '{}'", server_url));

    let url = Url::parse(server_url).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return Err(invalid());
    }

    Ok(url)
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("url", &self.url.as_str())
            .field("broker_id", &self.broker_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use sso_checksum::verification_code;
    use std::sync::Mutex;

    /// Log sink for the fmt subscriber.
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Records requests and replays one canned response.
    struct MockHttp {
        response: HttpResponse,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockHttp {
        fn new(response: HttpResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for MockHttp {
        async fn send(&self, request: HttpRequest) -> BrokerResult<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    fn expected_bearer() -> String {
        let code = verification_code("foo", "123456", "abc123");
        format!(
            "SSO-foo-123456-{}",
            Command::Bearer(&code).checksum("123456", "bar")
        )
    }

    fn unattached() -> (Broker, Arc<MemoryState>) {
        let state = Arc::new(MemoryState::new());
        let broker = Broker::new("https://example.com/attach", "foo", "bar")
            .unwrap()
            .with_state(state.clone());
        (broker, state)
    }

    fn attached(response: HttpResponse) -> (Broker, Arc<MemoryState>, Arc<MockHttp>) {
        let state = Arc::new(MemoryState::from_pairs([
            ("sso_token_foo", "123456".to_string()),
            ("sso_verify_foo", verification_code("foo", "123456", "abc123")),
        ]));
        let http = MockHttp::new(response);
        let broker = Broker::new("https://example.com/attach", "foo", "bar")
            .unwrap()
            .with_state(state.clone())
            .with_http_client(http.clone());
        (broker, state, http)
    }

    fn user_response() -> HttpResponse {
        HttpResponse::new(
            200,
            Some("application/json; charset=utf-8"),
            r#"{"name": "John", "email": "john@example.com"}"#,
        )
    }

    // ========== Construction ==========

    #[test]
    fn test_url_validation() {
        let err = Broker::new("example", "foo", "bar").unwrap_err();
        assert!(matches!(err, BrokerError::Configuration(_)));
        assert_eq!(err.to_string(), "Invalid SSO server URL 'example'");

        assert!(Broker::new("ftp://example.com", "foo", "bar").is_err());
    }

    #[test]
    fn test_broker_id_validation() {
        let err = Broker::new("https://example.com", "foo-1", "bar").unwrap_err();
        assert_eq!(err.to_string(), "Invalid broker id 'foo-1': must be alphanumeric");

        assert!(Broker::new("https://example.com", "", "bar").is_err());
    }

    #[test]
    fn test_broker_id() {
        let (broker, _) = unattached();
        assert_eq!(broker.broker_id(), "foo");
    }

    // ========== Attach ==========

    #[test]
    fn test_attach_url() {
        let (broker, state) = unattached();
        let url = broker.attach_url(&[]).unwrap();

        let token = state.get("sso_token_foo").unwrap();
        let checksum = Command::Attach.checksum(&token, "bar");
        assert_eq!(
            url,
            format!("https://example.com/attach?broker=foo&token={}&checksum={}", token, checksum)
        );
        assert!(!broker.is_attached());
    }

    #[test]
    fn test_attach_url_with_params() {
        let (broker, state) = unattached();
        let url = broker
            .attach_url(&[("return_url", "https://example.com/")])
            .unwrap();

        let token = state.get("sso_token_foo").unwrap();
        let checksum = Command::Attach.checksum(&token, "bar");
        assert_eq!(
            url,
            format!(
                "https://example.com/attach?broker=foo&token={}&checksum={}&return_url=https%3A%2F%2Fexample.com%2F",
                token, checksum
            )
        );
    }

    #[test]
    fn test_attach_url_keeps_token() {
        let (broker, state) = unattached();
        let first = broker.attach_url(&[]).unwrap();
        let token = state.get("sso_token_foo").unwrap();
        let second = broker.attach_url(&[]).unwrap();

        assert_eq!(first, second);
        assert_eq!(state.get("sso_token_foo").unwrap(), token);
    }

    #[test]
    fn test_verify() {
        let (broker, state) = unattached();
        broker.attach_url(&[]).unwrap();
        assert!(!broker.is_attached());

        broker.verify("123456").unwrap();
        assert_eq!(state.get("sso_verify_foo").as_deref(), Some("123456"));
        assert!(broker.is_attached());

        broker.verify("123456").unwrap();
        assert_eq!(state.get("sso_verify_foo").as_deref(), Some("123456"));
    }

    #[test]
    fn test_verify_is_write_once() {
        let (broker, state) = unattached();
        let logs = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            broker.verify("000000").unwrap();
            broker.verify("000000").unwrap();
        });
        assert!(!logs.contents().contains("already verified"));

        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            broker.verify("123456").unwrap();
        });

        assert_eq!(state.get("sso_verify_foo").as_deref(), Some("000000"));
        let output = logs.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("SSO attach already verified"));
        assert!(output.contains("broker=foo"));
    }

    #[test]
    fn test_clear_token() {
        let (broker, state, _) = attached(user_response());
        assert!(broker.is_attached());

        broker.clear_token();
        assert!(!broker.is_attached());
        assert_eq!(state.get("sso_token_foo"), None);
        assert_eq!(state.get("sso_verify_foo"), None);

        broker.clear_token();
    }

    #[test]
    fn test_handle_return_verifies() {
        let (broker, state) = unattached();
        let url = broker
            .handle_return("https://broker.example.com/page?x=1&sso_verify=abc")
            .unwrap();
        assert_eq!(url, "https://broker.example.com/page?x=1");
        assert_eq!(state.get("sso_verify_foo").as_deref(), Some("abc"));

        let url = broker
            .handle_return("https://broker.example.com/page?sso_verify=abc")
            .unwrap();
        assert_eq!(url, "https://broker.example.com/page");
    }

    #[test]
    fn test_handle_return_error() {
        let (broker, _) = unattached();
        let err = broker
            .handle_return("https://broker.example.com/?sso_error=Invalid+attach+checksum")
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid attach checksum");
        assert!(!broker.is_attached());
    }

    // ========== Bearer ==========

    #[test]
    fn test_bearer_token() {
        let (broker, _, _) = attached(user_response());
        assert!(broker.is_attached());
        assert_eq!(broker.bearer_token().unwrap(), expected_bearer());
    }

    #[test]
    fn test_bearer_token_when_not_attached() {
        let (broker, state, _) = attached(user_response());
        state.remove("sso_verify_foo");
        assert!(!broker.is_attached());

        let err = broker.bearer_token().unwrap_err();
        assert!(matches!(err, BrokerError::NotAttached(_)));
        assert_eq!(
            err.to_string(),
            "The client isn't attached to the SSO server for this broker. \
             Make sure that the 'sso_verify_foo' cookie is set."
        );
    }

    // ========== Requests ==========

    #[tokio::test]
    async fn test_get_request() {
        let (broker, _, http) = attached(user_response());
        let info = broker.request(Method::GET, "/info", None).await.unwrap();
        assert_eq!(info, Some(json!({"name": "John", "email": "john@example.com"})));

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].url.as_str(), "https://example.com/info");
        assert_eq!(requests[0].header("accept"), Some("application/json"));
        assert_eq!(
            requests[0].header("authorization"),
            Some(format!("Bearer {}", expected_bearer()).as_str())
        );
        assert!(requests[0].body.is_none());
    }

    #[tokio::test]
    async fn test_get_request_with_query() {
        let (broker, _, http) = attached(user_response());
        broker
            .request(Method::GET, "/info", Some(RequestData::form([("fields", "name")])))
            .await
            .unwrap();

        assert_eq!(
            http.requests()[0].url.as_str(),
            "https://example.com/info?fields=name"
        );
    }

    #[tokio::test]
    async fn test_relative_path() {
        let http = MockHttp::new(user_response());
        let broker = Broker::new("https://example.com/sso/attach", "foo", "bar")
            .unwrap()
            .with_state(Arc::new(MemoryState::from_pairs([
                ("sso_token_foo", "123456"),
                ("sso_verify_foo", "code"),
            ])))
            .with_http_client(http.clone());

        broker.request(Method::GET, "info", None).await.unwrap();
        assert_eq!(
            http.requests()[0].url.as_str(),
            "https://example.com/sso/info"
        );
    }

    #[tokio::test]
    async fn test_path_cannot_leave_server() {
        let (broker, state, http) = attached(user_response());

        for path in [
            "//evil.example.net/collect",
            "https://evil.example.net/collect",
            "http://example.com/info",
            "\\\\evil.example.net/collect",
            "/\\evil.example.net/collect",
        ] {
            let err = broker.request(Method::GET, path, None).await.unwrap_err();
            assert!(matches!(err, BrokerError::Request { status: None, .. }), "{}", path);
            assert!(err.to_string().starts_with("Invalid request path"), "{}", path);
        }

        assert!(http.requests().is_empty());
        assert!(state.get("sso_token_foo").is_some());
    }

    #[tokio::test]
    async fn test_post_request() {
        let (broker, _, http) = attached(user_response());
        let data = RequestData::form([("name", "John"), ("color", "red")]);
        let info = broker.request(Method::POST, "/user", Some(data)).await.unwrap();
        assert!(info.is_some());

        let request = &http.requests()[0];
        assert_eq!(request.url.as_str(), "https://example.com/user");
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(request.body.as_deref(), Some(b"name=John&color=red".as_slice()));
    }

    #[tokio::test]
    async fn test_json_request() {
        let (broker, _, http) = attached(user_response());
        let data = RequestData::Json(json!({"name": "John"}));
        broker.request(Method::PUT, "/user", Some(data)).await.unwrap();

        let request = &http.requests()[0];
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(br#"{"name":"John"}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_no_content() {
        let (broker, _, _) = attached(HttpResponse::new(204, Some(""), ""));
        assert!(broker.request(Method::POST, "/go", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_request() {
        let (broker, _, _) = attached(HttpResponse::json(400, &json!({"error": "something is wrong"})));
        let err = broker.request(Method::GET, "/", None).await.unwrap_err();
        assert_eq!(err.to_string(), "something is wrong");
        assert_eq!(err.status(), Some(400));
        assert!(broker.is_attached());
    }

    #[tokio::test]
    async fn test_forbidden_clears_token() {
        let (broker, state, _) = attached(HttpResponse::json(
            403,
            &json!({"error": "Invalid or expired bearer token"}),
        ));
        let err = broker.request(Method::GET, "/info", None).await.unwrap_err();

        assert!(err.requires_attach());
        assert!(!broker.is_attached());
        assert_eq!(state.get("sso_token_foo"), None);
    }

    #[tokio::test]
    async fn test_invalid_content_type() {
        let (broker, _, _) = attached(HttpResponse::new(200, Some("text/html"), "<h1>Foo</h1>"));
        let err = broker.request(Method::GET, "/", None).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected 'application/json' response, got 'text/html'"
        );
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let (broker, _, _) = attached(HttpResponse::new(200, Some("application/json"), "not json"));
        let err = broker.request(Method::GET, "/", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON response from server");
    }

    #[tokio::test]
    async fn test_request_when_not_attached_sends_nothing() {
        let http = MockHttp::new(user_response());
        let (broker, _) = unattached();
        let broker = broker.with_http_client(http.clone());

        let err = broker.request(Method::GET, "/info", None).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotAttached(_)));
        assert!(http.requests().is_empty());
    }
}
