//! End-to-end handshake: brokers talk to the server router in-process.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sso_broker::{ApiCommand, Broker, BrokerError, BrokerResult, HttpClient, HttpRequest, HttpResponse, MemoryState};
use sso_server::config::SessionConfig;
use sso_server::{
    create_router, AppState, BrokerRecord, InMemoryLinkCache, InMemorySessionStore, Server,
    StaticAuthenticator, StaticBrokerDirectory, UserEntry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use url::Url;

const SERVER_URL: &str = "http://localhost:9000/attach";

/// HTTP client that hands requests straight to the router.
struct RouterClient {
    router: Router,
}

#[async_trait]
impl HttpClient for RouterClient {
    async fn send(&self, request: HttpRequest) -> BrokerResult<HttpResponse> {
        let mut builder = Request::builder()
            .method(request.method.as_str())
            .uri(path_and_query(&request.url));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let http_request = builder
            .body(Body::from(request.body.unwrap_or_default()))
            .unwrap();

        let response = self.router.clone().oneshot(http_request).await.unwrap();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Cookie jar of a single browser on the server domain.
#[derive(Default)]
struct Browser {
    session: Option<String>,
}

impl Browser {
    /// Follow an attach URL and return the redirect target.
    async fn attach(&mut self, router: &Router, attach_url: &str) -> String {
        let mut request = Request::builder().uri(path_and_query(&Url::parse(attach_url).unwrap()));
        if let Some(session) = &self.session {
            request = request.header(header::COOKIE, format!("sso_session={}", session));
        }

        let response = router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        // A rejected attach never starts a session.
        if let Some(cookie) = response.headers().get(header::SET_COOKIE) {
            let session = cookie
                .to_str()
                .unwrap()
                .split(';')
                .next()
                .and_then(|pair| pair.strip_prefix("sso_session="))
                .unwrap();
            self.session = Some(session.to_string());
        }

        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

fn server_router() -> Router {
    let brokers = Arc::new(StaticBrokerDirectory::new([
        BrokerRecord::new("Alice", "8iwzik1bwd", ["localhost"]),
        BrokerRecord::new("Greg", "7pypoox2pc", ["localhost"]),
    ]));
    let server = Server::new(brokers, Arc::new(InMemoryLinkCache::new()));
    let sessions = Arc::new(InMemorySessionStore::new(Duration::from_secs(3600)));
    let authenticator = Arc::new(StaticAuthenticator::new(HashMap::from([(
        "jackie".to_string(),
        UserEntry {
            password: "jackie123".to_string(),
            fullname: Some("Jackie Black".to_string()),
            email: Some("jackie.black@example.com".to_string()),
        },
    )])));

    create_router(
        AppState::new(server, sessions, authenticator, SessionConfig::default()),
        false,
    )
}

fn broker(router: &Router, id: &str, secret: &str) -> Broker {
    Broker::new(SERVER_URL, id, secret)
        .unwrap()
        .with_state(Arc::new(MemoryState::new()))
        .with_http_client(Arc::new(RouterClient {
            router: router.clone(),
        }))
}

async fn attach(browser: &mut Browser, router: &Router, broker: &Broker) {
    let return_url = "http://localhost/page?tab=1";
    let attach_url = broker.attach_url(&[("return_url", return_url)]).unwrap();
    let location = browser.attach(router, &attach_url).await;

    let cleaned = broker.handle_return(&location).unwrap();
    assert_eq!(cleaned, return_url);
    assert!(broker.is_attached());
}

#[tokio::test]
async fn single_sign_on_across_brokers() {
    let router = server_router();
    let mut browser = Browser::default();
    let alice = broker(&router, "Alice", "8iwzik1bwd");
    let greg = broker(&router, "Greg", "7pypoox2pc");

    let err = alice.user_info::<Value>().await.unwrap_err();
    assert!(matches!(err, BrokerError::NotAttached(_)));

    attach(&mut browser, &router, &alice).await;
    assert!(alice.user_info::<Value>().await.unwrap().is_none());

    let err = alice.login::<Value>("jackie", "wrong").await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.to_string(), "Incorrect credentials");

    let user: Value = alice.login("jackie", "jackie123").await.unwrap().unwrap();
    assert_eq!(user["username"], "jackie");

    // Second broker, same browser: already logged in.
    attach(&mut browser, &router, &greg).await;
    let user: Value = greg.user_info().await.unwrap().unwrap();
    assert_eq!(user["fullname"], "Jackie Black");

    alice.logout().await.unwrap();
    assert!(greg.user_info::<Value>().await.unwrap().is_none());
}

#[tokio::test]
async fn reattach_is_idempotent() {
    let router = server_router();
    let mut browser = Browser::default();
    let alice = broker(&router, "Alice", "8iwzik1bwd");

    attach(&mut browser, &router, &alice).await;
    let bearer = alice.bearer_token().unwrap();

    attach(&mut browser, &router, &alice).await;
    assert_eq!(alice.bearer_token().unwrap(), bearer);
}

#[tokio::test]
async fn detach_forces_reattach() {
    let router = server_router();
    let mut browser = Browser::default();
    let alice = broker(&router, "Alice", "8iwzik1bwd");

    attach(&mut browser, &router, &alice).await;
    let bearer = alice.bearer_token().unwrap();

    alice.command(ApiCommand::Detach, None).await.unwrap();
    assert!(!alice.is_attached());

    // The old bearer no longer resolves to a session.
    let stale = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/info")
                .header(header::AUTHORIZATION, format!("Bearer {}", bearer))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(stale.status(), StatusCode::FORBIDDEN);

    attach(&mut browser, &router, &alice).await;
    assert!(alice.user_info::<Value>().await.unwrap().is_none());
}

#[tokio::test]
async fn rejected_bearer_clears_token() {
    let router = server_router();
    let state = Arc::new(MemoryState::from_pairs([
        ("sso_token_alice", "123456"),
        ("sso_verify_alice", "forged"),
    ]));
    let alice = broker(&router, "Alice", "8iwzik1bwd").with_state(state.clone());
    assert!(alice.is_attached());

    let err = alice.user_info::<Value>().await.unwrap_err();
    assert!(err.requires_attach());
    assert_eq!(err.to_string(), "Invalid or expired bearer token");
    assert!(!alice.is_attached());
}

#[tokio::test]
async fn attach_error_is_returned_to_broker() {
    let router = server_router();
    let mut browser = Browser::default();
    let alice = broker(&router, "Alice", "8iwzik1bwd");
    let impostor = broker(&router, "Alice", "wrong-secret");

    let attach_url = impostor
        .attach_url(&[("return_url", "http://localhost/")])
        .unwrap();
    let location = browser.attach(&router, &attach_url).await;

    let err = alice.handle_return(&location).unwrap_err();
    assert_eq!(err.to_string(), "Invalid attach checksum");
    assert!(!alice.is_attached());
}
