//! User sessions on the SSO server.
//!
//! A [`SessionStore`] persists session bags by id. Each request gets its own
//! [`ActiveSession`], which knows whether a session has been started for the
//! request and buffers changes until [`ActiveSession::save`].

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Key/value bag scoped to one (possibly anonymous) user visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: String,
    #[serde(default)]
    data: Map<String, Value>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: Map::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }
}

/// Storage backend for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create and persist a new empty session with a fresh id.
    async fn create(&self) -> StoreResult<Session>;

    /// Load a live session by id.
    async fn load(&self, id: &str) -> StoreResult<Option<Session>>;

    /// Persist a session, refreshing its lifetime.
    async fn save(&self, session: &Session) -> StoreResult<()>;

    /// Remove a session. Returns whether it existed.
    async fn destroy(&self, id: &str) -> StoreResult<bool>;
}

/// Per-request handle on the user session.
pub struct ActiveSession {
    store: Arc<dyn SessionStore>,
    current: Option<Session>,
}

impl ActiveSession {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Whether a session has been started or resumed in this request.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn id(&self) -> Option<&str> {
        self.current.as_ref().map(Session::id)
    }

    /// Start the user-facing session.
    ///
    /// Reuses the session already active in this request, otherwise the live
    /// session named by `cookie_id`. Unknown ids are not adopted; a fresh
    /// session is created instead.
    pub async fn start(&mut self, cookie_id: Option<&str>) -> StoreResult<&Session> {
        if self.current.is_none() {
            let existing = match cookie_id {
                Some(id) => self.store.load(id).await?,
                None => None,
            };
            let session = match existing {
                Some(session) => session,
                None => self.store.create().await?,
            };
            self.current = Some(session);
        }

        self.current
            .as_ref()
            .ok_or_else(|| StoreError::Backend("session not started".to_string()))
    }

    /// Resume the session with a known id.
    ///
    /// The id comes from the link cache. If the session itself has expired an
    /// empty one is started under the same id so the link stays usable.
    pub async fn resume(&mut self, id: &str) -> StoreResult<&Session> {
        let session = self
            .store
            .load(id)
            .await?
            .unwrap_or_else(|| Session::new(id));
        let session = self.current.insert(session);
        Ok(&*session)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.current.as_ref().and_then(|session| session.get(key))
    }

    /// Set a value in the active session. Ignored when no session is active.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(session) = self.current.as_mut() {
            session.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.current.as_mut().and_then(|session| session.remove(key))
    }

    /// Persist the active session, if any.
    pub async fn save(&self) -> StoreResult<()> {
        match &self.current {
            Some(session) => self.store.save(session).await,
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredSession {
    session: Session,
    expires_at: Instant,
}

/// In-memory session store for development and testing
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of stored sessions, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired sessions. Returns how many were removed.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| StoreError::Backend("session store lock poisoned".to_string()))?;
        let before = guard.len();
        let now = Instant::now();
        guard.retain(|_, stored| now < stored.expires_at);
        Ok(before - guard.len())
    }

    fn write(&self, session: &Session) -> StoreResult<()> {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| StoreError::Backend("session store lock poisoned".to_string()))?;
        guard.insert(
            session.id().to_string(),
            StoredSession {
                session: session.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self) -> StoreResult<Session> {
        let session = Session::new(Uuid::new_v4().simple().to_string());
        self.write(&session)?;
        Ok(session)
    }

    async fn load(&self, id: &str) -> StoreResult<Option<Session>> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| StoreError::Backend("session store lock poisoned".to_string()))?;
        let now = Instant::now();
        Ok(guard
            .get(id)
            .filter(|stored| now < stored.expires_at)
            .map(|stored| stored.session.clone()))
    }

    async fn save(&self, session: &Session) -> StoreResult<()> {
        self.write(session)
    }

    async fn destroy(&self, id: &str) -> StoreResult<bool> {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| StoreError::Backend("session store lock poisoned".to_string()))?;
        Ok(guard.remove(id).is_some())
    }
}
