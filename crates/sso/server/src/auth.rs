//! Credential check used by the login endpoint.

use crate::error::StoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Public profile of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// External predicate: `authenticate(username, password) -> success|failure`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the user on success, `None` on bad credentials.
    async fn authenticate(&self, username: &str, password: &str) -> StoreResult<Option<UserInfo>>;

    /// Profile of a user already stored in a session.
    async fn user(&self, username: &str) -> StoreResult<Option<UserInfo>>;
}

/// User entry in the static user table.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub password: String,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl std::fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserEntry")
            .field("fullname", &self.fullname)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Fixed user table, for development setups.
///
/// Usernames are case-insensitive: configuration keys are lowercased on
/// load, so lookups fold the same way.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    users: HashMap<String, UserEntry>,
}

impl StaticAuthenticator {
    pub fn new(users: HashMap<String, UserEntry>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|(username, entry)| (username.to_lowercase(), entry))
                .collect(),
        }
    }

    fn entry(&self, username: &str) -> Option<(String, &UserEntry)> {
        let username = username.to_lowercase();
        let entry = self.users.get(&username)?;
        Some((username, entry))
    }

    fn info(username: &str, entry: &UserEntry) -> UserInfo {
        UserInfo {
            username: username.to_string(),
            fullname: entry.fullname.clone(),
            email: entry.email.clone(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> StoreResult<Option<UserInfo>> {
        Ok(self.entry(username).and_then(|(username, entry)| {
            let matches: bool = entry.password.as_bytes().ct_eq(password.as_bytes()).into();
            matches.then(|| Self::info(&username, entry))
        }))
    }

    async fn user(&self, username: &str) -> StoreResult<Option<UserInfo>> {
        Ok(self
            .entry(username)
            .map(|(username, entry)| Self::info(&username, entry)))
    }
}
