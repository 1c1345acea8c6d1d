//! Allow-listed broker API commands.
//!
//! Hosts that forward a command name from the browser (e.g. an AJAX
//! endpoint) parse it into [`ApiCommand`] first; anything outside the list
//! is rejected before a request is made.

use crate::broker::{Broker, RequestData};
use crate::error::{BrokerError, BrokerResult};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Command name that is not on the allow-list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown SSO command '{0}'")]
pub struct UnknownCommand(pub String);

/// Broker API commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCommand {
    Info,
    Login,
    Logout,
    Detach,
}

impl ApiCommand {
    pub const ALL: [ApiCommand; 4] = [
        ApiCommand::Info,
        ApiCommand::Login,
        ApiCommand::Logout,
        ApiCommand::Detach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiCommand::Info => "info",
            ApiCommand::Login => "login",
            ApiCommand::Logout => "logout",
            ApiCommand::Detach => "detach",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            ApiCommand::Info => Method::GET,
            ApiCommand::Login | ApiCommand::Logout | ApiCommand::Detach => Method::POST,
        }
    }

    /// Server path, absolute so it replaces the attach path of the server URL.
    pub fn path(&self) -> &'static str {
        match self {
            ApiCommand::Info => "/api/info",
            ApiCommand::Login => "/api/login",
            ApiCommand::Logout => "/api/logout",
            ApiCommand::Detach => "/api/detach",
        }
    }
}

impl fmt::Display for ApiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApiCommand::ALL
            .into_iter()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

impl Broker {
    /// Run an allow-listed command against the SSO server.
    pub async fn command(
        &self,
        command: ApiCommand,
        data: Option<RequestData>,
    ) -> BrokerResult<Option<Value>> {
        let result = self.request(command.method(), command.path(), data).await;

        if command == ApiCommand::Detach && result.is_ok() {
            self.clear_token();
        }

        result
    }

    /// Logged in user, `None` when nobody is logged in.
    pub async fn user_info<T: DeserializeOwned>(&self) -> BrokerResult<Option<T>> {
        let data = self.command(ApiCommand::Info, None).await?;
        data.map(parse).transpose()
    }

    /// Log the user in at the SSO server; the login is shared by every broker.
    pub async fn login<T: DeserializeOwned>(&self, username: &str, password: &str) -> BrokerResult<Option<T>> {
        let data = RequestData::form([("username", username), ("password", password)]);
        let user = self.command(ApiCommand::Login, Some(data)).await?;
        user.map(parse).transpose()
    }

    pub async fn logout(&self) -> BrokerResult<()> {
        self.command(ApiCommand::Logout, None).await?;
        Ok(())
    }

    /// Drop the server-side link of the client token and forget it locally.
    pub async fn detach(&self) -> BrokerResult<()> {
        self.command(ApiCommand::Detach, None).await?;
        Ok(())
    }
}

fn parse<T: DeserializeOwned>(data: Value) -> BrokerResult<T> {
    serde_json::from_value(data).map_err(|e| {
        BrokerError::request("Invalid JSON response from server").with_source(e)
    })
}
