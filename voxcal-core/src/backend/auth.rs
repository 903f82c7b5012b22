//! Bearer token suppliers for backend calls.
//!
//! A provider that cannot find a token returns `None`; whether an anonymous
//! call is acceptable is the backend's decision, not the client's.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Supplies the bearer token attached to backend requests.
#[async_trait]
pub trait AuthTokenProvider: Send + Sync {
    async fn token(&self) -> Option<String>;
}

/// Never attaches a token.
pub struct NoAuth;

#[async_trait]
impl AuthTokenProvider for NoAuth {
    async fn token(&self) -> Option<String> {
        None
    }
}

/// A fixed token.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AuthTokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        Some(self.0.clone()).filter(|t| !t.is_empty())
    }
}

/// Reads the token from an environment variable on every call.
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl AuthTokenProvider for EnvToken {
    async fn token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

/// Reads an access token out of a stored auth session file.
///
/// The file is JSON as written by the hosted auth client. The token may sit at
/// `access_token`, `currentSession.access_token`, or
/// `data.session.access_token`.
pub struct SessionFileToken {
    path: PathBuf,
}

impl SessionFileToken {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuthTokenProvider for SessionFileToken {
    async fn token(&self) -> Option<String> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No session file");
                return None;
            }
        };
        let session: Value = serde_json::from_str(&raw).ok()?;
        extract_access_token(&session)
    }
}

/// Look up an access token in the session layouts seen in practice.
pub fn extract_access_token(session: &Value) -> Option<String> {
    [
        "/access_token",
        "/currentSession/access_token",
        "/data/session/access_token",
    ]
    .iter()
    .filter_map(|ptr| session.pointer(ptr))
    .filter_map(Value::as_str)
    .find(|t| !t.is_empty())
    .map(str::to_string)
}
