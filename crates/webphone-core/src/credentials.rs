//! Credential bootstrap
//!
//! Applications that authenticate against a call-control backend hand the
//! client an [`AppContext`] instead of relying on a process-wide session
//! holder. The context resolves signaling credentials for an opaque user id
//! and line id; the REST and login flows behind it are the application's.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::config::AgentConfig;
use crate::error::{ClientError, ClientResult};

/// Signaling credentials for one line
#[derive(Clone, PartialEq, Eq)]
pub struct LineCredentials {
    pub username: String,
    pub secret: String,
}

impl fmt::Debug for LineCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineCredentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Lookup of line credentials, typically backed by an authenticated REST
/// session
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    async fn lookup(&self, user_id: &str, line_id: &str) -> anyhow::Result<LineCredentials>;
}

/// Explicitly owned application context
#[derive(Clone)]
pub struct AppContext {
    credentials: Arc<dyn CredentialLookup>,
}

impl AppContext {
    pub fn new(credentials: Arc<dyn CredentialLookup>) -> Self {
        Self { credentials }
    }

    /// Fill in missing credentials on `config` from the lookup
    ///
    /// Configs that already carry both an authorization user and a password
    /// are returned unchanged without a lookup.
    pub async fn populate(&self, mut config: AgentConfig, user_id: &str, line_id: &str) -> ClientResult<AgentConfig> {
        if !config.needs_credentials() {
            return Ok(config);
        }
        let credentials = self
            .credentials
            .lookup(user_id, line_id)
            .await
            .map_err(|source| ClientError::CredentialLookup {
                user_id: user_id.to_string(),
                line_id: line_id.to_string(),
                source,
            })?;
        tracing::info!("Resolved signaling credentials for line {} ({})", line_id, credentials.username);
        config.authorization_user = credentials.username;
        config.password = credentials.secret;
        Ok(config)
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext").field("credentials", &"<lookup>").finish()
    }
}
