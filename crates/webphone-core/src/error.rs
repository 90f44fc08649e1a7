//! Error types for the webphone client library

use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the webphone client
///
/// Only operations that affect the ability to place any call (agent
/// construction, configuration, credential lookup) surface these to the
/// caller. Per-call teardown and renegotiation failures are logged and
/// suppressed by the call controller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Credential lookup through the application context failed
    #[error("Credential lookup failed for user {user_id} line {line_id}: {source}")]
    CredentialLookup {
        user_id: String,
        line_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// No signaling agent is currently installed
    #[error("No signaling agent is available")]
    NoAgent,

    /// The signaling library rejected an agent construction
    #[error("Agent construction failed: {reason}")]
    AgentConstruction { reason: String },

    /// Transport level failure reported by the signaling library
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Registration request failed
    #[error("Registration failed: {reason}")]
    Registration { reason: String },

    /// A session operation (invite, accept, hold, refer, bye...) failed
    #[error("Session {session_id} operation {operation} failed: {reason}")]
    Session {
        session_id: String,
        operation: &'static str,
        reason: String,
    },

    /// Session was not found
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Invalid DTMF tone sequence
    #[error("Invalid DTMF tones: {tones}")]
    InvalidDtmf { tones: String },

    /// The client has been closed
    #[error("Client is closed")]
    Closed,
}

impl ClientError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a registration error
    pub fn registration(reason: impl Into<String>) -> Self {
        Self::Registration {
            reason: reason.into(),
        }
    }

    /// Create a session operation error
    pub fn session(session_id: impl Into<String>, operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Session {
            session_id: session_id.into(),
            operation,
            reason: reason.into(),
        }
    }
}
