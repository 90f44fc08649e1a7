//! Signaling user agent contract

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::ClientResult;
use crate::signaling::options::{AgentOptions, SessionDescriptionOptions};
use crate::signaling::session::SessionHandle;

/// Lifecycle events emitted by a user agent
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Transport connected
    Connected,
    /// Transport lost its connection
    Disconnected { reason: Option<String> },
    /// Transport error that did not (yet) drop the connection
    TransportError { message: String },
    /// Transport closed on request
    Closed,
    /// Registrar accepted the registration
    Registered,
    /// Registration expired or was removed
    Unregistered,
    /// Registrar refused the registration
    RegistrationFailed { cause: String },
    /// Inbound invite
    Invite { session: SessionHandle },
}

/// One signaling endpoint: transport connection, registration and sessions
#[async_trait]
pub trait UserAgent: Send + Sync + fmt::Debug {
    /// Subscribe to lifecycle events
    fn subscribe(&self) -> broadcast::Receiver<AgentEvent>;

    /// Connect the transport
    async fn start(&self) -> ClientResult<()>;

    /// Send a registration request
    async fn register(&self) -> ClientResult<()>;

    /// Start an outbound session
    async fn invite(&self, target: &str, options: SessionDescriptionOptions) -> ClientResult<SessionHandle>;

    /// Disconnect the transport; sessions are abandoned
    async fn stop(&self);

    /// Sessions currently owned by this agent
    fn sessions(&self) -> Vec<SessionHandle>;
}

/// Factory for user agents, provided by the signaling library
pub trait SignalingStack: Send + Sync + fmt::Debug {
    fn create_agent(&self, options: AgentOptions) -> ClientResult<Arc<dyn UserAgent>>;
}
