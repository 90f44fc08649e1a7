//! Signaling session contract
//!
//! A session is one call leg owned by the user agent. The client only keeps
//! handles and ids; the signaling library drives the protocol.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ClientResult;
use crate::media::stream::MediaStream;
use crate::signaling::options::SessionDescriptionOptions;

/// Shared handle to a session owned by the agent
pub type SessionHandle = Arc<dyn SignalingSession>;

/// Session identifier
///
/// Derived from the protocol call identifier, falling back to the
/// session's internal id when the call identifier is not yet known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn derive(call_id: Option<&str>, internal_id: &str) -> Self {
        match call_id {
            Some(call_id) if !call_id.is_empty() => Self(call_id.to_string()),
            _ => Self(internal_id.to_string()),
        }
    }

    /// Id of a live session handle
    pub fn of(session: &dyn SignalingSession) -> Self {
        Self::derive(session.call_id().as_deref(), &session.internal_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Session status as reported by the signaling library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Created, nothing sent yet
    New,
    /// Invite sent or received, provisional responses flowing
    Connecting,
    /// Ringing, waiting for the callee to answer
    WaitingForAnswer,
    /// Answered and confirmed
    Confirmed,
    /// Canceled before being answered
    Canceled,
    /// Ended
    Terminated,
}

impl SessionStatus {
    /// Not answered yet and not ended
    pub fn is_early(&self) -> bool {
        matches!(self, Self::New | Self::Connecting | Self::WaitingForAnswer)
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Canceled | Self::Terminated)
    }
}

/// Which side originated the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionRole {
    /// We sent the invite
    Outbound,
    /// We received the invite
    Inbound,
}

/// Lifecycle events of one session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session was answered and media is flowing
    Accepted,
    /// A renegotiation added remote tracks
    TrackAdded { stream: MediaStream },
    /// The session ended
    Terminated { reason: Option<String> },
}

/// One call leg driven by the signaling library
#[async_trait]
pub trait SignalingSession: Send + Sync + fmt::Debug {
    /// Protocol call identifier, once known
    fn call_id(&self) -> Option<String>;

    /// Library-internal identifier, always available
    fn internal_id(&self) -> String;

    fn role(&self) -> SessionRole;

    fn status(&self) -> SessionStatus;

    /// Remote party URI
    fn remote_uri(&self) -> String;

    /// Whether the session is currently held locally
    fn is_on_hold(&self) -> bool;

    /// Whether the remote offer carries video (inbound sessions)
    fn remote_offers_video(&self) -> bool;

    /// Header of the initial request, case-insensitive lookup
    fn request_header(&self, name: &str) -> Option<String>;

    /// Stream sent to the remote party
    fn local_stream(&self) -> Option<MediaStream>;

    /// Stream received from the remote party
    fn remote_stream(&self) -> Option<MediaStream>;

    /// Subscribe to lifecycle events
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    async fn accept(&self, options: SessionDescriptionOptions) -> ClientResult<()>;

    async fn reject(&self) -> ClientResult<()>;

    async fn cancel(&self) -> ClientResult<()>;

    async fn bye(&self) -> ClientResult<()>;

    async fn hold(&self, options: SessionDescriptionOptions) -> ClientResult<()>;

    async fn unhold(&self, options: SessionDescriptionOptions) -> ClientResult<()>;

    /// Re-exchange media parameters, optionally replacing the outgoing stream
    async fn renegotiate(&self, options: SessionDescriptionOptions) -> ClientResult<()>;

    /// Blind transfer to a target URI
    async fn refer(&self, target: &str) -> ClientResult<()>;

    /// Attended transfer: refer this session's peer to `replacement`
    async fn refer_to_session(&self, replacement: &SessionHandle) -> ClientResult<()>;

    async fn send_dtmf(&self, tones: &str) -> ClientResult<()>;
}
