//! Signaling library contract
//!
//! The wire protocol belongs to an external signaling library. This module
//! names the primitives the client needs from it (connect, register,
//! invite, bye, hold, refer) as traits, plus the option types the client
//! derives from its configuration.

pub mod agent;
pub mod handle;
pub mod options;
pub mod session;

pub use agent::{AgentEvent, SignalingStack, UserAgent};
pub use handle::{AgentHandle, AgentSlot};
pub use options::{
    AgentOptions, DeviceConstraint, IceServer, MediaConstraints, SessionDescriptionOptions,
    SessionHandlerStrategy, TransportOptions,
};
pub use session::{SessionEvent, SessionHandle, SessionId, SessionRole, SessionStatus, SignalingSession};
