//! Client facade and call control
//!
//! - [`manager`]: the [`WebRtcClient`] facade owning the live agent
//! - [`builder`]: fluent construction
//! - [`calls`]: per-session operations
//! - [`merge`] and [`transfer`]: conference merge and attended transfer
//! - [`config`] and [`recovery`]: configuration and the registration retry policy

pub mod builder;
pub mod calls;
pub mod config;
pub mod events;
pub mod manager;
pub mod merge;
pub mod recovery;
pub mod transfer;


pub use builder::WebRtcClientBuilder;
pub use calls::{CallController, TRANSFER_SETTLE_DELAY};
pub use config::{AgentConfig, MediaConfig, SharedConfig};
pub use manager::WebRtcClient;
pub use merge::{MergeAdmission, MergeEntry};
pub use recovery::{RetryConfig, RetryOutcome};
pub use transfer::AttendedTransfer;
