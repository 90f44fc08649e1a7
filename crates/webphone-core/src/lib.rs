//! # Webphone-Core - WebRTC/SIP Telephony Client
//!
//! Client-side call control for browser-style WebRTC telephony. The crate
//! wraps an external signaling library (modelled by the traits in
//! [`signaling`]) and adds what an application needs on top of it:
//!
//! - **Registration lifecycle**: one live user agent, reconnected and
//!   re-registered with linear backoff (`1500 ms × tries`, 200 tries)
//! - **Call control**: call, answer, hangup, reject, hold, mute, camera
//!   toggles, DTMF, blind and attended transfer
//! - **Conference merge**: mixing several calls through one shared audio
//!   destination
//! - **Media tracking**: local and remote streams per session
//! - **Typed events**: [`ClientEvent`] over a broadcast stream or
//!   [`ClientEventHandler`] subscriptions
//!
//! ## Quick Start
//!
//! The example drives the in-process [`loopback`] stack, available with the
//! `loopback` cargo feature.
//!
//! ```rust
//! use std::sync::Arc;
//! use webphone_core::loopback::{LoopbackPlatform, LoopbackStack, RegisterBehavior};
//! use webphone_core::{AgentConfig, WebRtcClientBuilder};
//!
//! # tokio_test::block_on(async {
//! let stack = Arc::new(LoopbackStack::new(RegisterBehavior::Accept));
//! let client = WebRtcClientBuilder::new()
//!     .config(AgentConfig::new("pbx.example.com").with_credentials("1001", "secret"))
//!     .signaling(stack.clone())
//!     .platform(Arc::new(LoopbackPlatform::browser()))
//!     .build()
//!     .await?;
//!
//! let outcome = client.start().expect("no loop running yet").await.unwrap();
//! assert!(outcome.registered);
//!
//! let session = client.call("2002", false).await?;
//! client.hangup(&session).await;
//! client.close().await;
//! # Ok::<(), webphone_core::ClientError>(())
//! # }).unwrap();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Application                  │
//! └───────────────────┬─────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────┐
//! │  WebRtcClient  (client::manager)            │
//! │  ├── RegistrationManager  (registration)    │
//! │  ├── CallController       (client::calls)   │
//! │  ├── MediaSessionTracker  (media::tracker)  │
//! │  └── AudioMixer           (media::mixer)    │
//! └───────────────────┬─────────────────────────┘
//!                     │ SignalingStack / UserAgent / SignalingSession
//! ┌───────────────────▼─────────────────────────┐
//! │  Signaling library (external)               │
//! └─────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod credentials;
pub mod error;
pub mod events;
#[cfg(any(test, feature = "loopback"))]
pub mod loopback;
pub mod media;
pub mod registration;
pub mod signaling;

pub use client::{
    AgentConfig, AttendedTransfer, CallController, MediaConfig, MergeAdmission, RetryConfig, RetryOutcome,
    WebRtcClient, WebRtcClientBuilder,
};
pub use credentials::{AppContext, CredentialLookup, LineCredentials};
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, ClientEventHandler, ClientEventKind, EventFilter, EventPriority, EventSubscription};
pub use media::{MediaStream, MediaTrack, PlatformKind, TrackKind};
pub use registration::{RegistrationManager, RegistrationPhase, RegistrationState};
pub use signaling::{SessionHandle, SessionId, SessionStatus};
