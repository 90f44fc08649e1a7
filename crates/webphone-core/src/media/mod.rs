//! Media bookkeeping for call sessions
//!
//! ```text
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │  CallController      │─────▶│ MediaSessionTracker  │  session → streams
//! │                      │      └──────────────────────┘
//! │                      │      ┌──────────────────────┐
//! │                      │─────▶│ AudioMixer           │  merged call audio
//! └──────────────────────┘      └──────────┬───────────┘
//!                                          ▼
//!                               ┌──────────────────────┐
//!                               │ MediaPlatform        │  audio graph (browser)
//!                               └──────────────────────┘
//! ```

pub mod mixer;
pub mod platform;
pub mod stream;
pub mod tracker;

pub use mixer::AudioMixer;
pub use platform::{AudioContext, AudioSourceNode, HeadlessPlatform, MediaPlatform, MixerDestination, PlatformKind};
pub use stream::{MediaStream, MediaTrack, TrackKind};
pub use tracker::{MediaSessionEntry, MediaSessionTracker};
