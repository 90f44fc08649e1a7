//! Platform media contract
//!
//! The client does not capture media itself. It expects the host platform to
//! hand out an audio processing graph (browser environments only) that can
//! wrap streams as source nodes and mix them into a destination node.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::media::stream::MediaStream;

/// Kind of host platform the client runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformKind {
    /// Browser-style environment with an audio graph and peer connections
    Browser,
    /// Native host (mobile/desktop shell) with its own session handling
    Native,
}

/// Host platform services consumed by the client
pub trait MediaPlatform: Send + Sync + Debug {
    fn kind(&self) -> PlatformKind;

    /// Create an audio processing context; `None` when the platform has no
    /// audio graph
    fn create_audio_context(&self) -> Option<Arc<dyn AudioContext>>;
}

/// Audio processing graph
pub trait AudioContext: Send + Sync + Debug {
    /// Create a new destination node that mixes everything connected to it
    fn create_destination(&self) -> Arc<dyn MixerDestination>;

    /// Wrap a media stream as a graph source node (not yet connected)
    fn create_source(&self, stream: &MediaStream) -> Arc<dyn AudioSourceNode>;
}

/// Mixer output node
pub trait MixerDestination: Send + Sync + Debug {
    fn id(&self) -> String;

    /// Mixed output stream, suitable as a session's outgoing media
    fn stream(&self) -> MediaStream;
}

/// Graph source node wrapping one stream
pub trait AudioSourceNode: Send + Sync + Debug {
    fn id(&self) -> String;

    fn connect(&self, destination: &Arc<dyn MixerDestination>);

    /// Detach from every destination
    fn disconnect(&self);
}

/// Host without an audio graph; merges degrade to bookkeeping only
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessPlatform;

impl MediaPlatform for HeadlessPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Native
    }

    fn create_audio_context(&self) -> Option<Arc<dyn AudioContext>> {
        None
    }
}
