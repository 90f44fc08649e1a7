//! Media stream and track handles
//!
//! These types mirror the handles a browser-style media platform hands out:
//! a stream groups tracks, a track has a kind and can be enabled, disabled or
//! stopped. Track handles are shared, so every clone observes the same state
//! as the platform's underlying track.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio track (microphone or remote audio)
    Audio,
    /// Video track (camera or remote video)
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug)]
struct TrackState {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    live: AtomicBool,
}

/// Handle to a single media track
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackState>,
}

impl MediaTrack {
    /// Create a new live, enabled track with a random id
    pub fn new(kind: TrackKind) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), kind)
    }

    /// Create a new live, enabled track with the given id
    pub fn with_id(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(TrackState {
                id: id.into(),
                kind,
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    /// Whether the track currently produces media
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the track without renegotiation
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Stop the track, releasing the capture device behind it
    pub fn stop(&self) {
        self.inner.live.store(false, Ordering::SeqCst);
    }

    /// Whether the track has not been stopped
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Whether two handles refer to the same platform track
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A group of media tracks (local capture or one remote renegotiation)
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    /// Create a stream with a random id
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), tracks)
    }

    pub fn with_id(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Tracks of the given kind
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn has_audio(&self) -> bool {
        self.tracks_of(TrackKind::Audio).next().is_some()
    }

    pub fn has_video(&self) -> bool {
        self.tracks_of(TrackKind::Video).next().is_some()
    }

    /// Enable or disable every track of a kind
    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) {
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
        }
    }

    /// Stop every track in the stream
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
