//! Media session tracker
//!
//! Maps a signaling session to the media streams negotiated for it: the local
//! capture stream and every remote stream produced over the session's life
//! (one per renegotiation that adds tracks). Pure bookkeeping, no I/O.

use dashmap::DashMap;

use crate::media::stream::MediaStream;
use crate::signaling::SessionId;

/// Streams tracked for one session
#[derive(Debug, Clone, Default)]
pub struct MediaSessionEntry {
    /// Local capture stream, if one has been attached
    pub local: Option<MediaStream>,
    /// Remote streams in the order they were negotiated
    pub remotes: Vec<MediaStream>,
}

/// Session id → media streams map
#[derive(Debug, Default)]
pub struct MediaSessionTracker {
    entries: DashMap<SessionId, MediaSessionEntry>,
}

impl MediaSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local stream, creating the entry if absent
    pub fn attach_local(&self, session_id: &SessionId, stream: MediaStream) {
        self.entries.entry(session_id.clone()).or_default().local = Some(stream);
    }

    /// Append a remote stream, creating the entry if absent
    ///
    /// Append-only: every renegotiation that announces a stream adds an
    /// entry, even when the stream was announced before.
    pub fn attach_remote(&self, session_id: &SessionId, stream: MediaStream) {
        self.entries.entry(session_id.clone()).or_default().remotes.push(stream);
    }

    pub fn has_local_video(&self, session_id: &SessionId) -> bool {
        self.entries
            .get(session_id)
            .and_then(|e| e.local.as_ref().map(MediaStream::has_video))
            .unwrap_or(false)
    }

    pub fn has_remote_video(&self, session_id: &SessionId) -> bool {
        self.entries
            .get(session_id)
            .map(|e| e.remotes.iter().any(MediaStream::has_video))
            .unwrap_or(false)
    }

    pub fn local_stream(&self, session_id: &SessionId) -> Option<MediaStream> {
        self.entries.get(session_id).and_then(|e| e.local.clone())
    }

    /// Remote streams in negotiation order; empty when untracked
    pub fn remote_streams(&self, session_id: &SessionId) -> Vec<MediaStream> {
        self.entries
            .get(session_id)
            .map(|e| e.remotes.clone())
            .unwrap_or_default()
    }

    pub fn is_tracked(&self, session_id: &SessionId) -> bool {
        self.entries.contains_key(session_id)
    }

    pub fn tracked_sessions(&self) -> Vec<SessionId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop the entry; no-op when absent
    pub fn release(&self, session_id: &SessionId) -> Option<MediaSessionEntry> {
        self.entries.remove(session_id).map(|(_, entry)| entry)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::stream::{MediaTrack, TrackKind};

    fn audio_only() -> MediaStream {
        MediaStream::new(vec![MediaTrack::new(TrackKind::Audio)])
    }

    fn with_video() -> MediaStream {
        MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio),
            MediaTrack::new(TrackKind::Video),
        ])
    }

    #[test]
    fn untracked_session_reports_nothing() {
        let tracker = MediaSessionTracker::new();
        let id = SessionId::from("missing");
        assert!(!tracker.has_local_video(&id));
        assert!(!tracker.has_remote_video(&id));
        assert!(tracker.remote_streams(&id).is_empty());
        assert!(tracker.release(&id).is_none());
    }

    #[test]
    fn remote_streams_keep_negotiation_order() {
        let tracker = MediaSessionTracker::new();
        let id = SessionId::from("call-1");
        let first = audio_only();
        let second = with_video();
        tracker.attach_remote(&id, first.clone());
        tracker.attach_remote(&id, second.clone());

        let ids: Vec<_> = tracker.remote_streams(&id).iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec![first.id().to_string(), second.id().to_string()]);
        assert!(tracker.has_remote_video(&id));
        assert!(!tracker.has_local_video(&id));
    }

    #[test]
    fn reannounced_remote_stream_is_appended_again() {
        let tracker = MediaSessionTracker::new();
        let id = SessionId::from("call-4");
        let stream = audio_only();
        tracker.attach_remote(&id, stream.clone());
        tracker.attach_remote(&id, stream.clone());

        let remotes = tracker.remote_streams(&id);
        assert_eq!(remotes.len(), 2);
        assert!(remotes.iter().all(|s| s.id() == stream.id()));
    }

    #[test]
    fn local_attach_replaces_previous_stream() {
        let tracker = MediaSessionTracker::new();
        let id = SessionId::from("call-2");
        tracker.attach_local(&id, audio_only());
        assert!(!tracker.has_local_video(&id));
        tracker.attach_local(&id, with_video());
        assert!(tracker.has_local_video(&id));
    }

    #[test]
    fn release_is_idempotent() {
        let tracker = MediaSessionTracker::new();
        let id = SessionId::from("call-3");
        tracker.attach_local(&id, audio_only());
        assert!(tracker.release(&id).is_some());
        assert!(tracker.release(&id).is_none());
        assert!(!tracker.is_tracked(&id));
    }
}
