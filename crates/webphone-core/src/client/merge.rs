//! Conference merge of independent calls
//!
//! Merging mixes the local microphone and the remote audio of every merged
//! session into one shared [`AudioMixer`](crate::media::AudioMixer)
//! destination, and replaces each merged session's outgoing media with the
//! mixed stream. Each party then hears everyone else.
//!
//! ```text
//!   mic(A) ──┐                       ┌──▶ session A (outgoing)
//!   remote(A)┼──▶ mixer destination ─┼──▶ session B (outgoing)
//!   mic(B) ──┤                       └──▶ session C (outgoing)
//!   remote(B)┘
//! ```
//!
//! Removing a session rebuilds the destination from the remaining sources
//! rather than detaching nodes in place. Sources are created and the
//! destination rebuilt while the merge table is locked, so the table and the
//! audio graph never disagree about who is merged.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::client::calls::CallController;
use crate::events::ClientEvent;
use crate::media::stream::MediaStream;
use crate::media::AudioSourceNode;
use crate::signaling::{SessionHandle, SessionId};

/// Mixer sources contributed by one merged session
#[derive(Debug, Default)]
pub struct MergeEntry {
    /// Source wrapping the local capture
    pub local: Option<Arc<dyn AudioSourceNode>>,
    /// Sources wrapping the remote streams
    pub remotes: Vec<Arc<dyn AudioSourceNode>>,
    /// Ids of the remote streams already wrapped in `remotes`
    pub remote_stream_ids: HashSet<String>,
    /// Binding deferred until the session's next track addition
    pub pending: bool,
}

impl MergeEntry {
    fn pending() -> Self {
        Self {
            pending: true,
            ..Default::default()
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = &Arc<dyn AudioSourceNode>> {
        self.local.iter().chain(self.remotes.iter())
    }

    fn disconnect_all(&self) {
        for source in self.sources() {
            source.disconnect();
        }
    }
}

/// Result of adding a session to the merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAdmission {
    Admitted,
    /// Admitted beyond the configured maximum
    OverCapacity { active: usize, max: usize },
    AlreadyMerged,
}

impl CallController {
    pub fn is_merged(&self, session_id: &SessionId) -> bool {
        self.merges.lock().contains_key(session_id)
    }

    pub fn merged_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.merges.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Add every session to the merge
    pub async fn merge(&self, sessions: &[SessionHandle]) -> Vec<MergeAdmission> {
        let mut admissions = Vec::with_capacity(sessions.len());
        for session in sessions {
            admissions.push(self.add_to_merge(session).await);
        }
        admissions
    }

    /// Add one session to the merge
    ///
    /// Going above the configured maximum logs a warning and emits
    /// [`ClientEvent::MergeCapacityExceeded`] but still admits the session.
    /// A held session is resumed and bound once its tracks are re-added.
    pub async fn add_to_merge(&self, session: &SessionHandle) -> MergeAdmission {
        let id = SessionId::of(session.as_ref());
        let max = self.config.read().max_merge_sessions;
        let held = session.is_on_hold();

        let (admission, active) = {
            let mut merges = self.merges.lock();
            if merges.contains_key(&id) {
                debug!("Session {} is already merged", id);
                return MergeAdmission::AlreadyMerged;
            }
            let active = merges.len();
            let admission = if active >= max {
                MergeAdmission::OverCapacity { active, max }
            } else {
                MergeAdmission::Admitted
            };
            merges.insert(id.clone(), if held { MergeEntry::pending() } else { MergeEntry::default() });
            (admission, active)
        };

        if let MergeAdmission::OverCapacity { .. } = admission {
            warn!(
                "Merging session {} with {} sessions already merged exceeds the maximum of {}; audio quality may degrade",
                id, active, max
            );
            self.events
                .emit(ClientEvent::MergeCapacityExceeded {
                    session_id: id.clone(),
                    active,
                    max,
                })
                .await;
        }

        if held {
            debug!("Session {} is on hold, binding deferred until its tracks are re-added", id);
            if let Err(e) = self.unhold(session).await {
                warn!("Could not resume held session {} for merge: {}", id, e);
            }
        } else {
            self.bind_merge(session).await;
        }
        info!("Merged session {} ({} merged)", id, active + 1);
        admission
    }

    /// Connect a session's media to the mixer and send it the mixed stream
    async fn bind_merge(&self, session: &SessionHandle) {
        let id = SessionId::of(session.as_ref());
        let local_stream = self
            .tracker
            .local_stream(&id)
            .or_else(|| session.local_stream());
        let mut remote_streams = self.tracker.remote_streams(&id);
        if remote_streams.is_empty() {
            remote_streams.extend(session.remote_stream());
        }

        let bound = {
            let mut merges = self.merges.lock();
            match merges.get_mut(&id) {
                Some(entry) => {
                    entry.disconnect_all();
                    entry.local = self.mixer.create_source(local_stream.as_ref());
                    entry.remotes.clear();
                    entry.remote_stream_ids.clear();
                    for stream in &remote_streams {
                        // renegotiations re-announce streams that are already wrapped
                        if !entry.remote_stream_ids.insert(stream.id().to_string()) {
                            continue;
                        }
                        entry.remotes.extend(self.mixer.create_source(Some(stream)));
                    }
                    entry.pending = false;
                    true
                }
                None => false,
            }
        };
        if !bound {
            debug!("Session {} left the merge before binding", id);
            return;
        }

        match self.mixer.mixed_stream() {
            Some(mixed) => self.send_stream(session, Some(mixed)).await,
            None => debug!("No audio graph available, merge of {} is bookkeeping only", id),
        }
    }

    /// Called on every track addition of a session
    ///
    /// A pending merge is bound now; an already bound merge only picks up
    /// streams it has not wrapped yet.
    pub(crate) async fn on_merged_track_added(&self, session: &SessionHandle, stream: &MediaStream) {
        let id = SessionId::of(session.as_ref());
        let pending = {
            let mut merges = self.merges.lock();
            let Some(entry) = merges.get_mut(&id) else {
                return;
            };
            if !entry.pending && entry.remote_stream_ids.insert(stream.id().to_string()) {
                entry.remotes.extend(self.mixer.create_source(Some(stream)));
            }
            entry.pending
        };
        if pending {
            self.bind_merge(session).await;
        }
    }

    /// Take one session out of the merge
    ///
    /// The mixer destination is rebuilt from the remaining sessions' sources
    /// and those sessions renegotiate onto it. The removed session gets its
    /// own capture back and is put on hold when `should_hold` is set.
    pub async fn remove_from_merge(&self, session: &SessionHandle, should_hold: bool) {
        self.detach_from_merge(session, true, should_hold).await;
    }

    pub(crate) async fn detach_from_merge(&self, session: &SessionHandle, restore: bool, should_hold: bool) {
        let id = SessionId::of(session.as_ref());
        if !self.leave_merge(std::slice::from_ref(&id)).await {
            debug!("Session {} is not merged", id);
            return;
        }
        if restore {
            self.restore_own_media(session, should_hold).await;
        }
        info!("Session {} left the merge", id);
    }

    /// Drop `ids` from the merge table and re-point the rest of the merge
    ///
    /// The removal, the disconnection of their sources and the rebuild (or
    /// clearing) of the destination happen in one locked step. The sessions
    /// still merged afterwards are renegotiated onto the destination current
    /// at the time of each send. Returns whether any of `ids` was merged.
    async fn leave_merge(&self, ids: &[SessionId]) -> bool {
        let remaining = {
            let mut merges = self.merges.lock();
            let mut removed = 0;
            for id in ids {
                if let Some(entry) = merges.remove(id) {
                    entry.disconnect_all();
                    removed += 1;
                }
            }
            if removed == 0 {
                return false;
            }
            if merges.is_empty() {
                self.mixer.clear();
                Vec::new()
            } else if self.mixer.rebuild(merges.values().flat_map(|entry| entry.sources())).is_some() {
                let mut ids: Vec<SessionId> = merges.keys().cloned().collect();
                ids.sort();
                ids
            } else {
                Vec::new()
            }
        };

        for other in remaining {
            let Some(handle) = self.session(&other) else {
                debug!("Merged session {} is gone, skipping renegotiation", other);
                continue;
            };
            self.follow_destination(&other, &handle).await;
        }
        true
    }

    /// Renegotiate a merged session until it sends the live mixed stream
    ///
    /// Another removal may rebuild the destination while a renegotiation is
    /// in flight; the session is then renegotiated again. Stops as soon as
    /// the session is no longer merged.
    async fn follow_destination(&self, id: &SessionId, session: &SessionHandle) {
        loop {
            let sent = {
                let merges = self.merges.lock();
                if !merges.contains_key(id) {
                    return;
                }
                self.mixer.mixed_stream()
            };
            let sent_id = sent.as_ref().map(|stream| stream.id().to_string());
            self.send_stream(session, sent).await;
            let live_id = self.mixer.mixed_stream().map(|stream| stream.id().to_string());
            if live_id == sent_id {
                return;
            }
            debug!("Mixer destination changed while renegotiating {}, following it", id);
        }
    }

    /// Give a session that left the merge its own capture back
    async fn restore_own_media(&self, session: &SessionHandle, should_hold: bool) {
        if session.status().is_ended() {
            return;
        }
        let id = SessionId::of(session.as_ref());
        let local = self.tracker.local_stream(&id).or_else(|| session.local_stream());
        self.send_stream(session, local).await;
        if should_hold {
            if let Err(e) = self.hold(session).await {
                warn!("Could not hold {} after leaving the merge: {}", id, e);
            }
        }
    }

    /// Split up a merge
    ///
    /// All listed sessions leave the merge table and the destination in one
    /// step before any of them is renegotiated. Each then gets its own
    /// capture back; every one except the last is put back on hold.
    pub async fn unmerge(&self, sessions: &[SessionHandle]) {
        let merged: Vec<&SessionHandle> = sessions
            .iter()
            .filter(|session| self.is_merged(&SessionId::of(session.as_ref())))
            .collect();
        let ids: Vec<SessionId> = merged.iter().map(|session| SessionId::of(session.as_ref())).collect();
        if !self.leave_merge(&ids).await {
            return;
        }
        let last = merged.len().saturating_sub(1);
        let restores = merged
            .iter()
            .enumerate()
            .map(|(index, session)| self.restore_own_media(session, index != last));
        join_all(restores).await;
        debug!("Unmerged {} sessions", merged.len());
    }

    /// Renegotiate a session's outgoing media; failures are logged
    async fn send_stream(&self, session: &SessionHandle, stream: Option<MediaStream>) {
        let mut options = self.description_options();
        if let Some(stream) = stream {
            options = options.with_outgoing_stream(stream);
        }
        if let Err(e) = session.renegotiate(options).await {
            warn!("Renegotiation of {} failed: {}", SessionId::of(session.as_ref()), e);
        }
    }
}
