//! Call operations
//!
//! The [`CallController`] drives individual sessions owned by the live user
//! agent: placing and answering calls, hanging up, hold, mute, camera
//! toggles, DTMF and blind transfer. Merge handling lives in
//! [`merge`](super::merge) and attended transfer in
//! [`transfer`](super::transfer); both extend the same controller.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │      WebRtcClient       │
//! └───────────┬─────────────┘
//!             │
//! ┌───────────▼─────────────┐      ┌──────────────────────┐
//! │     CallController      │─────▶│ MediaSessionTracker  │
//! │ ┌─────────────────────┐ │      └──────────────────────┘
//! │ │ call() / answer()   │ │      ┌──────────────────────┐
//! │ │ hangup() / reject() │ │─────▶│ AudioMixer           │
//! │ │ hold() / mute()     │ │      └──────────────────────┘
//! │ │ transfer()          │ │
//! │ └─────────────────────┘ │
//! └───────────┬─────────────┘
//!             │ SessionHandle
//! ┌───────────▼─────────────┐
//! │  SignalingSession       │  owned by the user agent
//! └─────────────────────────┘
//! ```
//!
//! # Failure policy
//!
//! Teardown never fails: [`CallController::hangup`] logs and swallows
//! signaling errors so cleanup of local media always completes. Operations
//! whose failure leaves the call in a state the application must know about
//! (placing, answering, hold, refer) return a [`ClientResult`] after logging.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::client::config::SharedConfig;
use crate::client::merge::MergeEntry;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};
use crate::media::stream::{MediaStream, TrackKind};
use crate::media::{AudioMixer, MediaSessionTracker};
use crate::signaling::{
    AgentSlot, MediaConstraints, SessionDescriptionOptions, SessionEvent, SessionHandle, SessionId, SessionRole,
    SignalingSession,
};

/// Pause between putting a call on hold and sending the refer
pub const TRANSFER_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Characters accepted by [`CallController::send_dtmf`]
const DTMF_TONES: &str = "0123456789*#ABCDabcd,";

/// Per-session call control over the live agent's sessions
#[derive(Debug)]
pub struct CallController {
    pub(crate) config: SharedConfig,
    pub(crate) slot: Arc<AgentSlot>,
    pub(crate) tracker: Arc<MediaSessionTracker>,
    pub(crate) mixer: Arc<AudioMixer>,
    pub(crate) events: Arc<EventEmitter>,
    /// Active merges keyed by session
    pub(crate) merges: Mutex<HashMap<SessionId, MergeEntry>>,
    /// Sessions with a running event listener; the agent owns them
    wired: DashMap<SessionId, Weak<dyn SignalingSession>>,
}

impl CallController {
    pub fn new(
        config: SharedConfig,
        slot: Arc<AgentSlot>,
        tracker: Arc<MediaSessionTracker>,
        mixer: Arc<AudioMixer>,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self {
            config,
            slot,
            tracker,
            mixer,
            events,
            merges: Mutex::new(HashMap::new()),
            wired: DashMap::new(),
        }
    }

    /// Negotiation options derived from the current media configuration
    pub(crate) fn description_options(&self) -> SessionDescriptionOptions {
        let config = self.config.read();
        SessionDescriptionOptions::new(MediaConstraints::from_media(&config.media), config.ice_checking_timeout())
    }

    pub(crate) fn video_enabled(&self) -> bool {
        self.config.read().media.video
    }

    /// Place an outbound call
    ///
    /// `enable_video` updates the media configuration before constraints are
    /// derived, so later renegotiations of this and other calls use it too.
    ///
    /// # Errors
    ///
    /// * [`ClientError::NoAgent`] - no agent is installed (never started or closed)
    /// * any error the signaling library reports for the invite
    pub async fn call(self: &Arc<Self>, number: &str, enable_video: bool) -> ClientResult<SessionHandle> {
        let agent = self.slot.current().ok_or(ClientError::NoAgent)?;
        let (target, options) = {
            let mut config = self.config.write();
            config.media.video = enable_video;
            let options =
                SessionDescriptionOptions::new(MediaConstraints::from_media(&config.media), config.ice_checking_timeout());
            (config.target_uri(number), options)
        };

        let session = agent.invite(&target, options).await.map_err(|e| {
            warn!("Failed to place call to {}: {}", target, e);
            e
        })?;
        self.wire_session(&session);
        info!("Placed call {} to {}", SessionId::of(session.as_ref()), target);
        Ok(session)
    }

    /// Answer an inbound call
    pub async fn answer(&self, session: &SessionHandle, enable_video: bool) -> ClientResult<()> {
        self.config.write().media.video = enable_video;
        let id = SessionId::of(session.as_ref());
        session.accept(self.description_options()).await.map_err(|e| {
            warn!("Failed to answer {}: {}", id, e);
            e
        })?;
        info!("Answered call {}", id);
        Ok(())
    }

    /// Register the lifecycle listener of a session
    ///
    /// Idempotent. The subscription is taken before this returns so no event
    /// emitted after wiring is missed.
    pub fn wire_session(self: &Arc<Self>, session: &SessionHandle) {
        let id = SessionId::of(session.as_ref());
        if self.wired.contains_key(&id) {
            return;
        }
        self.wired.insert(id.clone(), Arc::downgrade(session));

        let mut events = session.subscribe();
        let controller = Arc::downgrade(self);
        let weak_session = Arc::downgrade(session);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let (Some(controller), Some(session)) = (controller.upgrade(), weak_session.upgrade()) else {
                            break;
                        };
                        let terminated = matches!(event, SessionEvent::Terminated { .. });
                        controller.handle_session_event(&session, event).await;
                        if terminated {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Session {} listener lagged, {} events skipped", id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Session {} listener finished", id);
        });
    }

    async fn handle_session_event(&self, session: &SessionHandle, event: SessionEvent) {
        let id = SessionId::of(session.as_ref());
        match event {
            SessionEvent::Accepted => {
                if let Some(local) = session.local_stream() {
                    self.tracker.attach_local(&id, local);
                }
                if let Some(remote) = session.remote_stream() {
                    self.tracker.attach_remote(&id, remote);
                }
                info!("Session {} accepted", id);
                self.events.emit(ClientEvent::Accepted { session: session.clone() }).await;
            }
            SessionEvent::TrackAdded { stream } => {
                debug!("Session {} added remote stream {}", id, stream.id());
                self.tracker.attach_remote(&id, stream.clone());
                self.on_merged_track_added(session, &stream).await;
            }
            SessionEvent::Terminated { reason } => {
                info!("Session {} terminated: {:?}", id, reason);
                self.release_session(session).await;
                self.wired.remove(&id);
            }
        }
    }

    /// Stop local capture and drop merge and media bookkeeping of a session
    async fn release_session(&self, session: &SessionHandle) {
        let id = SessionId::of(session.as_ref());
        if self.is_merged(&id) {
            self.detach_from_merge(session, false, false).await;
        }
        if let Some(local) = session.local_stream() {
            local.stop_all();
        }
        if let Some(entry) = self.tracker.release(&id) {
            if let Some(local) = entry.local {
                local.stop_all();
            }
        }
    }

    /// End a session in whatever phase it is
    ///
    /// Confirmed sessions get a bye and ended sessions are left alone. An
    /// early outbound session is canceled. An early inbound session is
    /// rejected rather than canceled, since only the calling side can cancel
    /// a pending invite. Local capture is stopped and tracking released
    /// first. Never fails: signaling errors are logged and swallowed.
    pub async fn hangup(&self, session: &SessionHandle) {
        let id = SessionId::of(session.as_ref());
        self.release_session(session).await;

        let status = session.status();
        let result = if status.is_ended() {
            debug!("Session {} already ended ({:?}), nothing to hang up", id, status);
            return;
        } else if status.is_early() {
            self.terminate_early(session).await
        } else {
            session.bye().await
        };
        match result {
            Ok(()) => info!("Hung up {}", id),
            Err(e) => warn!("Hangup of {} failed, local state cleaned up anyway: {}", id, e),
        }
    }

    /// Hang up every session this controller has wired
    pub async fn hangup_all(&self) {
        let sessions: Vec<SessionHandle> = self.wired.iter().filter_map(|entry| entry.value().upgrade()).collect();
        for session in sessions {
            self.hangup(&session).await;
        }
    }

    /// Decline an unanswered session: reject when inbound, cancel when outbound
    pub async fn reject(&self, session: &SessionHandle) -> ClientResult<()> {
        let id = SessionId::of(session.as_ref());
        self.terminate_early(session).await.map_err(|e| {
            warn!("Failed to reject {}: {}", id, e);
            e
        })
    }

    async fn terminate_early(&self, session: &SessionHandle) -> ClientResult<()> {
        match session.role() {
            SessionRole::Inbound => session.reject().await,
            SessionRole::Outbound => session.cancel().await,
        }
    }

    /// Local stream of a session, preferring the tracked one
    fn local_stream_of(&self, session: &SessionHandle) -> Option<MediaStream> {
        self.tracker
            .local_stream(&SessionId::of(session.as_ref()))
            .or_else(|| session.local_stream())
    }

    fn set_local_enabled(&self, session: &SessionHandle, kind: TrackKind, enabled: bool) {
        match self.local_stream_of(session) {
            Some(stream) => stream.set_kind_enabled(kind, enabled),
            None => debug!("Session {} has no local stream to toggle", SessionId::of(session.as_ref())),
        }
    }

    /// Silence outgoing audio and put the session on hold
    pub async fn hold(&self, session: &SessionHandle) -> ClientResult<()> {
        self.set_local_enabled(session, TrackKind::Audio, false);
        let id = SessionId::of(session.as_ref());
        session.hold(self.description_options()).await.map_err(|e| {
            warn!("Failed to hold {}: {}", id, e);
            e
        })?;
        debug!("Held {}", id);
        Ok(())
    }

    /// Resume a held session and re-enable outgoing audio
    pub async fn unhold(&self, session: &SessionHandle) -> ClientResult<()> {
        self.set_local_enabled(session, TrackKind::Audio, true);
        let id = SessionId::of(session.as_ref());
        session.unhold(self.description_options()).await.map_err(|e| {
            warn!("Failed to unhold {}: {}", id, e);
            e
        })?;
        debug!("Resumed {}", id);
        Ok(())
    }

    pub fn mute(&self, session: &SessionHandle) {
        self.set_local_enabled(session, TrackKind::Audio, false);
    }

    pub fn unmute(&self, session: &SessionHandle) {
        self.set_local_enabled(session, TrackKind::Audio, true);
    }

    /// Disables the local video tracks.
    ///
    /// The name describes the camera-off button being toggled on, so the
    /// effect is the inverse of what it reads like.
    pub fn toggle_camera_on(&self, session: &SessionHandle) {
        self.set_local_enabled(session, TrackKind::Video, false);
    }

    /// Enables the local video tracks; see [`Self::toggle_camera_on`].
    pub fn toggle_camera_off(&self, session: &SessionHandle) {
        self.set_local_enabled(session, TrackKind::Video, true);
    }

    /// Send in-band DTMF tones
    pub async fn send_dtmf(&self, session: &SessionHandle, tones: &str) -> ClientResult<()> {
        if tones.is_empty() || !tones.chars().all(|c| DTMF_TONES.contains(c)) {
            return Err(ClientError::InvalidDtmf {
                tones: tones.to_string(),
            });
        }
        session.send_dtmf(tones).await
    }

    /// Blind transfer
    ///
    /// Holds the session, waits [`TRANSFER_SETTLE_DELAY`], refers the remote
    /// party to `target` and hangs up. A failed refer leaves the session on
    /// hold and is returned without hanging up.
    pub async fn transfer(&self, session: &SessionHandle, target: &str) -> ClientResult<()> {
        let id = SessionId::of(session.as_ref());
        self.hold(session).await?;
        tokio::time::sleep(TRANSFER_SETTLE_DELAY).await;

        let target = self.config.read().target_uri(target);
        session.refer(&target).await.map_err(|e| {
            warn!("Transfer of {} to {} failed: {}", id, target, e);
            e
        })?;
        info!("Transferred {} to {}", id, target);
        self.hangup(session).await;
        Ok(())
    }

    /// Look up a wired session by id
    pub fn session(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.wired.get(session_id).and_then(|entry| entry.value().upgrade())
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.wired
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }
}
