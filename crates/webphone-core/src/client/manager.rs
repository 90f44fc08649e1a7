//! Client facade
//!
//! [`WebRtcClient`] composes the registration manager, the call controller,
//! the media tracker and the audio mixer behind one object that owns the
//! live agent. Applications normally build it with
//! [`WebRtcClientBuilder`](super::builder::WebRtcClientBuilder).
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │     WebRtcClient     │
//!                    └──┬────────┬───────┬──┘
//!          ┌────────────┘        │       └─────────────┐
//! ┌────────▼───────────┐ ┌───────▼─────────┐ ┌─────────▼─────────┐
//! │RegistrationManager │ │ CallController  │ │   EventEmitter    │
//! │  retry loop        │ │  merge/transfer │ │ stream + handlers │
//! └────────┬───────────┘ └───────┬─────────┘ └───────────────────┘
//!          │   AgentSlot         │
//!          └──────────┬──────────┘
//!                     ▼
//!              UserAgent (one live generation)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::client::calls::CallController;
use crate::client::config::{AgentConfig, SharedConfig};
use crate::client::merge::MergeAdmission;
use crate::client::recovery::RetryOutcome;
use crate::client::transfer::AttendedTransfer;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter, EventSubscription};
use crate::media::stream::MediaStream;
use crate::media::{AudioMixer, MediaPlatform, MediaSessionTracker};
use crate::registration::{RegistrationManager, RegistrationState};
use crate::signaling::{AgentOptions, AgentSlot, SessionHandle, SessionId, SignalingStack};

/// WebRTC/SIP telephony client
#[derive(Debug)]
pub struct WebRtcClient {
    config: SharedConfig,
    registration: Arc<RegistrationManager>,
    calls: Arc<CallController>,
    tracker: Arc<MediaSessionTracker>,
    mixer: Arc<AudioMixer>,
    events: Arc<EventEmitter>,
    closed: AtomicBool,
}

impl WebRtcClient {
    /// Assemble a client; configuration problems are reported here rather
    /// than on the first registration attempt
    pub fn new(
        config: AgentConfig,
        stack: Arc<dyn SignalingStack>,
        platform: Arc<dyn MediaPlatform>,
    ) -> ClientResult<Arc<Self>> {
        AgentOptions::from_config(&config, platform.kind())?;

        let kind = platform.kind();
        let config: SharedConfig = Arc::new(RwLock::new(config));
        let slot = Arc::new(AgentSlot::new());
        let tracker = Arc::new(MediaSessionTracker::new());
        let mixer = Arc::new(AudioMixer::new(platform));
        let events = Arc::new(EventEmitter::new());
        let calls = Arc::new(CallController::new(
            config.clone(),
            slot.clone(),
            tracker.clone(),
            mixer.clone(),
            events.clone(),
        ));
        let registration = Arc::new(RegistrationManager::new(
            stack,
            kind,
            config.clone(),
            slot,
            calls.clone(),
            events.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            registration,
            calls,
            tracker,
            mixer,
            events,
            closed: AtomicBool::new(false),
        }))
    }

    /// Connect and register, retrying with linear backoff
    ///
    /// See [`RegistrationManager::reinit`]; `None` means a retry loop is
    /// already running.
    pub fn start(&self) -> Option<JoinHandle<RetryOutcome>> {
        if self.is_closed() {
            return None;
        }
        self.registration.reinit()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> AgentConfig {
        self.config.read().clone()
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        &self.registration
    }

    pub fn calls(&self) -> &Arc<CallController> {
        &self.calls
    }

    pub fn media(&self) -> &Arc<MediaSessionTracker> {
        &self.tracker
    }

    pub fn mixer(&self) -> &Arc<AudioMixer> {
        &self.mixer
    }

    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.events
    }

    /// Timestamped stream of every client event
    pub fn event_stream(&self) -> broadcast::Receiver<(DateTime<Utc>, ClientEvent)> {
        self.events.stream()
    }

    pub fn subscribe(&self, subscription: EventSubscription) -> uuid::Uuid {
        self.events.subscribe(subscription)
    }

    pub fn unsubscribe(&self, subscription_id: uuid::Uuid) -> bool {
        self.events.unsubscribe(subscription_id)
    }

    /// Look up a live session by id
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionNotFound`] when no wired session has that id or
    /// the agent already dropped it.
    pub fn session(&self, session_id: &SessionId) -> ClientResult<SessionHandle> {
        self.calls.session(session_id).ok_or_else(|| ClientError::SessionNotFound {
            session_id: session_id.to_string(),
        })
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_registered()
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration.state()
    }

    pub async fn call(&self, number: &str, enable_video: bool) -> ClientResult<SessionHandle> {
        self.ensure_open()?;
        self.calls.call(number, enable_video).await
    }

    pub async fn answer(&self, session: &SessionHandle, enable_video: bool) -> ClientResult<()> {
        self.ensure_open()?;
        self.calls.answer(session, enable_video).await
    }

    pub async fn hangup(&self, session: &SessionHandle) {
        self.calls.hangup(session).await
    }

    pub async fn reject(&self, session: &SessionHandle) -> ClientResult<()> {
        self.calls.reject(session).await
    }

    pub async fn hold(&self, session: &SessionHandle) -> ClientResult<()> {
        self.calls.hold(session).await
    }

    pub async fn unhold(&self, session: &SessionHandle) -> ClientResult<()> {
        self.calls.unhold(session).await
    }

    pub fn mute(&self, session: &SessionHandle) {
        self.calls.mute(session)
    }

    pub fn unmute(&self, session: &SessionHandle) {
        self.calls.unmute(session)
    }

    /// Disables local video; see [`CallController::toggle_camera_on`]
    pub fn toggle_camera_on(&self, session: &SessionHandle) {
        self.calls.toggle_camera_on(session)
    }

    /// Enables local video; see [`CallController::toggle_camera_off`]
    pub fn toggle_camera_off(&self, session: &SessionHandle) {
        self.calls.toggle_camera_off(session)
    }

    pub async fn send_dtmf(&self, session: &SessionHandle, tones: &str) -> ClientResult<()> {
        self.calls.send_dtmf(session, tones).await
    }

    pub async fn transfer(&self, session: &SessionHandle, target: &str) -> ClientResult<()> {
        self.ensure_open()?;
        self.calls.transfer(session, target).await
    }

    pub fn attended_transfer(&self, session: &SessionHandle) -> AttendedTransfer {
        self.calls.attended_transfer(session)
    }

    pub async fn merge(&self, sessions: &[SessionHandle]) -> Vec<MergeAdmission> {
        self.calls.merge(sessions).await
    }

    pub async fn add_to_merge(&self, session: &SessionHandle) -> MergeAdmission {
        self.calls.add_to_merge(session).await
    }

    pub async fn remove_from_merge(&self, session: &SessionHandle, should_hold: bool) {
        self.calls.remove_from_merge(session, should_hold).await
    }

    pub async fn unmerge(&self, sessions: &[SessionHandle]) {
        self.calls.unmerge(sessions).await
    }

    pub fn has_local_video(&self, session_id: &SessionId) -> bool {
        self.tracker.has_local_video(session_id)
    }

    pub fn has_remote_video(&self, session_id: &SessionId) -> bool {
        self.tracker.has_remote_video(session_id)
    }

    pub fn remote_streams(&self, session_id: &SessionId) -> Vec<MediaStream> {
        self.tracker.remote_streams(session_id)
    }

    /// Switch microphone; the agent is rebuilt with the new constraints
    pub async fn change_audio_input_device(&self, device_id: Option<String>) -> ClientResult<()> {
        self.ensure_open()?;
        self.registration.change_audio_input_device(device_id).await
    }

    /// Switch camera; the agent is rebuilt with the new constraints
    pub async fn change_video_input_device(&self, device_id: Option<String>) -> ClientResult<()> {
        self.ensure_open()?;
        self.registration.change_video_input_device(device_id).await
    }

    /// Record the preferred playback device
    ///
    /// Output routing happens on the application's media elements; the
    /// client only keeps the selection with the rest of the configuration.
    pub fn set_audio_output_device(&self, device_id: Option<String>) {
        self.config.write().audio_output_device_id = device_id;
    }

    /// Tear everything down
    ///
    /// Hangs up every session, clears media and merge state, stops the
    /// registration loop, disconnects the agent and drops event handlers.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing client");
        self.calls.hangup_all().await;
        self.calls.merges.lock().clear();
        self.mixer.clear();
        self.tracker.clear();
        self.registration.shutdown().await;
        self.events.clear();
        info!("Client closed");
    }
}
