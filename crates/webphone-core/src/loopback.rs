//! In-memory signaling stack and media platform
//!
//! The loopback implementations record every request and let the caller
//! drive the remote side by hand: answer an outbound call, deliver an
//! inbound invite, drop the transport. They back the crate's tests and the
//! demos, and are handy for exercising an application without a server.
//!
//! ```rust
//! use std::sync::Arc;
//! use webphone_core::loopback::{LoopbackStack, RegisterBehavior};
//! use webphone_core::signaling::{AgentOptions, SignalingStack};
//! use webphone_core::{AgentConfig, PlatformKind};
//!
//! let stack = LoopbackStack::new(RegisterBehavior::Accept);
//! let config = AgentConfig::new("pbx.example.com").with_credentials("1001", "pw");
//! let options = AgentOptions::from_config(&config, PlatformKind::Browser).unwrap();
//! stack.create_agent(options).unwrap();
//! assert_eq!(stack.agent_count(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::media::platform::{AudioContext, AudioSourceNode, MediaPlatform, MixerDestination, PlatformKind};
use crate::media::stream::{MediaStream, MediaTrack, TrackKind};
use crate::signaling::{
    AgentEvent, AgentOptions, MediaConstraints, SessionDescriptionOptions, SessionEvent, SessionHandle,
    SessionId, SessionRole, SessionStatus, SignalingSession, SignalingStack, UserAgent,
};

const LOOPBACK_CHANNEL_CAPACITY: usize = 64;

fn capture(constraints: &MediaConstraints) -> MediaStream {
    let mut tracks = Vec::new();
    if constraints.audio.is_enabled() {
        tracks.push(MediaTrack::new(TrackKind::Audio));
    }
    if constraints.wants_video() {
        tracks.push(MediaTrack::new(TrackKind::Video));
    }
    MediaStream::new(tracks)
}

fn remote_media(video: bool) -> MediaStream {
    let mut tracks = vec![MediaTrack::new(TrackKind::Audio)];
    if video {
        tracks.push(MediaTrack::new(TrackKind::Video));
    }
    MediaStream::new(tracks)
}

/// How loopback registrars answer register requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterBehavior {
    /// Emit `Registered`
    Accept,
    /// Emit `RegistrationFailed`
    Reject,
    /// Never answer
    Ignore,
}

/// Signaling stack handing out [`LoopbackAgent`]s
#[derive(Debug)]
pub struct LoopbackStack {
    behavior: Arc<Mutex<RegisterBehavior>>,
    fail_construction: AtomicBool,
    agents: Mutex<Vec<Arc<LoopbackAgent>>>,
}

impl LoopbackStack {
    pub fn new(behavior: RegisterBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            fail_construction: AtomicBool::new(false),
            agents: Mutex::new(Vec::new()),
        }
    }

    /// Change the registrar behavior, including for agents already created
    pub fn set_register_behavior(&self, behavior: RegisterBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_fail_construction(&self, fail: bool) {
        self.fail_construction.store(fail, Ordering::SeqCst);
    }

    pub fn agents(&self) -> Vec<Arc<LoopbackAgent>> {
        self.agents.lock().clone()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.lock().len()
    }

    pub fn last_agent(&self) -> Option<Arc<LoopbackAgent>> {
        self.agents.lock().last().cloned()
    }
}

impl SignalingStack for LoopbackStack {
    fn create_agent(&self, options: AgentOptions) -> ClientResult<Arc<dyn UserAgent>> {
        if self.fail_construction.load(Ordering::SeqCst) {
            return Err(ClientError::AgentConstruction {
                reason: "loopback construction disabled".to_string(),
            });
        }
        let agent = Arc::new(LoopbackAgent::new(options, self.behavior.clone()));
        self.agents.lock().push(agent.clone());
        Ok(agent as Arc<dyn UserAgent>)
    }
}

/// Recording user agent
#[derive(Debug)]
pub struct LoopbackAgent {
    options: AgentOptions,
    created_at: Instant,
    behavior: Arc<Mutex<RegisterBehavior>>,
    events: broadcast::Sender<AgentEvent>,
    started: AtomicBool,
    stopped: AtomicBool,
    register_requests: AtomicUsize,
    sessions: Mutex<Vec<Arc<LoopbackSession>>>,
}

impl LoopbackAgent {
    fn new(options: AgentOptions, behavior: Arc<Mutex<RegisterBehavior>>) -> Self {
        let (events, _) = broadcast::channel(LOOPBACK_CHANNEL_CAPACITY);
        Self {
            options,
            created_at: Instant::now(),
            behavior,
            events,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            register_requests: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn register_requests(&self) -> usize {
        self.register_requests.load(Ordering::SeqCst)
    }

    /// Emit an arbitrary agent event
    pub fn emit(&self, event: AgentEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    pub fn simulate_disconnect(&self, reason: &str) {
        self.emit(AgentEvent::Disconnected {
            reason: Some(reason.to_string()),
        });
    }

    /// Deliver an inbound invite from `remote_uri`
    pub fn deliver_invite(&self, remote_uri: &str, with_video: bool, headers: &[(&str, &str)]) -> Arc<LoopbackSession> {
        let session = Arc::new(LoopbackSession::inbound(remote_uri, with_video, headers));
        self.sessions.lock().push(session.clone());
        self.emit(AgentEvent::Invite {
            session: session.clone(),
        });
        session
    }

    pub fn loopback_sessions(&self) -> Vec<Arc<LoopbackSession>> {
        self.sessions.lock().clone()
    }

    pub fn last_session(&self) -> Option<Arc<LoopbackSession>> {
        self.sessions.lock().last().cloned()
    }
}

#[async_trait]
impl UserAgent for LoopbackAgent {
    fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    async fn start(&self) -> ClientResult<()> {
        if self.is_stopped() {
            return Err(ClientError::transport("agent was stopped"));
        }
        self.started.store(true, Ordering::SeqCst);
        self.emit(AgentEvent::Connected);
        Ok(())
    }

    async fn register(&self) -> ClientResult<()> {
        if !self.is_started() {
            return Err(ClientError::registration("transport not connected"));
        }
        let attempt = self.register_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = *self.behavior.lock();
        debug!("Loopback register request {} for {} ({:?})", attempt, self.options.uri, behavior);
        match behavior {
            RegisterBehavior::Accept => self.emit(AgentEvent::Registered),
            RegisterBehavior::Reject => self.emit(AgentEvent::RegistrationFailed {
                cause: "403 Forbidden".to_string(),
            }),
            RegisterBehavior::Ignore => {}
        }
        Ok(())
    }

    async fn invite(&self, target: &str, options: SessionDescriptionOptions) -> ClientResult<SessionHandle> {
        if !self.is_started() || self.is_stopped() {
            return Err(ClientError::transport("transport not connected"));
        }
        let session = Arc::new(LoopbackSession::outbound(target, &options.constraints));
        self.sessions.lock().push(session.clone());
        Ok(session as SessionHandle)
    }

    async fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.emit(AgentEvent::Closed);
        }
    }

    fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions
            .lock()
            .iter()
            .map(|s| s.clone() as SessionHandle)
            .collect()
    }
}

/// Operation requested on a [`LoopbackSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOp {
    Accept,
    Reject,
    Cancel,
    Bye,
    Hold,
    Unhold,
    /// Renegotiation with the id of the replacement outgoing stream
    Renegotiate { outgoing_stream: Option<String> },
    Refer(String),
    ReferToSession(SessionId),
    Dtmf(String),
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    on_hold: bool,
    local: Option<MediaStream>,
    remote: Option<MediaStream>,
}

/// Recording session
#[derive(Debug)]
pub struct LoopbackSession {
    internal_id: String,
    call_id: String,
    role: SessionRole,
    remote_uri: String,
    remote_video: bool,
    headers: HashMap<String, String>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    ops: Mutex<Vec<SessionOp>>,
    failing: Mutex<Vec<&'static str>>,
    renegotiation_yields: AtomicUsize,
}

impl LoopbackSession {
    fn with_role(role: SessionRole, remote_uri: &str, remote_video: bool, headers: &[(&str, &str)], local: Option<MediaStream>) -> Self {
        let (events, _) = broadcast::channel(LOOPBACK_CHANNEL_CAPACITY);
        Self {
            internal_id: Uuid::new_v4().to_string(),
            call_id: format!("{}@loopback", Uuid::new_v4().simple()),
            role,
            remote_uri: remote_uri.to_string(),
            remote_video,
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
                .collect(),
            state: Mutex::new(SessionState {
                status: SessionStatus::Connecting,
                on_hold: false,
                local,
                remote: None,
            }),
            events,
            ops: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            renegotiation_yields: AtomicUsize::new(0),
        }
    }

    /// Outbound session as created by an invite
    pub fn outbound(target: &str, constraints: &MediaConstraints) -> Self {
        Self::with_role(SessionRole::Outbound, target, false, &[], Some(capture(constraints)))
    }

    /// Inbound session waiting to be answered
    pub fn inbound(remote_uri: &str, with_video: bool, headers: &[(&str, &str)]) -> Self {
        Self::with_role(SessionRole::Inbound, remote_uri, with_video, headers, None)
    }

    pub fn id(&self) -> SessionId {
        SessionId::of(self)
    }

    pub fn ops(&self) -> Vec<SessionOp> {
        self.ops.lock().clone()
    }

    pub fn count_ops(&self, op: &SessionOp) -> usize {
        self.ops.lock().iter().filter(|o| *o == op).count()
    }

    /// Make every later call of `operation` fail ("bye", "hold", "refer"...)
    pub fn fail_operation(&self, operation: &'static str) {
        self.failing.lock().push(operation);
    }

    /// Suspend every later renegotiation `yields` times before it completes,
    /// the way a network round trip would
    pub fn delay_renegotiation(&self, yields: usize) {
        self.renegotiation_yields.store(yields, Ordering::SeqCst);
    }

    /// The remote party answers an outbound call
    pub fn answer_remotely(&self) {
        {
            let mut state = self.state.lock();
            state.status = SessionStatus::Confirmed;
            state.remote = Some(remote_media(self.remote_video));
        }
        let _ = self.events.send(SessionEvent::Accepted);
    }

    /// The remote party adds a stream through renegotiation
    pub fn add_remote_stream(&self, stream: MediaStream) {
        let _ = self.events.send(SessionEvent::TrackAdded { stream });
    }

    /// The remote party hangs up
    pub fn end_remotely(&self) {
        self.state.lock().status = SessionStatus::Terminated;
        let _ = self.events.send(SessionEvent::Terminated {
            reason: Some("remote hangup".to_string()),
        });
    }

    fn record(&self, op: SessionOp, name: &'static str) -> ClientResult<()> {
        if self.failing.lock().contains(&name) {
            return Err(ClientError::session(self.call_id.clone(), name, "loopback failure"));
        }
        self.ops.lock().push(op);
        Ok(())
    }

    fn terminate(&self, status: SessionStatus, reason: &str) {
        self.state.lock().status = status;
        let _ = self.events.send(SessionEvent::Terminated {
            reason: Some(reason.to_string()),
        });
    }
}

#[async_trait]
impl SignalingSession for LoopbackSession {
    fn call_id(&self) -> Option<String> {
        Some(self.call_id.clone())
    }

    fn internal_id(&self) -> String {
        self.internal_id.clone()
    }

    fn role(&self) -> SessionRole {
        self.role
    }

    fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    fn remote_uri(&self) -> String {
        self.remote_uri.clone()
    }

    fn is_on_hold(&self) -> bool {
        self.state.lock().on_hold
    }

    fn remote_offers_video(&self) -> bool {
        self.remote_video
    }

    fn request_header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn local_stream(&self) -> Option<MediaStream> {
        self.state.lock().local.clone()
    }

    fn remote_stream(&self) -> Option<MediaStream> {
        self.state.lock().remote.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn accept(&self, options: SessionDescriptionOptions) -> ClientResult<()> {
        self.record(SessionOp::Accept, "accept")?;
        {
            let mut state = self.state.lock();
            state.status = SessionStatus::Confirmed;
            state.local = Some(capture(&options.constraints));
            state.remote = Some(remote_media(self.remote_video));
        }
        let _ = self.events.send(SessionEvent::Accepted);
        Ok(())
    }

    async fn reject(&self) -> ClientResult<()> {
        self.record(SessionOp::Reject, "reject")?;
        self.terminate(SessionStatus::Terminated, "rejected");
        Ok(())
    }

    async fn cancel(&self) -> ClientResult<()> {
        self.record(SessionOp::Cancel, "cancel")?;
        self.terminate(SessionStatus::Canceled, "canceled");
        Ok(())
    }

    async fn bye(&self) -> ClientResult<()> {
        self.record(SessionOp::Bye, "bye")?;
        self.terminate(SessionStatus::Terminated, "local hangup");
        Ok(())
    }

    async fn hold(&self, _options: SessionDescriptionOptions) -> ClientResult<()> {
        self.record(SessionOp::Hold, "hold")?;
        self.state.lock().on_hold = true;
        Ok(())
    }

    async fn unhold(&self, _options: SessionDescriptionOptions) -> ClientResult<()> {
        self.record(SessionOp::Unhold, "unhold")?;
        let remote = {
            let mut state = self.state.lock();
            state.on_hold = false;
            state.remote.clone()
        };
        // Renegotiation re-announces the remote tracks
        if let Some(stream) = remote {
            let _ = self.events.send(SessionEvent::TrackAdded { stream });
        }
        Ok(())
    }

    async fn renegotiate(&self, options: SessionDescriptionOptions) -> ClientResult<()> {
        for _ in 0..self.renegotiation_yields.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        let outgoing_stream = options.outgoing_stream.as_ref().map(|s| s.id().to_string());
        self.record(SessionOp::Renegotiate { outgoing_stream }, "renegotiate")
    }

    async fn refer(&self, target: &str) -> ClientResult<()> {
        self.record(SessionOp::Refer(target.to_string()), "refer")
    }

    async fn refer_to_session(&self, replacement: &SessionHandle) -> ClientResult<()> {
        self.record(SessionOp::ReferToSession(SessionId::of(replacement.as_ref())), "refer")
    }

    async fn send_dtmf(&self, tones: &str) -> ClientResult<()> {
        self.record(SessionOp::Dtmf(tones.to_string()), "dtmf")
    }
}

/// Media platform with a recording audio graph
#[derive(Debug)]
pub struct LoopbackPlatform {
    kind: PlatformKind,
    contexts: Mutex<Vec<Arc<LoopbackAudioContext>>>,
}

impl LoopbackPlatform {
    /// Only [`PlatformKind::Browser`] platforms hand out audio contexts
    pub fn new(kind: PlatformKind) -> Self {
        Self {
            kind,
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn browser() -> Self {
        Self::new(PlatformKind::Browser)
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Most recently created context
    pub fn context(&self) -> Option<Arc<LoopbackAudioContext>> {
        self.contexts.lock().last().cloned()
    }
}

impl MediaPlatform for LoopbackPlatform {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    fn create_audio_context(&self) -> Option<Arc<dyn AudioContext>> {
        if self.kind != PlatformKind::Browser {
            return None;
        }
        let context = Arc::new(LoopbackAudioContext::default());
        self.contexts.lock().push(context.clone());
        Some(context as Arc<dyn AudioContext>)
    }
}

type Connections = Arc<Mutex<Vec<(String, String)>>>;

/// Audio graph that records source → destination connections
#[derive(Debug, Default)]
pub struct LoopbackAudioContext {
    connections: Connections,
    destinations: AtomicUsize,
}

impl LoopbackAudioContext {
    /// Ids of the sources connected to `destination_id`, in connection order
    pub fn connected_sources(&self, destination_id: &str) -> Vec<String> {
        self.connections
            .lock()
            .iter()
            .filter(|(_, destination)| destination == destination_id)
            .map(|(source, _)| source.clone())
            .collect()
    }

    pub fn is_connected(&self, source_id: &str) -> bool {
        self.connections.lock().iter().any(|(source, _)| source == source_id)
    }

    pub fn destinations_created(&self) -> usize {
        self.destinations.load(Ordering::SeqCst)
    }
}

impl AudioContext for LoopbackAudioContext {
    fn create_destination(&self) -> Arc<dyn MixerDestination> {
        self.destinations.fetch_add(1, Ordering::SeqCst);
        let id = format!("destination-{}", Uuid::new_v4().simple());
        let stream = MediaStream::with_id(format!("mixed-{}", id), vec![MediaTrack::new(TrackKind::Audio)]);
        Arc::new(LoopbackDestination { id, stream })
    }

    fn create_source(&self, stream: &MediaStream) -> Arc<dyn AudioSourceNode> {
        Arc::new(LoopbackSource {
            id: format!("source-{}-{}", stream.id(), Uuid::new_v4().simple()),
            connections: self.connections.clone(),
        })
    }
}

#[derive(Debug)]
struct LoopbackDestination {
    id: String,
    stream: MediaStream,
}

impl MixerDestination for LoopbackDestination {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream(&self) -> MediaStream {
        self.stream.clone()
    }
}

#[derive(Debug)]
struct LoopbackSource {
    id: String,
    connections: Connections,
}

impl AudioSourceNode for LoopbackSource {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn connect(&self, destination: &Arc<dyn MixerDestination>) {
        let edge = (self.id.clone(), destination.id());
        let mut connections = self.connections.lock();
        if !connections.contains(&edge) {
            connections.push(edge);
        }
    }

    fn disconnect(&self) {
        self.connections.lock().retain(|(source, _)| source != &self.id);
    }
}
