//! Transport and registration management
//!
//! The [`RegistrationManager`] owns the live user agent (through an
//! [`AgentSlot`]), binds its lifecycle events and keeps it registered.
//!
//! # Registration state machine
//!
//! ```text
//!            reinit()                      Registered event
//!   Idle ───────────────▶ Registering ─────────────────────────▶ Registered
//!    ▲                      │    ▲                                   │
//!    │ tries == max         │    │ delay elapsed                     │ Disconnected /
//!    │                      ▼    │                                   │ Unregistered
//!    └──────────────── BackingOff                                    ▼
//!                     (1500 ms × tries)                          reinit()
//! ```
//!
//! Only one retry loop runs at a time: `reinit()` is a no-op while a loop is
//! registering. Every attempt builds a fresh agent from the current
//! configuration, so a device change racing with a pending retry never
//! resurrects stale constraints.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::calls::CallController;
use crate::client::config::SharedConfig;
use crate::client::events::invite_event;
use crate::client::recovery::{RetryConfig, RetryOutcome};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};
use crate::media::platform::PlatformKind;
use crate::signaling::{AgentEvent, AgentOptions, AgentSlot, SignalingStack, UserAgent};

/// Phase derived from [`RegistrationState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationPhase {
    /// No loop running and not registered
    Idle,
    /// An attempt is in flight
    Registering,
    /// The registrar accepted the agent
    Registered,
    /// Waiting for the next attempt
    BackingOff,
}

/// Snapshot of the registration bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationState {
    /// Attempts made by the current (or last) retry loop
    pub tries: u32,
    pub registered: bool,
    /// A retry loop is running
    pub registering: bool,
    /// The loop is waiting on its retry timer
    pub pending_retry: bool,
    /// Delay of the pending retry timer
    pub next_retry_delay: Option<Duration>,
}

impl RegistrationState {
    pub fn phase(&self) -> RegistrationPhase {
        if self.registered {
            RegistrationPhase::Registered
        } else if self.registering && self.pending_retry {
            RegistrationPhase::BackingOff
        } else if self.registering {
            RegistrationPhase::Registering
        } else {
            RegistrationPhase::Idle
        }
    }
}

/// Owner of the user agent and its registration retry loop
#[derive(Debug)]
pub struct RegistrationManager {
    stack: Arc<dyn SignalingStack>,
    platform: PlatformKind,
    config: SharedConfig,
    slot: Arc<AgentSlot>,
    calls: Arc<CallController>,
    events: Arc<EventEmitter>,
    state: Mutex<RegistrationState>,
    retry_epoch: AtomicU64,
    registered_notify: Notify,
    closed: AtomicBool,
}

impl RegistrationManager {
    pub fn new(
        stack: Arc<dyn SignalingStack>,
        platform: PlatformKind,
        config: SharedConfig,
        slot: Arc<AgentSlot>,
        calls: Arc<CallController>,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self {
            stack,
            platform,
            config,
            slot,
            calls,
            events,
            state: Mutex::new(RegistrationState::default()),
            retry_epoch: AtomicU64::new(0),
            registered_notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.state.lock().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().registered
    }

    pub fn current_agent(&self) -> Option<Arc<dyn UserAgent>> {
        self.slot.current()
    }

    /// Start a registration retry loop
    ///
    /// Returns `None` when a loop is already registering (or the manager is
    /// shut down). Otherwise the returned handle resolves exactly once with
    /// the loop's outcome; [`RetryOutcome::failed`] is the failure flag.
    pub fn reinit(self: &Arc<Self>) -> Option<JoinHandle<RetryOutcome>> {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Ignoring reinit on a shut down registration manager");
            return None;
        }
        {
            let mut state = self.state.lock();
            if state.registering {
                debug!("Registration already in progress (try {}), reinit is a no-op", state.tries);
                return None;
            }
            state.tries = 0;
            state.registered = false;
            state.registering = true;
            state.pending_retry = false;
            state.next_retry_delay = None;
        }
        let epoch = self.retry_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Starting registration retry loop (epoch {})", epoch);
        let this = self.clone();
        Some(tokio::spawn(async move { this.retry_loop(epoch).await }))
    }

    async fn retry_loop(self: Arc<Self>, epoch: u64) -> RetryOutcome {
        let retry = RetryConfig::with_max_tries(self.config.read().max_registration_tries);
        loop {
            if self.retry_epoch.load(Ordering::SeqCst) != epoch {
                let state = self.state.lock();
                debug!("Retry loop epoch {} superseded", epoch);
                return RetryOutcome {
                    registered: state.registered,
                    tries: state.tries,
                };
            }

            let finished = {
                let mut state = self.state.lock();
                if state.registered || !retry.allows(state.tries) {
                    state.registering = false;
                    state.pending_retry = false;
                    state.next_retry_delay = None;
                    Some(RetryOutcome {
                        registered: state.registered,
                        tries: state.tries,
                    })
                } else {
                    None
                }
            };
            if let Some(outcome) = finished {
                if outcome.registered {
                    info!("Registered after {} attempt(s)", outcome.tries);
                } else {
                    warn!("Giving up registration after {} attempts", outcome.tries);
                    self.events
                        .emit(ClientEvent::RegistrationExhausted { tries: outcome.tries })
                        .await;
                }
                return outcome;
            }

            // Created before the attempt so a Registered event during the
            // attempt still wakes the timer below.
            let registered = self.registered_notify.notified();

            self.attempt(epoch).await;

            let delay = {
                let mut state = self.state.lock();
                state.tries += 1;
                if state.registered {
                    continue;
                }
                let delay = retry.delay_for(state.tries);
                state.pending_retry = true;
                state.next_retry_delay = Some(delay);
                debug!("Registration attempt {} pending, next try in {:?}", state.tries, delay);
                delay
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = registered => {}
            }

            {
                let mut state = self.state.lock();
                state.pending_retry = false;
                state.next_retry_delay = None;
            }
        }
    }

    /// Whether the retry loop of `epoch` may still touch the agent slot
    fn is_live(&self, epoch: u64) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.retry_epoch.load(Ordering::SeqCst) == epoch
    }

    /// One registration attempt: fresh agent, connect, register
    ///
    /// The install is refused once the loop is superseded or the manager is
    /// shut down, and an agent that lost the slot while connecting is
    /// stopped instead of registered.
    async fn attempt(self: &Arc<Self>, epoch: u64) {
        if !self.is_live(epoch) {
            return;
        }
        let agent = match self.build_agent() {
            Ok(agent) => agent,
            Err(e) => {
                error!("Failed to construct agent for registration: {}", e);
                return;
            }
        };
        let Some(generation) = self.install_agent(agent.clone(), || self.is_live(epoch)).await else {
            debug!("Retry loop epoch {} superseded before installing its agent", epoch);
            return;
        };
        if let Err(e) = agent.start().await {
            warn!("Agent generation {} failed to connect: {}", generation, e);
            return;
        }
        if !self.is_live(epoch) {
            debug!("Retry loop epoch {} superseded while connecting, stopping generation {}", epoch, generation);
            agent.stop().await;
            return;
        }
        if let Err(e) = agent.register().await {
            warn!("Agent generation {} register request failed: {}", generation, e);
        }
    }

    fn build_agent(&self) -> ClientResult<Arc<dyn UserAgent>> {
        let options = AgentOptions::from_config(&self.config.read(), self.platform)?;
        debug!("Constructing agent for {} via {}", options.uri, options.transport.server);
        self.stack.create_agent(options)
    }

    /// Swap in `agent`, discarding the previous agent's listeners and
    /// stopping its transport
    ///
    /// `admit` is checked under the slot lock; `None` means it refused.
    async fn install_agent<A>(self: &Arc<Self>, agent: Arc<dyn UserAgent>, admit: A) -> Option<u64>
    where
        A: FnOnce() -> bool,
    {
        let weak = Arc::downgrade(self);
        let (generation, previous) = self.slot.install_if(agent, admit, move |generation, events| {
            tokio::spawn(listen_agent_events(weak, generation, events))
        })?;
        if let Some(previous) = previous {
            previous.stop().await;
        }
        Some(generation)
    }

    pub async fn change_audio_input_device(self: &Arc<Self>, device_id: Option<String>) -> ClientResult<()> {
        info!("Switching audio input device to {:?}", device_id);
        self.config.write().media.audio_input_device_id = device_id;
        self.replace_agent().await
    }

    pub async fn change_video_input_device(self: &Arc<Self>, device_id: Option<String>) -> ClientResult<()> {
        info!("Switching video input device to {:?}", device_id);
        self.config.write().media.video_input_device_id = device_id;
        self.replace_agent().await
    }

    /// Tear down the live agent and install a brand-new one
    ///
    /// Construction failures propagate; connect and register failures hand
    /// over to the retry loop.
    pub async fn replace_agent(self: &Arc<Self>) -> ClientResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if let Some(old) = self.slot.take() {
            old.stop().await;
        }
        self.state.lock().registered = false;

        let agent = self.build_agent()?;
        let Some(generation) = self
            .install_agent(agent.clone(), || !self.closed.load(Ordering::SeqCst))
            .await
        else {
            return Err(ClientError::Closed);
        };
        let connected = async {
            agent.start().await?;
            agent.register().await
        };
        if let Err(e) = connected.await {
            warn!("Replacement agent generation {} failed to register: {}", generation, e);
            self.reinit();
        }
        Ok(())
    }

    /// Stop retrying, discard listeners and disconnect the transport
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.retry_epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            state.registering = false;
            state.registered = false;
            state.pending_retry = false;
            state.next_retry_delay = None;
        }
        self.registered_notify.notify_waiters();
        if let Some(agent) = self.slot.take() {
            agent.stop().await;
        }
        info!("Registration manager shut down");
    }

    async fn handle_agent_event(self: &Arc<Self>, generation: u64, event: AgentEvent) {
        if !self.slot.is_current(generation) {
            debug!("Ignoring event from replaced agent generation {}", generation);
            return;
        }
        match event {
            AgentEvent::Connected => {
                debug!("Transport connected (generation {})", generation);
                self.events.emit(ClientEvent::TransportConnected).await;
            }
            AgentEvent::Disconnected { reason } => {
                warn!("Transport disconnected: {:?}", reason);
                self.state.lock().registered = false;
                self.events.emit(ClientEvent::TransportDisconnected { reason }).await;
                self.reinit();
            }
            AgentEvent::TransportError { message } => {
                warn!("Transport error: {}", message);
                self.events.emit(ClientEvent::TransportError { message }).await;
            }
            AgentEvent::Closed => {
                self.events.emit(ClientEvent::TransportClosed).await;
            }
            AgentEvent::Registered => {
                self.state.lock().registered = true;
                self.registered_notify.notify_waiters();
                info!("Agent generation {} registered", generation);
                self.events.emit(ClientEvent::Registered).await;
            }
            AgentEvent::Unregistered => {
                warn!("Agent generation {} unregistered", generation);
                self.state.lock().registered = false;
                self.events.emit(ClientEvent::Unregistered).await;
                self.reinit();
            }
            AgentEvent::RegistrationFailed { cause } => {
                warn!("Registration refused: {}", cause);
                self.events.emit(ClientEvent::RegistrationFailed { cause }).await;
            }
            AgentEvent::Invite { session } => {
                self.calls.wire_session(&session);
                self.events.emit(invite_event(session)).await;
            }
        }
    }
}

async fn listen_agent_events(
    manager: Weak<RegistrationManager>,
    generation: u64,
    mut events: tokio::sync::broadcast::Receiver<AgentEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(manager) = manager.upgrade() else { break };
                manager.handle_agent_event(generation, event).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Agent generation {} listener lagged, {} events skipped", generation, skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Agent generation {} listener finished", generation);
}
