//! Event system for the webphone client
//!
//! Lifecycle fan-out uses an enumerated event type instead of string-keyed
//! emitters, so subscribers match on [`ClientEvent`] variants and the
//! compiler checks handler signatures. Two delivery paths exist:
//!
//! - a `tokio::sync::broadcast` stream from [`EventEmitter::stream`]
//! - typed [`ClientEventHandler`] subscriptions with an [`EventFilter`]
//!
//! # Examples
//!
//! ```rust
//! use webphone_core::events::{ClientEvent, ClientEventKind, EventPriority};
//!
//! let event = ClientEvent::Registered;
//! assert_eq!(event.kind(), ClientEventKind::Registered);
//! assert_eq!(event.priority(), EventPriority::High);
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::signaling::{SessionHandle, SessionId};

/// Capacity of the broadcast event stream
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Priority levels used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    /// Routine transport chatter
    Low,
    /// Call progress
    Normal,
    /// Incoming calls and registration changes
    High,
    /// Failures the application should surface
    Critical,
}

/// Discriminant of [`ClientEvent`], used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientEventKind {
    Registered,
    Unregistered,
    RegistrationFailed,
    RegistrationExhausted,
    Invite,
    Accepted,
    TransportConnected,
    TransportDisconnected,
    TransportError,
    TransportClosed,
    MergeCapacityExceeded,
}

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The agent is registered
    Registered,
    /// The registration was lost; a retry loop has been started
    Unregistered,
    /// One registration attempt was refused
    RegistrationFailed { cause: String },
    /// The retry loop hit its attempt ceiling
    RegistrationExhausted { tries: u32 },
    /// Inbound call
    Invite {
        session: SessionHandle,
        has_video: bool,
        should_auto_answer: bool,
    },
    /// A call was answered (either direction)
    Accepted { session: SessionHandle },
    TransportConnected,
    TransportDisconnected { reason: Option<String> },
    TransportError { message: String },
    TransportClosed,
    /// A merge went above the configured maximum
    MergeCapacityExceeded {
        session_id: SessionId,
        active: usize,
        max: usize,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> ClientEventKind {
        match self {
            Self::Registered => ClientEventKind::Registered,
            Self::Unregistered => ClientEventKind::Unregistered,
            Self::RegistrationFailed { .. } => ClientEventKind::RegistrationFailed,
            Self::RegistrationExhausted { .. } => ClientEventKind::RegistrationExhausted,
            Self::Invite { .. } => ClientEventKind::Invite,
            Self::Accepted { .. } => ClientEventKind::Accepted,
            Self::TransportConnected => ClientEventKind::TransportConnected,
            Self::TransportDisconnected { .. } => ClientEventKind::TransportDisconnected,
            Self::TransportError { .. } => ClientEventKind::TransportError,
            Self::TransportClosed => ClientEventKind::TransportClosed,
            Self::MergeCapacityExceeded { .. } => ClientEventKind::MergeCapacityExceeded,
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            Self::RegistrationExhausted { .. } => EventPriority::Critical,
            Self::Registered
            | Self::Unregistered
            | Self::RegistrationFailed { .. }
            | Self::Invite { .. }
            | Self::MergeCapacityExceeded { .. } => EventPriority::High,
            Self::Accepted { .. } | Self::TransportDisconnected { .. } | Self::TransportError { .. } => {
                EventPriority::Normal
            }
            Self::TransportConnected | Self::TransportClosed => EventPriority::Low,
        }
    }

    /// Session the event concerns, if any
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Invite { session, .. } | Self::Accepted { session } => Some(SessionId::of(session.as_ref())),
            Self::MergeCapacityExceeded { session_id, .. } => Some(session_id.clone()),
            _ => None,
        }
    }

    pub fn passes_filter(&self, filter: &EventFilter) -> bool {
        if let Some(kinds) = &filter.kinds {
            if !kinds.contains(&self.kind()) {
                return false;
            }
        }
        if let Some(session_ids) = &filter.session_ids {
            match self.session_id() {
                Some(id) if session_ids.contains(&id) => {}
                _ => return false,
            }
        }
        if let Some(min) = filter.min_priority {
            if self.priority() < min {
                return false;
            }
        }
        true
    }
}

/// Filter applied to handler subscriptions
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Option<HashSet<ClientEventKind>>,
    pub session_ids: Option<HashSet<SessionId>>,
    pub min_priority: Option<EventPriority>,
}

impl EventFilter {
    pub fn kinds<I: IntoIterator<Item = ClientEventKind>>(kinds: I) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            ..Default::default()
        }
    }
}

/// Typed event handler; every method defaults to a no-op
#[async_trait]
pub trait ClientEventHandler: Send + Sync {
    async fn on_registered(&self) {}

    async fn on_unregistered(&self) {}

    async fn on_registration_failed(&self, _cause: String) {}

    async fn on_registration_exhausted(&self, _tries: u32) {}

    async fn on_invite(&self, _session: SessionHandle, _has_video: bool, _should_auto_answer: bool) {}

    async fn on_accepted(&self, _session: SessionHandle) {}

    /// Transport connect (`true`) and disconnect (`false`) notifications
    async fn on_transport_state(&self, _connected: bool, _reason: Option<String>) {}

    async fn on_transport_error(&self, _message: String) {}

    async fn on_transport_closed(&self) {}

    async fn on_merge_capacity_exceeded(&self, _session_id: SessionId, _active: usize, _max: usize) {}

    async fn on_client_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Registered => self.on_registered().await,
            ClientEvent::Unregistered => self.on_unregistered().await,
            ClientEvent::RegistrationFailed { cause } => self.on_registration_failed(cause).await,
            ClientEvent::RegistrationExhausted { tries } => self.on_registration_exhausted(tries).await,
            ClientEvent::Invite {
                session,
                has_video,
                should_auto_answer,
            } => self.on_invite(session, has_video, should_auto_answer).await,
            ClientEvent::Accepted { session } => self.on_accepted(session).await,
            ClientEvent::TransportConnected => self.on_transport_state(true, None).await,
            ClientEvent::TransportDisconnected { reason } => self.on_transport_state(false, reason).await,
            ClientEvent::TransportError { message } => self.on_transport_error(message).await,
            ClientEvent::TransportClosed => self.on_transport_closed().await,
            ClientEvent::MergeCapacityExceeded { session_id, active, max } => {
                self.on_merge_capacity_exceeded(session_id, active, max).await
            }
        }
    }
}

/// A handler registered with a filter
#[derive(Clone)]
pub struct EventSubscription {
    handler: Arc<dyn ClientEventHandler>,
    filter: EventFilter,
    id: uuid::Uuid,
}

impl EventSubscription {
    pub fn new(handler: Arc<dyn ClientEventHandler>, filter: EventFilter) -> Self {
        Self {
            handler,
            filter,
            id: uuid::Uuid::new_v4(),
        }
    }

    pub fn all_events(handler: Arc<dyn ClientEventHandler>) -> Self {
        Self::new(handler, EventFilter::default())
    }

    /// Events about one session only
    pub fn session_events(handler: Arc<dyn ClientEventHandler>, session_id: SessionId) -> Self {
        let filter = EventFilter {
            session_ids: Some(HashSet::from([session_id])),
            ..Default::default()
        };
        Self::new(handler, filter)
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn should_receive(&self, event: &ClientEvent) -> bool {
        event.passes_filter(&self.filter)
    }

    pub async fn deliver_event(&self, event: ClientEvent) {
        if self.should_receive(&event) {
            self.handler.on_client_event(event).await;
        }
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish()
    }
}

/// Fan-out of client events to streams and handlers
#[derive(Debug)]
pub struct EventEmitter {
    tx: broadcast::Sender<(DateTime<Utc>, ClientEvent)>,
    subscriptions: RwLock<Vec<EventSubscription>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Timestamped event stream
    pub fn stream(&self) -> broadcast::Receiver<(DateTime<Utc>, ClientEvent)> {
        self.tx.subscribe()
    }

    pub fn subscribe(&self, subscription: EventSubscription) -> uuid::Uuid {
        let id = subscription.id();
        self.subscriptions.write().push(subscription);
        id
    }

    pub fn unsubscribe(&self, subscription_id: uuid::Uuid) -> bool {
        let mut subscriptions = self.subscriptions.write();
        if let Some(pos) = subscriptions.iter().position(|s| s.id() == subscription_id) {
            subscriptions.remove(pos);
            true
        } else {
            false
        }
    }

    /// Deliver an event to the stream and every matching handler
    pub async fn emit(&self, event: ClientEvent) {
        tracing::debug!("Emitting {:?} event", event.kind());
        // No receivers is fine; the stream is optional
        let _ = self.tx.send((Utc::now(), event.clone()));

        let subscriptions = self.subscriptions.read().clone();
        let tasks: Vec<_> = subscriptions
            .into_iter()
            .filter(|s| s.should_receive(&event))
            .map(|subscription| {
                let event = event.clone();
                tokio::spawn(async move {
                    subscription.deliver_event(event).await;
                })
            })
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Error delivering event: {}", e);
            }
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Drop every handler subscription
    pub fn clear(&self) {
        self.subscriptions.write().clear();
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        registered: AtomicUsize,
        exhausted: AtomicUsize,
    }

    #[async_trait]
    impl ClientEventHandler for CountingHandler {
        async fn on_registered(&self) {
            self.registered.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_registration_exhausted(&self, _tries: u32) {
            self.exhausted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn handlers_only_see_filtered_kinds() {
        let emitter = EventEmitter::new();
        let handler = Arc::new(CountingHandler::default());
        emitter.subscribe(EventSubscription::new(
            handler.clone(),
            EventFilter::kinds([ClientEventKind::RegistrationExhausted]),
        ));

        emitter.emit(ClientEvent::Registered).await;
        emitter.emit(ClientEvent::RegistrationExhausted { tries: 200 }).await;

        assert_eq!(handler.registered.load(Ordering::SeqCst), 0);
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_receives_every_event() {
        let emitter = EventEmitter::new();
        let mut stream = emitter.stream();
        emitter.emit(ClientEvent::TransportConnected).await;
        emitter.emit(ClientEvent::Registered).await;

        assert_eq!(stream.recv().await.unwrap().1.kind(), ClientEventKind::TransportConnected);
        assert_eq!(stream.recv().await.unwrap().1.kind(), ClientEventKind::Registered);
    }

    #[test]
    fn unsubscribe_and_clear() {
        let emitter = EventEmitter::new();
        let id = emitter.subscribe(EventSubscription::all_events(Arc::new(CountingHandler::default())));
        emitter.subscribe(EventSubscription::all_events(Arc::new(CountingHandler::default())));
        assert!(emitter.unsubscribe(id));
        assert!(!emitter.unsubscribe(id));
        assert_eq!(emitter.subscription_count(), 1);
        emitter.clear();
        assert_eq!(emitter.subscription_count(), 0);
    }

    #[test]
    fn priority_filter() {
        let filter = EventFilter {
            min_priority: Some(EventPriority::High),
            ..Default::default()
        };
        assert!(ClientEvent::Registered.passes_filter(&filter));
        assert!(!ClientEvent::TransportConnected.passes_filter(&filter));
    }
}
