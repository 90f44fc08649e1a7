//! Owned, replaceable handle to the live user agent
//!
//! There is exactly one live agent per client. Replacing it swaps the handle
//! and aborts the old handle's event listener under one lock, so no event
//! from a discarded agent is processed after the swap. Every installed
//! handle gets a fresh generation number.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::signaling::agent::{AgentEvent, UserAgent};

/// A user agent together with its event listener task
#[derive(Debug)]
pub struct AgentHandle {
    agent: Arc<dyn UserAgent>,
    generation: u64,
    listener: Option<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn agent(&self) -> &Arc<dyn UserAgent> {
        &self.agent
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop the event subscription and hand back the agent for teardown
    fn discard(mut self) -> Arc<dyn UserAgent> {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        debug!("Discarded listeners of agent generation {}", self.generation);
        self.agent.clone()
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Holder of the current agent handle
#[derive(Debug, Default)]
pub struct AgentSlot {
    current: Mutex<Option<AgentHandle>>,
    next_generation: AtomicU64,
}

impl AgentSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `agent`, returning its generation and the replaced agent
    ///
    /// `listen` receives the new generation and an event receiver that was
    /// subscribed before the agent becomes current; it must spawn the
    /// listener task. The replaced agent's listener is already aborted when
    /// this returns; stopping its transport is up to the caller.
    pub fn install<F>(&self, agent: Arc<dyn UserAgent>, listen: F) -> (u64, Option<Arc<dyn UserAgent>>)
    where
        F: FnOnce(u64, broadcast::Receiver<AgentEvent>) -> JoinHandle<()>,
    {
        let mut current = self.current.lock();
        Self::install_locked(&mut current, &self.next_generation, agent, listen)
    }

    /// Like [`install`](Self::install), but only when `admit` still holds
    ///
    /// `admit` is evaluated under the slot lock, so a concurrent
    /// [`take`](Self::take) either sees the new agent or the install is
    /// refused. Returns `None` when refused; the agent is left untouched.
    pub fn install_if<A, F>(
        &self,
        agent: Arc<dyn UserAgent>,
        admit: A,
        listen: F,
    ) -> Option<(u64, Option<Arc<dyn UserAgent>>)>
    where
        A: FnOnce() -> bool,
        F: FnOnce(u64, broadcast::Receiver<AgentEvent>) -> JoinHandle<()>,
    {
        let mut current = self.current.lock();
        if !admit() {
            debug!("Agent install refused");
            return None;
        }
        Some(Self::install_locked(&mut current, &self.next_generation, agent, listen))
    }

    fn install_locked<F>(
        current: &mut Option<AgentHandle>,
        next_generation: &AtomicU64,
        agent: Arc<dyn UserAgent>,
        listen: F,
    ) -> (u64, Option<Arc<dyn UserAgent>>)
    where
        F: FnOnce(u64, broadcast::Receiver<AgentEvent>) -> JoinHandle<()>,
    {
        let generation = next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let events = agent.subscribe();
        let listener = listen(generation, events);
        let previous = current.replace(AgentHandle {
            agent,
            generation,
            listener: Some(listener),
        });
        debug!("Installed agent generation {}", generation);
        (generation, previous.map(AgentHandle::discard))
    }

    /// Remove the current agent, discarding its listener
    pub fn take(&self) -> Option<Arc<dyn UserAgent>> {
        self.current.lock().take().map(AgentHandle::discard)
    }

    pub fn current(&self) -> Option<Arc<dyn UserAgent>> {
        self.current.lock().as_ref().map(|h| h.agent().clone())
    }

    pub fn generation(&self) -> Option<u64> {
        self.current.lock().as_ref().map(AgentHandle::generation)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == Some(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::config::AgentConfig;
    use crate::loopback::{LoopbackStack, RegisterBehavior};
    use crate::media::platform::PlatformKind;
    use crate::signaling::{AgentOptions, SignalingStack};

    fn agent(stack: &LoopbackStack) -> Arc<dyn UserAgent> {
        let options = AgentOptions::from_config(&AgentConfig::new("10.0.0.1"), PlatformKind::Browser).unwrap();
        stack.create_agent(options).unwrap()
    }

    #[tokio::test]
    async fn install_replaces_and_aborts_previous_listener() {
        let stack = LoopbackStack::new(RegisterBehavior::Accept);
        let slot = AgentSlot::new();

        let (first, previous) = slot.install(agent(&stack), |_, mut events| {
            tokio::spawn(async move { while events.recv().await.is_ok() {} })
        });
        assert!(previous.is_none());
        assert!(slot.is_current(first));

        let (second, previous) = slot.install(agent(&stack), |_, mut events| {
            tokio::spawn(async move { while events.recv().await.is_ok() {} })
        });
        assert!(second > first);
        assert!(previous.is_some());
        assert!(!slot.is_current(first));
        assert_eq!(slot.generation(), Some(second));

        assert!(slot.take().is_some());
        assert!(slot.current().is_none());
        assert!(slot.take().is_none());
    }

    #[tokio::test]
    async fn refused_install_leaves_slot_empty() {
        let stack = LoopbackStack::new(RegisterBehavior::Accept);
        let slot = AgentSlot::new();

        let installed = slot.install_if(agent(&stack), || false, |_, _| tokio::spawn(async {}));

        assert!(installed.is_none());
        assert!(slot.current().is_none());
        assert_eq!(slot.generation(), None);
    }
}
