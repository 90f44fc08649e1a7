//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use webphone_core::loopback::{LoopbackPlatform, LoopbackSession, LoopbackStack, RegisterBehavior};
use webphone_core::{AgentConfig, SessionHandle, WebRtcClient, WebRtcClientBuilder};

pub const HOST: &str = "pbx.example.com";

pub fn config() -> AgentConfig {
    AgentConfig::new(HOST).with_credentials("1001", "secret")
}

pub struct Fixture {
    pub client: Arc<WebRtcClient>,
    pub stack: Arc<LoopbackStack>,
    pub platform: Arc<LoopbackPlatform>,
}

pub async fn client_with(config: AgentConfig, behavior: RegisterBehavior) -> Fixture {
    let stack = Arc::new(LoopbackStack::new(behavior));
    let platform = Arc::new(LoopbackPlatform::browser());
    let client = WebRtcClientBuilder::new()
        .config(config)
        .signaling(stack.clone())
        .platform(platform.clone())
        .build()
        .await
        .expect("client builds");
    Fixture { client, stack, platform }
}

/// A started client whose first registration went through
pub async fn registered_client(config: AgentConfig) -> Fixture {
    let fixture = client_with(config, RegisterBehavior::Accept).await;
    let outcome = fixture.client.start().expect("no loop running").await.expect("loop task");
    assert!(outcome.registered);
    fixture
}

/// Let spawned listeners drain their channels
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

impl Fixture {
    /// Place a call and have the remote side answer it
    pub async fn answered_call(&self, number: &str) -> (SessionHandle, Arc<LoopbackSession>) {
        let session = self.client.call(number, false).await.expect("call placed");
        let remote = self.last_session();
        remote.answer_remotely();
        settle().await;
        (session, remote)
    }

    pub fn last_session(&self) -> Arc<LoopbackSession> {
        self.stack
            .last_agent()
            .and_then(|agent| agent.last_session())
            .expect("a session exists")
    }
}
