//! Loopback Call Walkthrough
//!
//! Drives a client through a full call flow against the in-process
//! loopback signaling stack:
//! - registration
//! - an outbound call answered by the remote side
//! - hold, resume and DTMF
//! - a three-way merge and unmerge
//!
//! Run with: RUST_LOG=webphone_core=debug cargo run --example loopback_call --features loopback

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use webphone_core::loopback::{LoopbackPlatform, LoopbackStack, RegisterBehavior};
use webphone_core::{AgentConfig, ClientEvent, SessionId, WebRtcClientBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("📞 Loopback Call Walkthrough");
    println!("============================\n");

    let stack = Arc::new(LoopbackStack::new(RegisterBehavior::Accept));
    let platform = Arc::new(LoopbackPlatform::browser());
    let client = WebRtcClientBuilder::new()
        .config(
            AgentConfig::new("192.168.1.10")
                .with_display_name("Front Desk")
                .with_credentials("1001", "secret"),
        )
        .signaling(stack.clone())
        .platform(platform.clone())
        .build()
        .await?;

    let mut events = client.event_stream();
    tokio::spawn(async move {
        while let Ok((at, event)) = events.recv().await {
            match &event {
                ClientEvent::Invite { session, .. } | ClientEvent::Accepted { session } => {
                    info!("{} {:?} on {}", at.format("%H:%M:%S%.3f"), event.kind(), SessionId::of(session.as_ref()))
                }
                other => info!("{} {:?}", at.format("%H:%M:%S%.3f"), other.kind()),
            }
        }
    });

    if let Some(registration) = client.start() {
        let outcome = registration.await?;
        println!("✅ Registered after {} attempt(s)", outcome.tries);
    }

    let agent = stack.last_agent().ok_or("no user agent was created")?;

    // Outbound call, answered by the far end
    let first = client.call("2001", false).await?;
    let remote_first = agent.last_session().ok_or("no session")?;
    remote_first.answer_remotely();
    tokio::time::sleep(Duration::from_millis(20)).await;
    println!("🔊 Call to 2001 is {:?}", first.status());

    client.hold(&first).await?;
    println!("⏸️  On hold: {}", first.is_on_hold());
    client.unhold(&first).await?;
    client.send_dtmf(&first, "123#").await?;

    // Second call and a merge
    let second = client.call("2002", false).await?;
    agent.last_session().ok_or("no session")?.answer_remotely();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let admissions = client.merge(&[first.clone(), second.clone()]).await;
    println!("🔀 Merge admissions: {:?}", admissions);
    if let (Some(context), Some(destination)) = (platform.context(), client.mixer().destination()) {
        println!(
            "   Mixer destination {} has {} sources",
            destination.id(),
            context.connected_sources(&destination.id()).len()
        );
    }

    client.unmerge(&[first.clone(), second.clone()]).await;
    println!("↩️  Unmerged; first call on hold: {}", first.is_on_hold());

    client.hangup(&first).await;
    client.hangup(&second).await;
    client.close().await;

    println!("\n✨ Done");
    Ok(())
}
