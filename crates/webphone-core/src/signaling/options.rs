//! Translation of client configuration into signaling library options
//!
//! Everything the signaling library needs to build a user agent is derived
//! here from an [`AgentConfig`]: the websocket endpoint, media constraints,
//! ICE servers and the session handling strategy of the host platform.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::config::{AgentConfig, MediaConfig};
use crate::error::{ClientError, ClientResult};
use crate::media::platform::PlatformKind;
use crate::media::stream::MediaStream;

/// Public STUN servers offered to agents on non-private hosts
pub const PUBLIC_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
}

/// Constraint for one capture device kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceConstraint {
    /// Do not capture this kind
    Disabled,
    /// Capture from the platform default device
    Any,
    /// Capture from the given device id
    Exact(String),
}

impl DeviceConstraint {
    fn from_toggle(enabled: bool, device_id: Option<&str>) -> Self {
        match (enabled, device_id) {
            (false, _) => Self::Disabled,
            (true, Some(id)) if !id.is_empty() => Self::Exact(id.to_string()),
            (true, _) => Self::Any,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// Media capture constraints for negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: DeviceConstraint,
    pub video: DeviceConstraint,
}

impl MediaConstraints {
    /// Constraints from the current audio/video toggles and selected devices
    pub fn from_media(media: &MediaConfig) -> Self {
        Self {
            audio: DeviceConstraint::from_toggle(media.audio, media.audio_input_device_id.as_deref()),
            video: DeviceConstraint::from_toggle(media.video, media.video_input_device_id.as_deref()),
        }
    }

    pub fn wants_video(&self) -> bool {
        self.video.is_enabled()
    }
}

/// How the signaling library should handle session descriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionHandlerStrategy {
    /// Browser peer connection handling
    Browser,
    /// Native host handling (substituted outside browsers)
    Native,
}

impl From<PlatformKind> for SessionHandlerStrategy {
    fn from(kind: PlatformKind) -> Self {
        match kind {
            PlatformKind::Browser => Self::Browser,
            PlatformKind::Native => Self::Native,
        }
    }
}

/// Transport options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Websocket endpoint of the signaling server
    pub server: Url,
}

/// Options handed to [`SignalingStack::create_agent`](crate::signaling::SignalingStack::create_agent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOptions {
    pub uri: String,
    pub display_name: String,
    pub authorization_user: String,
    pub password: String,
    pub transport: TransportOptions,
    pub media: MediaConstraints,
    pub ice_servers: Vec<IceServer>,
    pub ice_checking_timeout: Duration,
    pub session_handler: SessionHandlerStrategy,
    /// Local preview surface, passed through untouched
    pub local_video: Option<String>,
}

impl AgentOptions {
    pub fn from_config(config: &AgentConfig, platform: PlatformKind) -> ClientResult<Self> {
        config.validate()?;
        Ok(Self {
            uri: config.resolved_uri(),
            display_name: config.display_name.clone(),
            authorization_user: config.authorization_user.clone(),
            password: config.password.clone(),
            transport: TransportOptions {
                server: websocket_url(&config.host, config.port())?,
            },
            media: MediaConstraints::from_media(&config.media),
            ice_servers: ice_servers_for(&config.host),
            ice_checking_timeout: config.ice_checking_timeout(),
            session_handler: platform.into(),
            local_video: config.media.local_video.clone(),
        })
    }
}

/// Per-negotiation options (invite, accept, hold, unhold, renegotiate)
#[derive(Debug, Clone)]
pub struct SessionDescriptionOptions {
    pub constraints: MediaConstraints,
    pub ice_checking_timeout: Duration,
    /// Stream to send instead of a fresh capture (merged audio)
    pub outgoing_stream: Option<MediaStream>,
}

impl SessionDescriptionOptions {
    pub fn new(constraints: MediaConstraints, ice_checking_timeout: Duration) -> Self {
        Self {
            constraints,
            ice_checking_timeout,
            outgoing_stream: None,
        }
    }

    pub fn with_outgoing_stream(mut self, stream: MediaStream) -> Self {
        self.outgoing_stream = Some(stream);
        self
    }
}

/// Websocket endpoint templated from host and port
pub fn websocket_url(host: &str, port: u16) -> ClientResult<Url> {
    let host = match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
        _ => host.to_string(),
    };
    Url::parse(&format!("wss://{}:{}/ws", host, port))
        .map_err(|e| ClientError::config(format!("invalid signaling host {}: {}", host, e)))
}

/// ICE servers for a signaling host; none on private networks
pub fn ice_servers_for(host: &str) -> Vec<IceServer> {
    if is_private_host(host) {
        Vec::new()
    } else {
        vec![IceServer {
            urls: PUBLIC_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
        }]
    }
}

/// Whether a host lives on a private or internal network
pub fn is_private_host(host: &str) -> bool {
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, ..] = v4.octets();
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                // 100.64.0.0/10 shared address space
                || (a == 100 && (64..128).contains(&b))
        }
        Ok(IpAddr::V6(v6)) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
        Err(_) => {
            let name = trimmed.to_ascii_lowercase();
            name == "localhost"
                || !name.contains('.')
                || [".localhost", ".local", ".lan", ".internal", ".home.arpa"]
                    .iter()
                    .any(|suffix| name.ends_with(suffix))
        }
    }
}
