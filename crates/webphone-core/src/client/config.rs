//! Client configuration
//!
//! [`AgentConfig`] describes one signaling identity: where the signaling
//! server lives, the credentials to register with, and the media toggles
//! used to derive negotiation constraints. It deserializes from the
//! camelCase JSON shape applications already hand to the client:
//!
//! ```rust
//! use webphone_core::client::config::AgentConfig;
//!
//! let config = AgentConfig::from_json(r#"{
//!     "displayName": "Alice",
//!     "host": "sip.example.com",
//!     "authorizationUser": "1001",
//!     "password": "secret",
//!     "media": { "audio": true, "video": false },
//!     "maxMergeSessions": 3
//! }"#).unwrap();
//!
//! assert_eq!(config.resolved_uri(), "sip:1001@sip.example.com");
//! assert_eq!(config.port(), 8089);
//! assert_eq!(config.max_merge_sessions, 3);
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Configuration shared between the facade, the call controller and the
/// registration manager; agents are always built from its current value
pub type SharedConfig = Arc<RwLock<AgentConfig>>;

/// Default websocket port of the signaling server
pub const DEFAULT_WS_PORT: u16 = 8089;

/// Default maximum number of simultaneously merged sessions
pub const DEFAULT_MAX_MERGE_SESSIONS: usize = 4;

/// Default ICE checking timeout in milliseconds
pub const DEFAULT_ICE_CHECKING_TIMEOUT_MS: u64 = 5000;

/// Default ceiling of registration attempts per retry loop
pub const DEFAULT_MAX_REGISTRATION_TRIES: u32 = 200;

/// Media toggles and device selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfig {
    /// Capture and send audio
    pub audio: bool,

    /// Capture and send video
    pub video: bool,

    /// Local preview surface identifier
    #[serde(default)]
    pub local_video: Option<String>,

    /// Selected microphone; platform default when unset
    #[serde(default)]
    pub audio_input_device_id: Option<String>,

    /// Selected camera; platform default when unset
    #[serde(default)]
    pub video_input_device_id: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
            local_video: None,
            audio_input_device_id: None,
            video_input_device_id: None,
        }
    }
}

/// Configuration of one signaling identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default)]
    pub display_name: String,

    /// Signaling server host (name or IP literal)
    pub host: String,

    /// Websocket port, [`DEFAULT_WS_PORT`] when unset
    #[serde(default)]
    pub port: Option<u16>,

    /// Authorization identity; looked up through the application context
    /// when empty
    #[serde(default)]
    pub authorization_user: String,

    #[serde(default)]
    pub password: String,

    /// Explicit address of record; derived from identity and host when unset
    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default = "default_max_merge_sessions")]
    pub max_merge_sessions: usize,

    /// ICE checking timeout in milliseconds
    #[serde(default = "default_ice_checking_timeout", rename = "iceCheckingTimeout")]
    pub ice_checking_timeout_ms: u64,

    #[serde(default)]
    pub audio_output_device_id: Option<String>,

    #[serde(default = "default_max_registration_tries")]
    pub max_registration_tries: u32,
}

fn default_max_merge_sessions() -> usize {
    DEFAULT_MAX_MERGE_SESSIONS
}

fn default_ice_checking_timeout() -> u64 {
    DEFAULT_ICE_CHECKING_TIMEOUT_MS
}

fn default_max_registration_tries() -> u32 {
    DEFAULT_MAX_REGISTRATION_TRIES
}

impl AgentConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            display_name: String::new(),
            host: host.into(),
            port: None,
            authorization_user: String::new(),
            password: String::new(),
            uri: None,
            media: MediaConfig::default(),
            max_merge_sessions: DEFAULT_MAX_MERGE_SESSIONS,
            ice_checking_timeout_ms: DEFAULT_ICE_CHECKING_TIMEOUT_MS,
            audio_output_device_id: None,
            max_registration_tries: DEFAULT_MAX_REGISTRATION_TRIES,
        }
    }

    /// Parse the camelCase JSON configuration
    pub fn from_json(json: &str) -> ClientResult<Self> {
        serde_json::from_str(json).map_err(|e| ClientError::config(format!("invalid agent config: {}", e)))
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials(mut self, authorization_user: impl Into<String>, password: impl Into<String>) -> Self {
        self.authorization_user = authorization_user.into();
        self.password = password.into();
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_media(mut self, media: MediaConfig) -> Self {
        self.media = media;
        self
    }

    pub fn with_max_merge_sessions(mut self, max: usize) -> Self {
        self.max_merge_sessions = max;
        self
    }

    pub fn with_ice_checking_timeout(mut self, timeout: Duration) -> Self {
        self.ice_checking_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_registration_tries(mut self, tries: u32) -> Self {
        self.max_registration_tries = tries;
        self
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_WS_PORT)
    }

    pub fn ice_checking_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_checking_timeout_ms)
    }

    /// Address of record: explicit URI, or `sip:{authorization_user}@{host}`
    pub fn resolved_uri(&self) -> String {
        match &self.uri {
            Some(uri) if !uri.is_empty() => uri.clone(),
            _ => format!("sip:{}@{}", self.authorization_user, self.host),
        }
    }

    /// Whether credentials still need to come from the application context
    pub fn needs_credentials(&self) -> bool {
        self.authorization_user.is_empty() || self.password.is_empty()
    }

    /// Request URI for a dialed number or address
    pub fn target_uri(&self, target: &str) -> String {
        if target.starts_with("sip:") || target.starts_with("sips:") {
            target.to_string()
        } else {
            format!("sip:{}@{}", target, self.host)
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.host.trim().is_empty() {
            return Err(ClientError::config("host must not be empty"));
        }
        if self.port == Some(0) {
            return Err(ClientError::config("port must not be zero"));
        }
        if self.max_merge_sessions == 0 {
            return Err(ClientError::config("maxMergeSessions must be at least 1"));
        }
        if self.max_registration_tries == 0 {
            return Err(ClientError::config("maxRegistrationTries must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_uri_wins() {
        let config = AgentConfig::new("pbx.example.com")
            .with_credentials("1001", "pw")
            .with_uri("sip:alice@example.com");
        assert_eq!(config.resolved_uri(), "sip:alice@example.com");
    }

    #[test]
    fn defaults_apply_to_sparse_json() {
        let config = AgentConfig::from_json(r#"{"host": "10.0.0.2"}"#).unwrap();
        assert_eq!(config.max_merge_sessions, DEFAULT_MAX_MERGE_SESSIONS);
        assert_eq!(config.ice_checking_timeout(), Duration::from_millis(5000));
        assert_eq!(config.max_registration_tries, 200);
        assert!(config.media.audio);
        assert!(!config.media.video);
        assert!(config.needs_credentials());
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let config = AgentConfig::from_json(
            r#"{
                "host": "sip.example.com",
                "port": 7443,
                "authorizationUser": "1002",
                "password": "pw",
                "media": {"audio": true, "video": true, "localVideo": "preview"},
                "iceCheckingTimeout": 750,
                "audioOutputDeviceId": "speaker-1"
            }"#,
        )
        .unwrap();
        assert_eq!(config.port(), 7443);
        assert_eq!(config.ice_checking_timeout_ms, 750);
        assert_eq!(config.media.local_video.as_deref(), Some("preview"));
        assert_eq!(config.audio_output_device_id.as_deref(), Some("speaker-1"));
    }

    #[test]
    fn oversized_ice_timeout_saturates() {
        let config = AgentConfig::new("h").with_ice_checking_timeout(Duration::MAX);
        assert_eq!(config.ice_checking_timeout_ms, u64::MAX);
        let config = AgentConfig::new("h").with_ice_checking_timeout(Duration::from_millis(1200));
        assert_eq!(config.ice_checking_timeout_ms, 1200);
    }

    #[test]
    fn validation_rejects_unusable_configs() {
        assert!(AgentConfig::new("").validate().is_err());
        assert!(AgentConfig::new("h").with_port(0).validate().is_err());
        assert!(AgentConfig::new("h").with_max_merge_sessions(0).validate().is_err());
        assert!(AgentConfig::new("h").validate().is_ok());
        assert!(AgentConfig::from_json("not json").is_err());
    }

    #[test]
    fn dialed_numbers_become_uris() {
        let config = AgentConfig::new("pbx.local");
        assert_eq!(config.target_uri("2002"), "sip:2002@pbx.local");
        assert_eq!(config.target_uri("sip:bob@example.com"), "sip:bob@example.com");
    }
}
