//! Client builder
//!
//! Fluent construction of a [`WebRtcClient`]. A signaling stack and an
//! [`AgentConfig`] are required; the media platform defaults to
//! [`HeadlessPlatform`] (no audio graph, merges are bookkeeping only).
//! Configs without credentials can be completed through an [`AppContext`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use webphone_core::loopback::{LoopbackPlatform, LoopbackStack, RegisterBehavior};
//! use webphone_core::{AgentConfig, WebRtcClientBuilder};
//!
//! # tokio_test::block_on(async {
//! let client = WebRtcClientBuilder::new()
//!     .config(AgentConfig::new("pbx.example.com").with_credentials("1001", "secret"))
//!     .signaling(Arc::new(LoopbackStack::new(RegisterBehavior::Accept)))
//!     .platform(Arc::new(LoopbackPlatform::browser()))
//!     .build()
//!     .await
//!     .expect("Failed to build client");
//! assert!(!client.is_registered());
//! # })
//! ```

use std::sync::Arc;

use crate::client::config::{AgentConfig, MediaConfig};
use crate::client::manager::WebRtcClient;
use crate::credentials::AppContext;
use crate::error::{ClientError, ClientResult};
use crate::media::{HeadlessPlatform, MediaPlatform};
use crate::signaling::SignalingStack;

#[derive(Debug)]
struct CredentialSource {
    context: AppContext,
    user_id: String,
    line_id: String,
}

/// Fluent builder for [`WebRtcClient`]
#[derive(Debug, Default)]
pub struct WebRtcClientBuilder {
    config: Option<AgentConfig>,
    stack: Option<Arc<dyn SignalingStack>>,
    platform: Option<Arc<dyn MediaPlatform>>,
    credentials: Option<CredentialSource>,
}

impl WebRtcClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Parse the camelCase JSON configuration
    pub fn config_json(mut self, json: &str) -> ClientResult<Self> {
        self.config = Some(AgentConfig::from_json(json)?);
        Ok(self)
    }

    /// Replace the media toggles of the configuration
    ///
    /// Must come after [`Self::config`].
    pub fn media(mut self, media: MediaConfig) -> Self {
        if let Some(config) = self.config.as_mut() {
            config.media = media;
        }
        self
    }

    pub fn signaling(mut self, stack: Arc<dyn SignalingStack>) -> Self {
        self.stack = Some(stack);
        self
    }

    pub fn platform(mut self, platform: Arc<dyn MediaPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Resolve missing credentials for `line_id` of `user_id` at build time
    pub fn credentials(mut self, context: AppContext, user_id: impl Into<String>, line_id: impl Into<String>) -> Self {
        self.credentials = Some(CredentialSource {
            context,
            user_id: user_id.into(),
            line_id: line_id.into(),
        });
        self
    }

    /// Build the client
    ///
    /// The client is not started; call [`WebRtcClient::start`] to register.
    ///
    /// # Errors
    ///
    /// * [`ClientError::Configuration`] - missing config or signaling stack, or an unusable config
    /// * [`ClientError::CredentialLookup`] - the application context could not provide credentials
    pub async fn build(self) -> ClientResult<Arc<WebRtcClient>> {
        let stack = self
            .stack
            .ok_or_else(|| ClientError::config("a signaling stack is required"))?;
        let mut config = self
            .config
            .ok_or_else(|| ClientError::config("an agent configuration is required"))?;
        if let Some(source) = self.credentials {
            config = source.context.populate(config, &source.user_id, &source.line_id).await?;
        }
        let platform = self
            .platform
            .unwrap_or_else(|| Arc::new(HeadlessPlatform) as Arc<dyn MediaPlatform>);

        tracing::info!(
            "Building client for {} on {:?} platform",
            config.resolved_uri(),
            platform.kind()
        );
        WebRtcClient::new(config, stack, platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackStack, RegisterBehavior};

    #[tokio::test]
    async fn missing_stack_is_a_configuration_error() {
        let err = WebRtcClientBuilder::new()
            .config(AgentConfig::new("pbx"))
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Configuration { .. }));
    }

    #[tokio::test]
    async fn invalid_config_fails_at_build() {
        let err = WebRtcClientBuilder::new()
            .config(AgentConfig::new(" "))
            .signaling(Arc::new(LoopbackStack::new(RegisterBehavior::Accept)))
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[tokio::test]
    async fn media_overrides_config_toggles() {
        let client = WebRtcClientBuilder::new()
            .config_json(r#"{"host": "pbx", "authorizationUser": "1", "password": "p"}"#)
            .unwrap()
            .media(MediaConfig {
                video: true,
                ..Default::default()
            })
            .signaling(Arc::new(LoopbackStack::new(RegisterBehavior::Accept)))
            .build()
            .await
            .unwrap();
        assert!(client.config().media.video);
    }
}
