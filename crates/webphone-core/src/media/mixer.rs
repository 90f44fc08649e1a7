//! Audio mixer
//!
//! Merged calls share one mixer destination. The destination is ephemeral:
//! created when the first source is bound, rebuilt from the remaining sources
//! whenever a session leaves the merge, and discarded on full unmerge. The
//! audio graph is not assumed to support detaching a single source in place.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::media::platform::{AudioContext, AudioSourceNode, MediaPlatform, MixerDestination};
use crate::media::stream::MediaStream;

#[derive(Debug, Default)]
enum ContextState {
    #[default]
    Uninitialized,
    Unavailable,
    Ready(Arc<dyn AudioContext>),
}

/// Shared mixer destination over a lazily created audio context
#[derive(Debug)]
pub struct AudioMixer {
    platform: Arc<dyn MediaPlatform>,
    context: Mutex<ContextState>,
    destination: Mutex<Option<Arc<dyn MixerDestination>>>,
}

impl AudioMixer {
    pub fn new(platform: Arc<dyn MediaPlatform>) -> Self {
        Self {
            platform,
            context: Mutex::new(ContextState::Uninitialized),
            destination: Mutex::new(None),
        }
    }

    /// The audio context, created on first use
    pub fn context(&self) -> Option<Arc<dyn AudioContext>> {
        let mut state = self.context.lock();
        if let ContextState::Uninitialized = *state {
            *state = match self.platform.create_audio_context() {
                Some(context) => {
                    debug!("Created audio context for {:?} platform", self.platform.kind());
                    ContextState::Ready(context)
                }
                None => {
                    debug!("No audio context on {:?} platform", self.platform.kind());
                    ContextState::Unavailable
                }
            };
        }
        match &*state {
            ContextState::Ready(context) => Some(context.clone()),
            _ => None,
        }
    }

    /// Current destination, if a merge is active
    pub fn destination(&self) -> Option<Arc<dyn MixerDestination>> {
        self.destination.lock().clone()
    }

    /// Current destination, creating one if none exists
    pub fn ensure_destination(&self) -> Option<Arc<dyn MixerDestination>> {
        let context = self.context()?;
        let mut destination = self.destination.lock();
        if destination.is_none() {
            let created = context.create_destination();
            debug!("Created mixer destination {}", created.id());
            *destination = Some(created);
        }
        destination.clone()
    }

    /// Mixed output stream of the current destination
    pub fn mixed_stream(&self) -> Option<MediaStream> {
        self.destination().map(|d| d.stream())
    }

    /// Wrap a stream as a source connected to the current destination
    ///
    /// Returns `None` without an audio context or without a stream.
    pub fn create_source(&self, stream: Option<&MediaStream>) -> Option<Arc<dyn AudioSourceNode>> {
        let stream = stream?;
        let context = self.context()?;
        let destination = self.ensure_destination()?;
        let source = context.create_source(stream);
        source.connect(&destination);
        Some(source)
    }

    /// Replace the destination with a fresh one fed by `sources`
    pub fn rebuild<'a, I>(&self, sources: I) -> Option<Arc<dyn MixerDestination>>
    where
        I: IntoIterator<Item = &'a Arc<dyn AudioSourceNode>>,
    {
        let context = self.context()?;
        let fresh = context.create_destination();
        let previous = self.destination.lock().replace(fresh.clone());
        for source in sources {
            source.disconnect();
            source.connect(&fresh);
        }
        debug!(
            "Rebuilt mixer destination {} (was {:?})",
            fresh.id(),
            previous.map(|d| d.id())
        );
        Some(fresh)
    }

    /// Discard the destination
    pub fn clear(&self) {
        if let Some(previous) = self.destination.lock().take() {
            debug!("Cleared mixer destination {}", previous.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackPlatform;
    use crate::media::platform::PlatformKind;
    use crate::media::stream::{MediaTrack, TrackKind};

    fn stream() -> MediaStream {
        MediaStream::new(vec![MediaTrack::new(TrackKind::Audio)])
    }

    #[test]
    fn native_platform_has_no_sources() {
        let mixer = AudioMixer::new(Arc::new(LoopbackPlatform::new(PlatformKind::Native)));
        assert!(mixer.context().is_none());
        assert!(mixer.create_source(Some(&stream())).is_none());
        assert!(mixer.destination().is_none());
    }

    #[test]
    fn missing_stream_yields_no_source() {
        let mixer = AudioMixer::new(Arc::new(LoopbackPlatform::browser()));
        assert!(mixer.create_source(None).is_none());
        assert!(mixer.destination().is_none());
    }

    #[test]
    fn context_is_created_once() {
        let platform = Arc::new(LoopbackPlatform::browser());
        let mixer = AudioMixer::new(platform.clone());
        mixer.context();
        mixer.context();
        assert_eq!(platform.contexts_created(), 1);
    }

    #[test]
    fn rebuild_moves_remaining_sources_to_fresh_destination() {
        let platform = Arc::new(LoopbackPlatform::browser());
        let mixer = AudioMixer::new(platform.clone());
        let a = mixer.create_source(Some(&stream())).unwrap();
        let b = mixer.create_source(Some(&stream())).unwrap();
        let first = mixer.destination().unwrap();

        b.disconnect();
        let fresh = mixer.rebuild([&a]).unwrap();

        assert_ne!(first.id(), fresh.id());
        let context = platform.context().unwrap();
        assert_eq!(context.connected_sources(&fresh.id()), vec![a.id()]);
        assert!(context.connected_sources(&first.id()).is_empty());

        mixer.clear();
        assert!(mixer.destination().is_none());
    }
}
