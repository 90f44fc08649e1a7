//! Bridging of signaling events into client events
//!
//! Inbound invites arrive as raw [`SessionHandle`]s. Before they reach the
//! application they are enriched with what the UI needs to decide how to
//! ring: whether the offer carries video and whether the caller asked for
//! the call to be answered automatically (intercom and paging calls).

use tracing::debug;

use crate::events::ClientEvent;
use crate::signaling::{SessionHandle, SessionId, SignalingSession};

/// Whether the initial request asks to be answered automatically
///
/// Recognized markers:
///
/// - `Call-Info: <...>;answer-after=0`
/// - `Alert-Info: <...>;info=alert-autoanswer`, or any `Alert-Info` value
///   mentioning `auto-answer` / `autoanswer`
///
/// # Examples
///
/// ```rust
/// use webphone_core::client::events::should_auto_answer;
/// use webphone_core::loopback::LoopbackSession;
///
/// let paging = LoopbackSession::inbound("sip:door@pbx", false, &[("Call-Info", "<sip:pbx>;answer-after=0")]);
/// assert!(should_auto_answer(&paging));
///
/// let plain = LoopbackSession::inbound("sip:bob@pbx", false, &[]);
/// assert!(!should_auto_answer(&plain));
/// ```
pub fn should_auto_answer(session: &dyn SignalingSession) -> bool {
    let call_info = session
        .request_header("Call-Info")
        .map(|value| value.to_ascii_lowercase().replace(' ', ""))
        .unwrap_or_default();
    if call_info.split(';').any(|param| param == "answer-after=0") {
        return true;
    }

    session
        .request_header("Alert-Info")
        .map(|value| {
            let value = value.to_ascii_lowercase();
            value.contains("auto-answer") || value.contains("autoanswer")
        })
        .unwrap_or(false)
}

/// Client event announcing an inbound session
pub(crate) fn invite_event(session: SessionHandle) -> ClientEvent {
    let has_video = session.remote_offers_video();
    let should_auto_answer = should_auto_answer(session.as_ref());
    debug!(
        "Inbound session {} from {} (video: {}, auto-answer: {})",
        SessionId::of(session.as_ref()),
        session.remote_uri(),
        has_video,
        should_auto_answer
    );
    ClientEvent::Invite {
        session,
        has_video,
        should_auto_answer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackSession;
    use std::sync::Arc;

    #[test]
    fn answer_after_must_be_zero() {
        let delayed = LoopbackSession::inbound("sip:a@pbx", false, &[("Call-Info", "<sip:pbx>; answer-after=5")]);
        assert!(!should_auto_answer(&delayed));
        let immediate = LoopbackSession::inbound("sip:a@pbx", false, &[("call-info", "<sip:pbx>; Answer-After=0")]);
        assert!(should_auto_answer(&immediate));
    }

    #[test]
    fn alert_info_auto_answer() {
        let session = LoopbackSession::inbound("sip:a@pbx", false, &[("Alert-Info", "<http://pbx>;info=alert-autoanswer")]);
        assert!(should_auto_answer(&session));
        let ring = LoopbackSession::inbound("sip:a@pbx", false, &[("Alert-Info", "<http://pbx>;info=ring2")]);
        assert!(!should_auto_answer(&ring));
    }

    #[test]
    fn invite_event_carries_video_flag() {
        let session: SessionHandle = Arc::new(LoopbackSession::inbound("sip:cam@pbx", true, &[]));
        match invite_event(session) {
            ClientEvent::Invite { has_video, should_auto_answer, .. } => {
                assert!(has_video);
                assert!(!should_auto_answer);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
