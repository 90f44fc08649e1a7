//! Call control against the loopback signaling stack

mod common;

use std::time::Duration;

use webphone_core::loopback::{RegisterBehavior, SessionOp};
use webphone_core::{ClientError, ClientEvent, SessionHandle, SessionId, SessionStatus, TrackKind};

use common::{client_with, config, registered_client, settle, HOST};

#[tokio::test]
async fn calling_before_start_has_no_agent() {
    let fixture = client_with(config(), RegisterBehavior::Accept).await;
    let err = fixture.client.call("2002", false).await.unwrap_err();
    assert!(matches!(err, ClientError::NoAgent));
}

#[tokio::test]
async fn outbound_call_is_tracked_once_answered() {
    let fixture = registered_client(config()).await;
    let mut events = fixture.client.event_stream();

    let session = fixture.client.call("2002", true).await.unwrap();
    let remote = fixture.last_session();
    assert_eq!(session.remote_uri(), format!("sip:2002@{}", HOST));
    let id = SessionId::of(session.as_ref());
    assert!(!fixture.client.media().is_tracked(&id));

    remote.answer_remotely();
    settle().await;

    assert!(fixture.client.has_local_video(&id));
    assert!(!fixture.client.has_remote_video(&id));
    assert_eq!(fixture.client.remote_streams(&id).len(), 1);

    let mut accepted = false;
    while let Ok((_, event)) = events.try_recv() {
        if let ClientEvent::Accepted { session } = event {
            accepted = SessionId::of(session.as_ref()) == id;
        }
    }
    assert!(accepted);
}

#[tokio::test]
async fn hangup_of_confirmed_call_sends_bye_once() {
    let fixture = registered_client(config()).await;
    let (session, remote) = fixture.answered_call("2002").await;
    let id = SessionId::of(session.as_ref());
    let local = fixture.client.media().local_stream(&id).unwrap();

    fixture.client.hangup(&session).await;
    fixture.client.hangup(&session).await;
    settle().await;

    assert_eq!(remote.count_ops(&SessionOp::Bye), 1);
    assert_eq!(session.status(), SessionStatus::Terminated);
    assert!(!fixture.client.media().is_tracked(&id));
    assert!(local.tracks().iter().all(|track| !track.is_live()));
}

#[tokio::test]
async fn hangup_of_ringing_calls_cancels_or_rejects() {
    let fixture = registered_client(config()).await;

    let outbound = fixture.client.call("2002", false).await.unwrap();
    fixture.client.hangup(&outbound).await;
    assert_eq!(fixture.last_session().ops(), vec![SessionOp::Cancel]);
    assert_eq!(outbound.status(), SessionStatus::Canceled);

    let agent = fixture.stack.last_agent().unwrap();
    let inbound = agent.deliver_invite("sip:3003@pbx.example.com", false, &[]);
    settle().await;
    let handle: SessionHandle = inbound.clone();
    fixture.client.hangup(&handle).await;
    assert_eq!(inbound.ops(), vec![SessionOp::Reject]);
}

#[tokio::test]
async fn hangup_swallows_signaling_errors() {
    let fixture = registered_client(config()).await;
    let (session, remote) = fixture.answered_call("2002").await;
    remote.fail_operation("bye");

    fixture.client.hangup(&session).await;

    assert!(remote.ops().iter().all(|op| *op != SessionOp::Bye));
    assert!(!fixture.client.media().is_tracked(&SessionId::of(session.as_ref())));
}

#[tokio::test]
async fn inbound_invite_reports_video_and_auto_answer() {
    let fixture = registered_client(config()).await;
    let mut events = fixture.client.event_stream();
    let agent = fixture.stack.last_agent().unwrap();

    let inbound = agent.deliver_invite("sip:door@pbx.example.com", true, &[("Call-Info", "<sip:pbx>;answer-after=0")]);
    settle().await;

    let mut invite = None;
    while let Ok((_, event)) = events.try_recv() {
        if let ClientEvent::Invite {
            session,
            has_video,
            should_auto_answer,
        } = event
        {
            invite = Some((session, has_video, should_auto_answer));
        }
    }
    let (session, has_video, auto_answer) = invite.expect("invite event");
    assert!(has_video);
    assert!(auto_answer);

    fixture.client.answer(&session, true).await.unwrap();
    settle().await;
    let id = SessionId::of(session.as_ref());
    assert_eq!(inbound.ops(), vec![SessionOp::Accept]);
    assert!(fixture.client.has_remote_video(&id));
    assert!(fixture.client.has_local_video(&id));
}

#[tokio::test]
async fn reject_declines_inbound_call() {
    let fixture = registered_client(config()).await;
    let inbound = fixture.stack.last_agent().unwrap().deliver_invite("sip:spam@pbx", false, &[]);
    let handle: SessionHandle = inbound.clone();
    fixture.client.reject(&handle).await.unwrap();
    assert_eq!(inbound.ops(), vec![SessionOp::Reject]);
}

#[tokio::test]
async fn hold_and_mute_toggle_local_audio() {
    let fixture = registered_client(config()).await;
    let (session, remote) = fixture.answered_call("2002").await;
    let local = fixture.client.media().local_stream(&SessionId::of(session.as_ref())).unwrap();
    let audio_enabled = || local.tracks_of(TrackKind::Audio).all(|t| t.is_enabled());

    fixture.client.hold(&session).await.unwrap();
    assert!(!audio_enabled());
    assert!(session.is_on_hold());

    fixture.client.unhold(&session).await.unwrap();
    assert!(audio_enabled());
    assert_eq!(remote.ops(), vec![SessionOp::Hold, SessionOp::Unhold]);

    fixture.client.mute(&session);
    assert!(!audio_enabled());
    fixture.client.unmute(&session);
    assert!(audio_enabled());
}

#[tokio::test]
async fn camera_toggles_are_inverted() {
    let fixture = registered_client(config()).await;
    let session = fixture.client.call("2002", true).await.unwrap();
    fixture.last_session().answer_remotely();
    settle().await;
    let local = fixture.client.media().local_stream(&SessionId::of(session.as_ref())).unwrap();
    let video_enabled = || local.tracks_of(TrackKind::Video).all(|t| t.is_enabled());

    fixture.client.toggle_camera_on(&session);
    assert!(!video_enabled());
    fixture.client.toggle_camera_off(&session);
    assert!(video_enabled());
}

#[tokio::test]
async fn dtmf_is_validated() {
    let fixture = registered_client(config()).await;
    let (session, remote) = fixture.answered_call("2002").await;

    fixture.client.send_dtmf(&session, "12#").await.unwrap();
    let err = fixture.client.send_dtmf(&session, "9x").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidDtmf { .. }));
    assert_eq!(remote.ops(), vec![SessionOp::Dtmf("12#".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn blind_transfer_holds_refers_and_hangs_up() {
    let fixture = registered_client(config()).await;
    let (session, remote) = fixture.answered_call("2002").await;

    let started = tokio::time::Instant::now();
    fixture.client.transfer(&session, "3003").await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(
        remote.ops(),
        vec![
            SessionOp::Hold,
            SessionOp::Refer(format!("sip:3003@{}", HOST)),
            SessionOp::Bye,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_refer_keeps_the_call() {
    let fixture = registered_client(config()).await;
    let (session, remote) = fixture.answered_call("2002").await;
    remote.fail_operation("refer");

    assert!(fixture.client.transfer(&session, "3003").await.is_err());
    assert_eq!(remote.ops(), vec![SessionOp::Hold]);
    assert_eq!(session.status(), SessionStatus::Confirmed);
}

#[tokio::test]
async fn remote_hangup_releases_media() {
    let fixture = registered_client(config()).await;
    let (session, remote) = fixture.answered_call("2002").await;
    let id = SessionId::of(session.as_ref());
    assert!(fixture.client.media().is_tracked(&id));

    remote.end_remotely();
    settle().await;

    assert!(!fixture.client.media().is_tracked(&id));
    assert!(fixture.client.calls().session(&id).is_none());
}

#[tokio::test]
async fn close_hangs_up_and_rejects_new_calls() {
    let fixture = registered_client(config()).await;
    let (_session, remote) = fixture.answered_call("2002").await;

    fixture.client.close().await;

    assert_eq!(remote.count_ops(&SessionOp::Bye), 1);
    assert!(fixture.client.media().tracked_sessions().is_empty());
    let err = fixture.client.call("2002", false).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}
