//! Conference merge through the loopback audio graph

mod common;

use webphone_core::loopback::SessionOp;
use webphone_core::{MergeAdmission, SessionHandle, SessionId};

use common::{config, registered_client, settle, Fixture};

fn renegotiated_with(ops: &[SessionOp], stream_id: &str) -> bool {
    ops.iter().any(|op| {
        matches!(op, SessionOp::Renegotiate { outgoing_stream: Some(id) } if id == stream_id)
    })
}

/// Outgoing stream of the most recent renegotiation
fn last_outgoing(ops: &[SessionOp]) -> Option<String> {
    ops.iter().rev().find_map(|op| match op {
        SessionOp::Renegotiate { outgoing_stream } => outgoing_stream.clone(),
        _ => None,
    })
}

fn own_capture(fixture: &Fixture, session: &SessionHandle) -> String {
    fixture
        .client
        .media()
        .local_stream(&SessionId::of(session.as_ref()))
        .expect("local capture tracked")
        .id()
        .to_string()
}

#[tokio::test]
async fn merged_calls_share_one_destination() {
    let fixture = registered_client(config()).await;
    let (a, remote_a) = fixture.answered_call("2001").await;
    let (b, remote_b) = fixture.answered_call("2002").await;

    let admissions = fixture.client.merge(&[a.clone(), b.clone()]).await;
    assert_eq!(admissions, vec![MergeAdmission::Admitted, MergeAdmission::Admitted]);

    let destination = fixture.client.mixer().destination().expect("mixer destination");
    let context = fixture.platform.context().unwrap();
    // local capture and remote audio of both calls
    assert_eq!(context.connected_sources(&destination.id()).len(), 4);

    let mixed = destination.stream();
    assert!(renegotiated_with(&remote_a.ops(), mixed.id()));
    assert!(renegotiated_with(&remote_b.ops(), mixed.id()));
    assert_eq!(
        fixture.client.calls().merged_sessions().len(),
        2,
    );
    assert_eq!(
        fixture.client.add_to_merge(&a).await,
        MergeAdmission::AlreadyMerged
    );
}

#[tokio::test]
async fn merge_above_maximum_still_admits() {
    let fixture = registered_client(config().with_max_merge_sessions(2)).await;
    let (a, _) = fixture.answered_call("2001").await;
    let (b, _) = fixture.answered_call("2002").await;
    let (c, _) = fixture.answered_call("2003").await;

    let admissions = fixture.client.merge(&[a, b, c.clone()]).await;

    assert_eq!(admissions[2], MergeAdmission::OverCapacity { active: 2, max: 2 });
    assert!(fixture.client.calls().is_merged(&SessionId::of(c.as_ref())));
    assert_eq!(fixture.client.calls().merged_sessions().len(), 3);
}

#[tokio::test]
async fn removal_rebuilds_destination_from_the_rest() {
    let fixture = registered_client(config()).await;
    let (a, remote_a) = fixture.answered_call("2001").await;
    let (b, remote_b) = fixture.answered_call("2002").await;
    let (c, _) = fixture.answered_call("2003").await;
    fixture.client.merge(&[a.clone(), b.clone(), c.clone()]).await;
    let before = fixture.client.mixer().destination().unwrap();
    let context = fixture.platform.context().unwrap();
    assert_eq!(context.connected_sources(&before.id()).len(), 6);

    fixture.client.remove_from_merge(&b, true).await;

    let after = fixture.client.mixer().destination().unwrap();
    assert_ne!(before.id(), after.id());
    assert!(context.connected_sources(&before.id()).is_empty());
    assert_eq!(context.connected_sources(&after.id()).len(), 4);
    assert!(!fixture.client.calls().is_merged(&SessionId::of(b.as_ref())));
    assert!(renegotiated_with(&remote_a.ops(), after.stream().id()));

    // b gets its own microphone back and goes on hold
    let own = fixture.client.media().local_stream(&SessionId::of(b.as_ref())).unwrap();
    let ops = remote_b.ops();
    assert!(renegotiated_with(&ops, own.id()));
    assert_eq!(ops.last(), Some(&SessionOp::Hold));
}

#[tokio::test]
async fn unmerge_holds_all_but_the_last() {
    let fixture = registered_client(config()).await;
    let (a, remote_a) = fixture.answered_call("2001").await;
    let (b, remote_b) = fixture.answered_call("2002").await;
    fixture.client.merge(&[a.clone(), b.clone()]).await;

    fixture.client.unmerge(&[a, b]).await;

    assert!(fixture.client.calls().merged_sessions().is_empty());
    assert!(fixture.client.mixer().destination().is_none());
    assert_eq!(remote_a.count_ops(&SessionOp::Hold), 1);
    assert_eq!(remote_b.count_ops(&SessionOp::Hold), 0);
}

#[tokio::test]
async fn held_session_binds_after_tracks_return() {
    let fixture = registered_client(config()).await;
    let (a, _) = fixture.answered_call("2001").await;
    let (held, remote_held) = fixture.answered_call("2002").await;
    fixture.client.hold(&held).await.unwrap();
    fixture.client.add_to_merge(&a).await;

    fixture.client.add_to_merge(&held).await;
    settle().await;

    assert!(!held.is_on_hold());
    assert!(remote_held.ops().contains(&SessionOp::Unhold));
    let destination = fixture.client.mixer().destination().unwrap();
    assert!(renegotiated_with(&remote_held.ops(), destination.stream().id()));
    let context = fixture.platform.context().unwrap();
    assert_eq!(context.connected_sources(&destination.id()).len(), 4);
}

#[tokio::test]
async fn merged_session_leaves_on_hangup_and_remote_end() {
    let fixture = registered_client(config()).await;
    let (a, _) = fixture.answered_call("2001").await;
    let (b, _) = fixture.answered_call("2002").await;
    let (c, remote_c) = fixture.answered_call("2003").await;
    fixture.client.merge(&[a.clone(), b.clone(), c.clone()]).await;

    fixture.client.hangup(&a).await;
    assert!(!fixture.client.calls().is_merged(&SessionId::of(a.as_ref())));

    remote_c.end_remotely();
    settle().await;
    assert_eq!(fixture.client.calls().merged_sessions(), vec![SessionId::of(b.as_ref())]);
    let context = fixture.platform.context().unwrap();
    let destination = fixture.client.mixer().destination().unwrap();
    assert_eq!(context.connected_sources(&destination.id()).len(), 2);
}

#[tokio::test]
async fn unmerge_with_slow_renegotiation_restores_own_capture() {
    let fixture = registered_client(config()).await;
    let (a, remote_a) = fixture.answered_call("2001").await;
    let (b, remote_b) = fixture.answered_call("2002").await;
    let (c, remote_c) = fixture.answered_call("2003").await;
    fixture.client.merge(&[a.clone(), b.clone(), c.clone()]).await;
    for remote in [&remote_a, &remote_b, &remote_c] {
        remote.delay_renegotiation(3);
    }

    fixture.client.unmerge(&[a.clone(), b.clone(), c.clone()]).await;

    assert!(fixture.client.mixer().destination().is_none());
    assert!(fixture.client.calls().merged_sessions().is_empty());
    assert_eq!(last_outgoing(&remote_a.ops()), Some(own_capture(&fixture, &a)));
    assert_eq!(last_outgoing(&remote_b.ops()), Some(own_capture(&fixture, &b)));
    assert_eq!(last_outgoing(&remote_c.ops()), Some(own_capture(&fixture, &c)));
    assert_eq!(remote_a.ops().last(), Some(&SessionOp::Hold));
    assert_eq!(remote_b.ops().last(), Some(&SessionOp::Hold));
    assert_eq!(remote_c.count_ops(&SessionOp::Hold), 0);
}

#[tokio::test]
async fn concurrent_removals_leave_the_rest_on_the_live_destination() {
    let fixture = registered_client(config()).await;
    let (a, remote_a) = fixture.answered_call("2001").await;
    let (b, remote_b) = fixture.answered_call("2002").await;
    let (c, remote_c) = fixture.answered_call("2003").await;
    let (d, remote_d) = fixture.answered_call("2004").await;
    fixture.client.merge(&[a.clone(), b.clone(), c.clone(), d.clone()]).await;
    for remote in [&remote_a, &remote_b, &remote_c, &remote_d] {
        remote.delay_renegotiation(3);
    }

    tokio::join!(
        fixture.client.remove_from_merge(&a, false),
        fixture.client.remove_from_merge(&b, false),
    );

    let destination = fixture.client.mixer().destination().expect("destination for c and d");
    let live = destination.stream().id().to_string();
    assert_eq!(last_outgoing(&remote_c.ops()), Some(live.clone()));
    assert_eq!(last_outgoing(&remote_d.ops()), Some(live));
    assert_eq!(last_outgoing(&remote_a.ops()), Some(own_capture(&fixture, &a)));
    assert_eq!(last_outgoing(&remote_b.ops()), Some(own_capture(&fixture, &b)));
    let context = fixture.platform.context().unwrap();
    assert_eq!(context.connected_sources(&destination.id()).len(), 4);
}

#[tokio::test]
async fn reannounced_stream_adds_no_second_source() {
    let fixture = registered_client(config()).await;
    let (a, remote_a) = fixture.answered_call("2001").await;
    let (b, _) = fixture.answered_call("2002").await;
    fixture.client.merge(&[a.clone(), b.clone()]).await;

    let announced = a.remote_stream().expect("remote media");
    remote_a.add_remote_stream(announced);
    settle().await;

    let id = SessionId::of(a.as_ref());
    assert_eq!(fixture.client.remote_streams(&id).len(), 2);
    let destination = fixture.client.mixer().destination().unwrap();
    let context = fixture.platform.context().unwrap();
    assert_eq!(context.connected_sources(&destination.id()).len(), 4);
}
