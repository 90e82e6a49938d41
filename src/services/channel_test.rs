use super::*;
use crate::transport::Envelope;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

fn member(receive_own: bool, key: Option<&str>) -> (Member, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(16);
    (Member { tx, receive_own, presence_key: key.map(str::to_owned) }, rx)
}

fn participant(id: &str) -> Participant {
    Participant {
        id: id.into(),
        display_name: id.into(),
        color: "#f00".into(),
        cursor: None,
        last_seen: 0,
        source: None,
    }
}

async fn next(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(50), rx.recv()).await.is_err(),
        "expected no frame"
    );
}

fn ids(frame: &Frame) -> Vec<String> {
    frame
        .data_as::<Vec<Participant>>("participants")
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.id)
        .collect()
}

#[tokio::test]
async fn join_pushes_presence_sync() {
    let state = HubState::new(None);
    let a = Uuid::new_v4();
    let (m, mut rx) = member(false, None);
    join(&state, "drawing-room", a, m).await;

    let sync = next(&mut rx).await;
    assert_eq!(sync.syscall, "presence:sync");
    assert_eq!(sync.channel.as_deref(), Some("drawing-room"));
    assert!(ids(&sync).is_empty());
    assert_eq!(state.member_count("drawing-room").await, 1);
}

#[tokio::test]
async fn broadcast_skips_sender_unless_receive_own() {
    let state = HubState::new(None);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (ma, mut rx_a) = member(false, None);
    let (mb, mut rx_b) = member(false, None);
    join(&state, "chat-room", a, ma).await;
    join(&state, "chat-room", b, mb).await;
    next(&mut rx_a).await;
    next(&mut rx_b).await;

    let data = crate::transport::ws::envelope_data(&Envelope::clear("user-1-a")).expect("envelope");
    let delivered = broadcast(&state, "chat-room", a, data).await.expect("broadcast");
    assert_eq!(delivered, 1);

    let event = next(&mut rx_b).await;
    assert_eq!(event.syscall, "broadcast:event");
    assert_eq!(event.data_str("originId"), Some("user-1-a"));
    assert_empty(&mut rx_a).await;
}

#[tokio::test]
async fn broadcast_echoes_to_sender_that_asked_for_it() {
    let state = HubState::new(None);
    let a = Uuid::new_v4();
    let (m, mut rx) = member(true, None);
    join(&state, "drawing-room", a, m).await;
    next(&mut rx).await;

    assert_eq!(broadcast(&state, "drawing-room", a, Data::new()).await.expect("broadcast"), 1);
    assert_eq!(next(&mut rx).await.syscall, "broadcast:event");
}

#[tokio::test]
async fn broadcast_requires_membership() {
    let state = HubState::new(None);
    let err = broadcast(&state, "chat-room", Uuid::new_v4(), Data::new()).await.expect_err("not joined");
    assert_eq!(err.error_code(), "E_NOT_JOINED");
}

#[tokio::test]
async fn track_pushes_join_and_sync_to_everyone() {
    let state = HubState::new(None);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (ma, mut rx_a) = member(false, Some("user-1-a"));
    let (mb, mut rx_b) = member(false, None);
    join(&state, "presence-room", a, ma).await;
    join(&state, "presence-room", b, mb).await;
    next(&mut rx_a).await;
    next(&mut rx_b).await;

    track(&state, "presence-room", a, participant("user-1-a")).await.expect("track");
    for rx in [&mut rx_a, &mut rx_b] {
        let join = next(rx).await;
        assert_eq!(join.syscall, "presence:join");
        let sync = next(rx).await;
        assert_eq!(sync.syscall, "presence:sync");
        assert_eq!(ids(&sync), vec!["user-1-a"]);
    }
}

#[tokio::test]
async fn retrack_replaces_entry_under_same_key() {
    let state = HubState::new(None);
    let a = Uuid::new_v4();
    let (m, _rx) = member(false, Some("me"));
    join(&state, "presence-room", a, m).await;

    let mut me = participant("user-1-a");
    track(&state, "presence-room", a, me.clone()).await.expect("track");
    me.display_name = "renamed".into();
    track(&state, "presence-room", a, me).await.expect("track");

    let channels = state.channels.read().await;
    let table = channels.get("presence-room").expect("room").presence_table();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].display_name, "renamed");
}

#[tokio::test]
async fn track_requires_membership() {
    let state = HubState::new(None);
    let err = track(&state, "presence-room", Uuid::new_v4(), participant("user-1-a")).await.expect_err("not joined");
    assert!(matches!(err, ChannelError::NotJoined(_)));
}

#[tokio::test]
async fn leave_withdraws_presence_and_evicts_idle_channel() {
    let state = HubState::new(None);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (ma, _rx_a) = member(false, None);
    let (mb, mut rx_b) = member(false, None);
    join(&state, "presence-room", a, ma).await;
    join(&state, "presence-room", b, mb).await;
    track(&state, "presence-room", a, participant("user-1-a")).await.expect("track");
    // sync on join, then join + sync from the track
    for _ in 0..3 {
        next(&mut rx_b).await;
    }

    leave(&state, "presence-room", a).await;
    let left = next(&mut rx_b).await;
    assert_eq!(left.syscall, "presence:leave");
    assert_eq!(ids(&left), vec!["user-1-a"]);
    let sync = next(&mut rx_b).await;
    assert!(ids(&sync).is_empty());

    leave(&state, "presence-room", b).await;
    assert!(state.channels.read().await.get("presence-room").is_none());
}

#[tokio::test]
async fn untrack_without_presence_is_silent() {
    let state = HubState::new(None);
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (ma, _rx_a) = member(false, None);
    let (mb, mut rx_b) = member(false, None);
    join(&state, "presence-room", a, ma).await;
    join(&state, "presence-room", b, mb).await;
    next(&mut rx_b).await;

    untrack(&state, "presence-room", a).await;
    assert_empty(&mut rx_b).await;
}
