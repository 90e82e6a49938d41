use super::*;
use serde_json::json;
use tokio::time::{Duration, timeout};

fn session() -> (Session, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(32);
    (Session { client_id: Uuid::new_v4(), tx, joined: BTreeSet::new() }, rx)
}

fn text(frame: &Frame) -> String {
    serde_json::to_string(frame).expect("serialize")
}

fn join_req(channel: &str) -> Frame {
    Frame::request("channel:join", Data::new()).with_channel(channel)
}

async fn next(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn send(state: &HubState, session: &mut Session, req: &Frame) -> Frame {
    let mut replies = process_inbound_text(state, session, &text(req)).await;
    assert_eq!(replies.len(), 1);
    replies.remove(0)
}

#[tokio::test]
async fn join_replies_with_client_id_then_pushes_sync() {
    let state = HubState::new(None);
    let (mut s, mut rx) = session();
    let req = join_req("drawing-room");

    let reply = send(&state, &mut s, &req).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.parent_id, Some(req.id));
    assert_eq!(reply.data_str("client_id"), Some(s.client_id.to_string().as_str()));

    let sync = next(&mut rx).await;
    assert_eq!(sync.syscall, "presence:sync");
    assert!(s.joined.contains("drawing-room"));
}

#[tokio::test]
async fn invalid_json_yields_gateway_error() {
    let state = HubState::new(None);
    let (mut s, _rx) = session();
    let replies = process_inbound_text(&state, &mut s, "{not json").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].syscall, "gateway:error");
}

#[tokio::test]
async fn unknown_prefix_is_coded_error() {
    let state = HubState::new(None);
    let (mut s, _rx) = session();
    let reply = send(&state, &mut s, &Frame::request("board:join", Data::new()).with_channel("x")).await;
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.error_code(), Some("E_UNKNOWN_SYSCALL"));
}

#[tokio::test]
async fn join_without_channel_is_bad_request() {
    let state = HubState::new(None);
    let (mut s, _rx) = session();
    let reply = send(&state, &mut s, &Frame::request("channel:join", Data::new())).await;
    assert_eq!(reply.error_code(), Some("E_BAD_REQUEST"));
}

#[tokio::test]
async fn broadcast_before_join_is_rejected() {
    let state = HubState::new(None);
    let (mut s, _rx) = session();
    let req = Frame::request("broadcast:send", Data::new())
        .with_channel("chat-room")
        .with_data("type", "message");
    let reply = send(&state, &mut s, &req).await;
    assert_eq!(reply.error_code(), Some("E_NOT_JOINED"));
}

#[tokio::test]
async fn broadcast_reaches_peer_as_event() {
    let state = HubState::new(None);
    let (mut a, _rx_a) = session();
    let (mut b, mut rx_b) = session();
    send(&state, &mut a, &join_req("chat-room")).await;
    send(&state, &mut b, &join_req("chat-room")).await;
    next(&mut rx_b).await;

    let req = Frame::request("broadcast:send", Data::new())
        .with_channel("chat-room")
        .with_data("type", "message")
        .with_data("payload", json!({"id": "msg-1-a"}))
        .with_data("originId", "user-1-a");
    let reply = send(&state, &mut a, &req).await;
    assert_eq!(reply.status, Status::Done);

    let event = next(&mut rx_b).await;
    assert_eq!(event.syscall, "broadcast:event");
    assert_eq!(event.status, Status::Item);
    assert_eq!(event.data_str("originId"), Some("user-1-a"));
}

#[tokio::test]
async fn broadcast_without_type_is_bad_request() {
    let state = HubState::new(None);
    let (mut s, _rx) = session();
    send(&state, &mut s, &join_req("chat-room")).await;
    let reply = send(&state, &mut s, &Frame::request("broadcast:send", Data::new()).with_channel("chat-room")).await;
    assert_eq!(reply.error_code(), Some("E_BAD_REQUEST"));
}

#[tokio::test]
async fn presence_track_requires_participant() {
    let state = HubState::new(None);
    let (mut s, _rx) = session();
    send(&state, &mut s, &join_req("presence-room")).await;
    let reply = send(&state, &mut s, &Frame::request("presence:track", Data::new()).with_channel("presence-room")).await;
    assert_eq!(reply.error_code(), Some("E_BAD_REQUEST"));
}

#[tokio::test]
async fn presence_track_and_leave_update_peers() {
    let state = HubState::new(None);
    let (mut a, _rx_a) = session();
    let (mut b, mut rx_b) = session();
    send(&state, &mut a, &join_req("presence-room")).await;
    send(&state, &mut b, &join_req("presence-room")).await;
    next(&mut rx_b).await;

    let me = Participant::new("alice", "#ef4444");
    let track = Frame::request("presence:track", Data::new())
        .with_channel("presence-room")
        .with_data("participant", serde_json::to_value(&me).expect("participant"));
    assert_eq!(send(&state, &mut a, &track).await.status, Status::Done);
    assert_eq!(next(&mut rx_b).await.syscall, "presence:join");
    let sync = next(&mut rx_b).await;
    let table = sync.data_as::<Vec<Participant>>("participants").expect("table");
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].id, me.id);

    let leave = Frame::request("channel:leave", Data::new()).with_channel("presence-room");
    assert_eq!(send(&state, &mut a, &leave).await.status, Status::Done);
    assert!(!a.joined.contains("presence-room"));
    assert_eq!(next(&mut rx_b).await.syscall, "presence:leave");
    assert_eq!(state.member_count("presence-room").await, 1);
}
