//! WebSocket handler — channel hub frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames pushed by channel peers → forward to client
//!
//! Handler functions validate the request, call the channel service, and
//! return an `Outcome`. Fan-out to other members happens inside the
//! service through member senders; the dispatch layer only answers the
//! sender.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → client ID assigned
//! 2. `channel:join` → `done {client_id}`, then a queued `presence:sync`
//! 3. Broadcast / presence requests → `done` or a coded error frame
//! 4. Close → leave every joined channel (withdraws presence)

use std::collections::BTreeSet;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::model::Participant;
use crate::services;
use crate::services::channel::ChannelError;
use crate::state::{HubState, Member};

const PUSH_CAPACITY: usize = 256;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. Handlers never write to the socket.
#[derive(Debug)]
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
}

/// Per-socket state threaded through dispatch.
struct Session {
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
    joined: BTreeSet<String>,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<HubState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: HubState) {
    let (tx, mut rx) = mpsc::channel::<Frame>(PUSH_CAPACITY);
    let mut session = Session { client_id: Uuid::new_v4(), tx, joined: BTreeSet::new() };
    info!(client_id = %session.client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut session, text.as_str()).await;
                        if !send_all(&mut socket, &replies).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = rx.recv() => {
                if !send_frame(&mut socket, &frame).await {
                    break;
                }
            }
        }
    }

    for channel in std::mem::take(&mut session.joined) {
        services::channel::leave(&state, &channel, session.client_id).await;
    }
    info!(client_id = %session.client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
async fn process_inbound_text(state: &HubState, session: &mut Session, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };
    req.from = Some(session.client_id.to_string());
    debug!(client_id = %session.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "channel" => handle_channel(state, session, &req).await,
        "broadcast" => handle_broadcast(state, session, &req).await,
        "presence" => handle_presence(state, session, &req).await,
        _ => Err(ChannelError::UnknownSyscall(req.syscall.clone())),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(e) => vec![req.error_from(&e)],
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn handle_channel(state: &HubState, session: &mut Session, req: &Frame) -> Result<Outcome, ChannelError> {
    let channel = channel_of(req)?;
    match op(req) {
        "join" => {
            let member = Member {
                tx: session.tx.clone(),
                receive_own: req.data.get("self").and_then(serde_json::Value::as_bool).unwrap_or(false),
                presence_key: req.data_str("key").map(str::to_owned),
            };
            services::channel::join(state, channel, session.client_id, member).await;
            session.joined.insert(channel.to_owned());

            let mut data = Data::new();
            data.insert("client_id".into(), serde_json::json!(session.client_id));
            Ok(Outcome::Reply(data))
        }
        "leave" => {
            require_joined(session, channel)?;
            services::channel::leave(state, channel, session.client_id).await;
            session.joined.remove(channel);
            Ok(Outcome::Done)
        }
        _ => Err(ChannelError::UnknownSyscall(req.syscall.clone())),
    }
}

async fn handle_broadcast(state: &HubState, session: &Session, req: &Frame) -> Result<Outcome, ChannelError> {
    let channel = channel_of(req)?;
    match op(req) {
        "send" => {
            require_joined(session, channel)?;
            if req.data_str("type").is_none() {
                return Err(ChannelError::BadRequest("type required".into()));
            }
            let delivered = services::channel::broadcast(state, channel, session.client_id, req.data.clone()).await?;
            debug!(%channel, delivered, "ws: broadcast relayed");
            Ok(Outcome::Done)
        }
        _ => Err(ChannelError::UnknownSyscall(req.syscall.clone())),
    }
}

async fn handle_presence(state: &HubState, session: &Session, req: &Frame) -> Result<Outcome, ChannelError> {
    let channel = channel_of(req)?;
    require_joined(session, channel)?;
    match op(req) {
        "track" => {
            let Some(participant) = req.data_as::<Participant>("participant") else {
                return Err(ChannelError::BadRequest("participant required".into()));
            };
            services::channel::track(state, channel, session.client_id, participant).await?;
            Ok(Outcome::Done)
        }
        "untrack" => {
            services::channel::untrack(state, channel, session.client_id).await;
            Ok(Outcome::Done)
        }
        _ => Err(ChannelError::UnknownSyscall(req.syscall.clone())),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn op(req: &Frame) -> &str {
    req.syscall.split_once(':').map_or("", |(_, op)| op)
}

fn channel_of(req: &Frame) -> Result<&str, ChannelError> {
    req.channel
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ChannelError::BadRequest("channel required".into()))
}

fn require_joined(session: &Session, channel: &str) -> Result<(), ChannelError> {
    if session.joined.contains(channel) {
        Ok(())
    } else {
        Err(ChannelError::NotJoined(channel.to_owned()))
    }
}

async fn send_all(socket: &mut WebSocket, frames: &[Frame]) -> bool {
    for frame in frames {
        if !send_frame(socket, frame).await {
            return false;
        }
    }
    true
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return false;
        }
    };
    if frame.status == Status::Error {
        let code = frame.error_code().unwrap_or("-");
        let message = frame.data_str("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    }
    match socket.send(Message::Text(json.into())).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "ws: socket send failed");
            false
        }
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
