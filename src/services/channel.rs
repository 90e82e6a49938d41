//! Channel service — membership, broadcast fan-out, and presence tables.
//!
//! DESIGN
//! ======
//! A channel is a named room. Members join with a push sender; the service
//! never writes to sockets, it only queues frames on member senders. Pushes
//! are best-effort: a member whose queue is full misses that frame, which
//! the protocol tolerates because every presence change is followed by a
//! full `presence:sync`.
//!
//! Presence entries are keyed by the member's join key (or the tracked
//! participant id when no key was given) and owned by the client that
//! tracked them, so leaving or disconnecting withdraws exactly that
//! client's entries.

use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame};
use crate::model::Participant;
use crate::state::{ChannelState, HubState, Member};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("not joined to channel: {0}")]
    NotJoined(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
}

impl ErrorCode for ChannelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotJoined(_) => "E_NOT_JOINED",
            Self::BadRequest(_) => "E_BAD_REQUEST",
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
        }
    }
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

/// Add `client_id` to `channel` and push the current presence table to it.
pub async fn join(state: &HubState, channel: &str, client_id: Uuid, member: Member) {
    let tx = member.tx.clone();
    let (table, count) = {
        let mut channels = state.channels.write().await;
        let room = channels.entry(channel.to_owned()).or_default();
        room.members.insert(client_id, member);
        (room.presence_table(), room.members.len())
    };
    info!(%channel, %client_id, members = count, "client joined channel");
    push(&tx, presence_frame("presence:sync", channel, &table));
}

/// Remove `client_id` from `channel`, withdrawing its presence first.
pub async fn leave(state: &HubState, channel: &str, client_id: Uuid) {
    untrack(state, channel, client_id).await;

    let mut channels = state.channels.write().await;
    let Some(room) = channels.get_mut(channel) else {
        return;
    };
    room.members.remove(&client_id);
    info!(%channel, %client_id, remaining = room.members.len(), "client left channel");
    if room.is_idle() {
        channels.remove(channel);
        debug!(%channel, "evicted idle channel");
    }
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Fan `data` out as `broadcast:event` to the channel's members. The sender
/// is skipped unless it joined with `self`.
pub async fn broadcast(state: &HubState, channel: &str, from: Uuid, data: Data) -> Result<usize, ChannelError> {
    let channels = state.channels.read().await;
    let room = joined(&channels, channel, from)?;

    let frame = Frame::event("broadcast:event", channel, data).with_from(from.to_string());
    let mut delivered = 0;
    for (client_id, member) in &room.members {
        if *client_id == from && !member.receive_own {
            continue;
        }
        if push(&member.tx, frame.clone()) {
            delivered += 1;
        }
    }
    Ok(delivered)
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Upsert `participant` as the presence of `client_id` and push
/// `presence:join` plus the full table to every member.
pub async fn track(state: &HubState, channel: &str, client_id: Uuid, participant: Participant) -> Result<(), ChannelError> {
    let mut channels = state.channels.write().await;
    let Some(room) = channels.get_mut(channel) else {
        return Err(ChannelError::NotJoined(channel.to_owned()));
    };
    let Some(member) = room.members.get(&client_id) else {
        return Err(ChannelError::NotJoined(channel.to_owned()));
    };
    let key = member.presence_key.clone().unwrap_or_else(|| participant.id.clone());
    room.presence.insert(key, (client_id, participant.clone()));

    let join = presence_frame("presence:join", channel, std::slice::from_ref(&participant));
    let sync = presence_frame("presence:sync", channel, &room.presence_table());
    for member in room.members.values() {
        push(&member.tx, join.clone());
        push(&member.tx, sync.clone());
    }
    debug!(%channel, %client_id, participant = %participant.id, "presence tracked");
    Ok(())
}

/// Withdraw every presence entry owned by `client_id` and notify the rest
/// of the channel. No-op when the client tracked nothing.
pub async fn untrack(state: &HubState, channel: &str, client_id: Uuid) {
    let mut channels = state.channels.write().await;
    let Some(room) = channels.get_mut(channel) else {
        return;
    };

    let mut left = Vec::new();
    room.presence.retain(|_, (owner, participant)| {
        if *owner == client_id {
            left.push(participant.clone());
            false
        } else {
            true
        }
    });
    if left.is_empty() {
        return;
    }

    let leave = presence_frame("presence:leave", channel, &left);
    let sync = presence_frame("presence:sync", channel, &room.presence_table());
    for (id, member) in &room.members {
        if *id == client_id {
            continue;
        }
        push(&member.tx, leave.clone());
        push(&member.tx, sync.clone());
    }
    debug!(%channel, %client_id, count = left.len(), "presence withdrawn");
}

// =============================================================================
// HELPERS
// =============================================================================

fn joined<'a>(
    channels: &'a std::collections::HashMap<String, ChannelState>,
    channel: &str,
    client_id: Uuid,
) -> Result<&'a ChannelState, ChannelError> {
    channels
        .get(channel)
        .filter(|room| room.members.contains_key(&client_id))
        .ok_or_else(|| ChannelError::NotJoined(channel.to_owned()))
}

fn presence_frame(syscall: &str, channel: &str, participants: &[Participant]) -> Frame {
    let mut data = Data::new();
    data.insert("participants".into(), serde_json::to_value(participants).unwrap_or_default());
    Frame::event(syscall, channel, data)
}

/// Best-effort push. Returns whether the frame was queued.
fn push(tx: &tokio::sync::mpsc::Sender<Frame>, frame: Frame) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "push dropped");
            false
        }
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
