//! Transport adapter — the primary publish/subscribe channel.
//!
//! DESIGN
//! ======
//! A `Transport` opens named channels. Each `Channel` handle carries three
//! event classes: broadcast envelopes (`stroke`, `clear`, `message`),
//! presence (`sync` with the full table, `join`, `leave`), and connection
//! status. `connect` returns immediately with the channel in `Connecting`;
//! the status stream then reports `Subscribed` (steady state) or
//! `ChannelError`/`TimedOut` (terminal for this attempt).
//!
//! Status subscribers receive the current status immediately on
//! subscribe, so a status change that lands before the subscriber
//! registers is never missed.

pub mod memory;
mod shared;
pub mod ws;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::listeners::{Callback, Subscription};
use crate::model::{ChatMessage, Participant, Stroke};

pub use memory::{HubMode, MemoryHub};
pub use ws::WsTransport;

// =============================================================================
// STATUS
// =============================================================================

/// Lifecycle of one channel subscription attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Connecting,
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl ChannelStatus {
    /// Statuses that end this attempt and trigger failover.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::ChannelError | Self::TimedOut)
    }
}

// =============================================================================
// LOGICAL CHANNELS
// =============================================================================

/// The three logical channels routed independently by the failover layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Drawing,
    Chat,
    Presence,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Drawing, ChannelKind::Chat, ChannelKind::Presence];

    /// Wire name of the channel on the pub/sub hub.
    #[must_use]
    pub fn channel_name(self) -> &'static str {
        match self {
            Self::Drawing => "drawing-room",
            Self::Chat => "chat-room",
            Self::Presence => "presence",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.channel_name())
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Stroke,
    Clear,
    Message,
}

/// Broadcast payload: `{type, payload, originId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub origin_id: String,
}

impl Envelope {
    /// Envelope carrying a stroke.
    ///
    /// # Errors
    ///
    /// Returns an error if the stroke cannot be serialized.
    pub fn stroke(stroke: &Stroke, origin_id: &str) -> Result<Self, TransportError> {
        Ok(Self { kind: EventKind::Stroke, payload: serde_json::to_value(stroke)?, origin_id: origin_id.to_owned() })
    }

    #[must_use]
    pub fn clear(origin_id: &str) -> Self {
        Self { kind: EventKind::Clear, payload: serde_json::Value::Null, origin_id: origin_id.to_owned() }
    }

    /// Envelope carrying a chat message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialized.
    pub fn message(message: &ChatMessage, origin_id: &str) -> Result<Self, TransportError> {
        Ok(Self { kind: EventKind::Message, payload: serde_json::to_value(message)?, origin_id: origin_id.to_owned() })
    }

    /// Decode the payload as a stroke.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a stroke.
    pub fn decode_stroke(&self) -> Result<Stroke, TransportError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Decode the payload as a chat message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a chat message.
    pub fn decode_message(&self) -> Result<ChatMessage, TransportError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Presence notifications. `Sync` always carries the full table.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Sync(Vec<Participant>),
    Join(Vec<Participant>),
    Leave(Vec<Participant>),
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel {0} is not subscribed")]
    NotSubscribed(String),
    #[error("channel {0} is closed")]
    Closed(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Per-channel connection options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Presence key; set for presence-mode channels.
    pub presence_key: Option<String>,
    /// Deliver this member's own broadcasts back to it.
    pub receive_own: bool,
}

impl ChannelOptions {
    #[must_use]
    pub fn presence(key: impl Into<String>) -> Self {
        Self { presence_key: Some(key.into()), receive_own: false }
    }
}

/// Opens channels on a publish/subscribe backend.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open `channel`. The handle starts in `Connecting`.
    ///
    /// # Errors
    ///
    /// Returns an error only if no handle can be created at all; connection
    /// failures after that are reported through the status stream.
    async fn connect(&self, channel: &str, options: ChannelOptions) -> Result<Arc<dyn Channel>, TransportError>;
}

/// One open channel subscription.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    fn status(&self) -> ChannelStatus;

    /// Publish a broadcast envelope to the other members.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not subscribed or the send fails.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Receive broadcasts of one event kind.
    fn on_event(&self, kind: EventKind, callback: Callback<Envelope>) -> Subscription;

    /// Receive status changes; the current status is delivered immediately.
    fn on_status_change(&self, callback: Callback<ChannelStatus>) -> Subscription;

    fn on_presence(&self, callback: Callback<PresenceEvent>) -> Subscription;

    /// Publish this member's presence state.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not subscribed or the send fails.
    async fn track(&self, participant: &Participant) -> Result<(), TransportError>;

    /// Withdraw this member's presence state.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    async fn untrack(&self) -> Result<(), TransportError>;

    /// Last presence table received.
    fn presence_state(&self) -> Vec<Participant>;

    /// Leave the channel and release its resources.
    async fn disconnect(&self);
}

/// Subscribe to one event kind of a channel with a closure.
pub fn on_event<F>(channel: &dyn Channel, kind: EventKind, f: F) -> Subscription
where
    F: Fn(&Envelope) + Send + Sync + 'static,
{
    channel.on_event(kind, Arc::new(f))
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
