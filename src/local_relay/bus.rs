//! Same-device broadcast bus.
//!
//! Any-to-all, fire-and-forget: every relay attached to a `LocalBus` sees
//! every message, including its own, and filters by `origin_context_id`.
//! Slow receivers lose the oldest messages rather than blocking senders.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::model::{ChatMessage, Participant, Stroke};

const DEFAULT_BUS_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum BusEvent {
    ParticipantUpdate(Participant),
    ParticipantRemove { id: String },
    MessageAdd(ChatMessage),
    StrokeAdd(Stroke),
    StrokesClear,
}

impl BusEvent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParticipantUpdate(_) => "participant-update",
            Self::ParticipantRemove { .. } => "participant-remove",
            Self::MessageAdd(_) => "message-add",
            Self::StrokeAdd(_) => "stroke-add",
            Self::StrokesClear => "strokes-clear",
        }
    }
}

/// `{type, data, originContextId, timestamp}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    #[serde(flatten)]
    pub event: BusEvent,
    pub origin_context_id: String,
    pub timestamp: i64,
}

/// Handle on a shared in-process bus. Clones publish to the same bus.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<BusMessage>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl LocalBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every attached receiver. Returns how many received it.
    pub fn publish(&self, message: BusMessage) -> usize {
        let kind = message.event.kind();
        match self.tx.send(message) {
            Ok(n) => n,
            Err(_) => {
                trace!(kind, "local bus: no receivers");
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
