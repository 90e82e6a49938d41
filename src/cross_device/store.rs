//! Durable store contract and row shapes for the cross-device tier.
//!
//! Three collections: participants (upsert by id), messages and strokes
//! (insert, id-keyed, duplicates ignored). Every row carries the writing
//! device id. Stroke points are stored as one JSON blob.

use serde::{Deserialize, Serialize};

use crate::config::RetentionPolicy;
use crate::model::{ChatMessage, Participant, Point, Stroke};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("row codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store unavailable")]
    Unavailable,
}

// =============================================================================
// ROWS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub id: String,
    pub display_name: String,
    pub color: String,
    pub device_id: String,
    pub last_seen: i64,
    pub cursor_x: Option<f64>,
    pub cursor_y: Option<f64>,
}

impl ParticipantRow {
    #[must_use]
    pub fn from_participant(participant: &Participant, device_id: &str) -> Self {
        Self {
            id: participant.id.clone(),
            display_name: participant.display_name.clone(),
            color: participant.color.clone(),
            device_id: device_id.to_owned(),
            last_seen: participant.last_seen,
            cursor_x: participant.cursor.map(|c| c.x),
            cursor_y: participant.cursor.map(|c| c.y),
        }
    }

    #[must_use]
    pub fn into_participant(self) -> Participant {
        let cursor = match (self.cursor_x, self.cursor_y) {
            (Some(x), Some(y)) => Some(Point { x, y }),
            _ => None,
        };
        Participant {
            id: self.id,
            display_name: self.display_name,
            color: self.color,
            cursor,
            last_seen: self.last_seen,
            source: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_color: String,
    pub content: String,
    pub device_id: String,
    pub created_at: i64,
}

impl MessageRow {
    #[must_use]
    pub fn from_message(message: &ChatMessage, device_id: &str) -> Self {
        Self {
            id: message.id.clone(),
            author_id: message.author_id.clone(),
            author_name: message.author_name.clone(),
            author_color: message.author_color.clone(),
            content: message.content.clone(),
            device_id: device_id.to_owned(),
            created_at: message.timestamp,
        }
    }

    #[must_use]
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            author_id: self.author_id,
            author_name: self.author_name,
            author_color: self.author_color,
            content: self.content,
            timestamp: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeRow {
    pub id: String,
    pub device_id: String,
    /// JSON array of `{x, y}`.
    pub points_blob: String,
    pub color: String,
    pub thickness: f64,
    pub created_at: i64,
}

impl StrokeRow {
    /// # Errors
    ///
    /// Returns an error if the points cannot be encoded.
    pub fn from_stroke(stroke: &Stroke, device_id: &str) -> Result<Self, StoreError> {
        Ok(Self {
            id: stroke.id.clone(),
            device_id: device_id.to_owned(),
            points_blob: serde_json::to_string(&stroke.points)?,
            color: stroke.color.clone(),
            thickness: stroke.thickness,
            created_at: stroke.timestamp,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the points blob is not a JSON point array.
    pub fn into_stroke(self) -> Result<Stroke, StoreError> {
        Ok(Stroke {
            id: self.id,
            points: serde_json::from_str(&self.points_blob)?,
            color: self.color,
            thickness: self.thickness,
            timestamp: self.created_at,
        })
    }
}

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub participants: u64,
    pub messages: u64,
    pub strokes: u64,
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Shared durable store polled by every device.
#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or replace a participant by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn upsert_participant(&self, row: ParticipantRow) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn delete_participant(&self, id: &str) -> Result<(), StoreError>;

    /// Insert a message; an existing id is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn insert_message(&self, row: MessageRow) -> Result<(), StoreError>;

    /// Insert a stroke; an existing id is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn insert_stroke(&self, row: StrokeRow) -> Result<(), StoreError>;

    /// Delete every stroke. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn clear_strokes(&self) -> Result<u64, StoreError>;

    /// Participants with `last_seen >= since`, oldest registration first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn fetch_active_participants(&self, since: i64) -> Result<Vec<ParticipantRow>, StoreError>;

    /// The newest `limit` messages, returned oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn fetch_recent_messages(&self, limit: usize) -> Result<Vec<MessageRow>, StoreError>;

    /// The newest `limit` strokes, returned oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    async fn fetch_recent_strokes(&self, limit: usize) -> Result<Vec<StrokeRow>, StoreError>;

    /// Apply retention as of `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if any delete fails.
    async fn prune(&self, policy: &RetentionPolicy, now: i64) -> Result<PruneReport, StoreError>;
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
