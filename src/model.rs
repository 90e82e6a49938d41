//! Board data model shared by every synchronization tier.
//!
//! DESIGN
//! ======
//! Identity is the `id` string and nothing else. Ids follow the shape
//! `<prefix>-<epoch ms>-<9 base36 chars>`, so the creation time of a
//! participant can be recovered from its id; the capacity gate orders
//! admission by that embedded timestamp.
//!
//! Strokes and messages are immutable and append-only. Participants are
//! mutated by their owning client (cursor, `last_seen`) and stamped with a
//! `source` tag by the merge engine.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Palette assigned to newly created participants.
pub const PARTICIPANT_COLORS: [&str; 8] = [
    "#ef4444", "#3b82f6", "#10b981", "#f59e0b", "#8b5cf6", "#ec4899", "#06b6d4", "#84cc16",
];

const NICKNAME_ADJECTIVES: [&str; 8] = ["Swift", "Bright", "Clever", "Kind", "Merry", "Eager", "Bold", "Lively"];
const NICKNAME_NOUNS: [&str; 8] = ["Rabbit", "Cat", "Puppy", "Panda", "Elephant", "Lion", "Tiger", "Fox"];

const ID_SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Which relay a merged participant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    SameDevice,
    MultiDevice,
}

/// One person on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Point>,
    /// Milliseconds since Unix epoch of the last observed renewal.
    #[serde(default)]
    pub last_seen: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: String,
    pub points: Vec<Point>,
    pub color: String,
    pub thickness: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_color: String,
    pub content: String,
    pub timestamp: i64,
}

/// The externally observable board state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub participants: Vec<Participant>,
    pub strokes: Vec<Stroke>,
    pub messages: Vec<ChatMessage>,
}

/// Append-only board items keyed by id and ordered by timestamp.
pub trait BoardItem: Clone {
    fn key(&self) -> &str;
    fn timestamp(&self) -> i64;
}

impl BoardItem for Stroke {
    fn key(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl BoardItem for ChatMessage {
    fn key(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Participant {
    /// Create a participant with a fresh id stamped at the current time.
    pub fn new(display_name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: generate_id("user"),
            display_name: display_name.into(),
            color: color.into(),
            cursor: None,
            last_seen: now_ms(),
            source: None,
        }
    }

    /// Create a participant with a random nickname and palette color.
    #[must_use]
    pub fn random() -> Self {
        Self::new(random_nickname(), random_color())
    }

    /// Creation time embedded in the id.
    #[must_use]
    pub fn created_at(&self) -> i64 {
        creation_timestamp(&self.id)
    }

    /// True if no renewal was observed within `window_ms` of `now`.
    #[must_use]
    pub fn is_stale(&self, now: i64, window_ms: i64) -> bool {
        now - self.last_seen > window_ms
    }
}

impl Stroke {
    pub fn new(points: Vec<Point>, color: impl Into<String>, thickness: f64) -> Self {
        Self { id: generate_id("stroke"), points, color: color.into(), thickness, timestamp: now_ms() }
    }
}

impl ChatMessage {
    /// Build a message authored by `author`. Returns `None` for blank content.
    #[must_use]
    pub fn from_participant(author: &Participant, content: &str) -> Option<Self> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        Some(Self {
            id: generate_id("msg"),
            author_id: author.id.clone(),
            author_name: author.display_name.clone(),
            author_color: author.color.clone(),
            content: content.to_owned(),
            timestamp: now_ms(),
        })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Generate an id of the form `<prefix>-<epoch ms>-<9 base36 chars>`.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| char::from(ID_SUFFIX_ALPHABET[rng.random_range(0..ID_SUFFIX_ALPHABET.len())]))
        .collect();
    format!("{prefix}-{}-{suffix}", now_ms())
}

/// Creation timestamp embedded in an id.
///
/// Ids without a parseable timestamp sort after every well-formed id.
#[must_use]
pub fn creation_timestamp(id: &str) -> i64 {
    let Some(part) = id.split('-').nth(1) else {
        return i64::MAX;
    };
    part.parse::<i64>().unwrap_or(i64::MAX)
}

/// Order participants oldest-first by embedded creation time, then by id.
pub fn sort_participants(participants: &mut [Participant]) {
    participants.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then_with(|| a.id.cmp(&b.id)));
}

/// Append `item` unless an item with the same id is already present.
///
/// Returns `true` if the item was appended.
pub fn push_unique<T: BoardItem>(items: &mut Vec<T>, item: T) -> bool {
    if items.iter().any(|existing| existing.key() == item.key()) {
        return false;
    }
    items.push(item);
    true
}

/// Drop the oldest entries so at most `cap` remain.
pub fn retain_last<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

#[must_use]
pub fn random_nickname() -> String {
    let mut rng = rand::rng();
    let adjective = NICKNAME_ADJECTIVES[rng.random_range(0..NICKNAME_ADJECTIVES.len())];
    let noun = NICKNAME_NOUNS[rng.random_range(0..NICKNAME_NOUNS.len())];
    let number: u32 = rng.random_range(0..100);
    format!("{adjective}{noun}{number}")
}

#[must_use]
pub fn random_color() -> &'static str {
    PARTICIPANT_COLORS[rand::rng().random_range(0..PARTICIPANT_COLORS.len())]
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
