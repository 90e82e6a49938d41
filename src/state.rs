//! Shared hub state.
//!
//! DESIGN
//! ======
//! `HubState` is injected into Axum handlers via the `State` extractor.
//! It holds the live channel table and, when `DATABASE_URL` is set, the
//! pool behind the durable store. Channels exist only while they have a
//! member or a tracked presence entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::cross_device::{DurableStore, PgStore};
use crate::frame::Frame;
use crate::model::Participant;

// =============================================================================
// CHANNEL STATE
// =============================================================================

/// One socket's membership in a channel.
#[derive(Debug, Clone)]
pub struct Member {
    /// Sender for frames pushed to this client.
    pub tx: mpsc::Sender<Frame>,
    /// Deliver the member's own broadcasts back to it.
    pub receive_own: bool,
    /// Presence key supplied at join; falls back to the participant id.
    pub presence_key: Option<String>,
}

/// Per-channel live state.
#[derive(Debug, Default)]
pub struct ChannelState {
    pub members: HashMap<Uuid, Member>,
    /// Presence key -> (owning client, tracked state).
    pub presence: BTreeMap<String, (Uuid, Participant)>,
}

impl ChannelState {
    #[must_use]
    pub fn presence_table(&self) -> Vec<Participant> {
        self.presence.values().map(|(_, p)| p.clone()).collect()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.members.is_empty() && self.presence.is_empty()
    }
}

// =============================================================================
// HUB STATE
// =============================================================================

#[derive(Clone)]
pub struct HubState {
    pub pool: Option<PgPool>,
    pub channels: Arc<RwLock<HashMap<String, ChannelState>>>,
}

impl HubState {
    #[must_use]
    pub fn new(pool: Option<PgPool>) -> Self {
        Self { pool, channels: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Durable store over the hub's pool; `None` without `DATABASE_URL`.
    #[must_use]
    pub fn durable_store(&self) -> Option<Arc<dyn DurableStore>> {
        let pool = self.pool.clone()?;
        Some(Arc::new(PgStore::new(pool)))
    }

    /// Number of members currently joined to `channel`.
    pub async fn member_count(&self, channel: &str) -> usize {
        self.channels.read().await.get(channel).map_or(0, |c| c.members.len())
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
