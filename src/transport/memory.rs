//! In-process pub/sub hub implementing the transport contract.
//!
//! DESIGN
//! ======
//! `MemoryHub` models the primary channel server inside one process: named
//! rooms, per-member broadcast fan-out (sender excluded unless it asked
//! for its own echoes), and a presence table keyed by presence key that is
//! pushed to every member as a full `Sync` after each change.
//!
//! `HubMode` injects failures: `Failing` rejects joins with `ChannelError`
//! and drops every subscribed member with `ChannelError`; `TimingOut`
//! answers new joins with `TimedOut`; `Hanging` leaves new joins in
//! `Connecting` forever. Joins complete on a spawned task so
//! `connect` always returns in `Connecting`, as a network transport would.
//!
//! Delivery happens after the hub lock is released; member callbacks may
//! call back into the hub.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use super::shared::ChannelCore;
use super::{
    Channel, ChannelOptions, ChannelStatus, Envelope, EventKind, PresenceEvent, Transport, TransportError,
};
use crate::listeners::{Callback, Subscription, lock};
use crate::model::Participant;

/// Failure injection for the in-process hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HubMode {
    #[default]
    Healthy,
    Failing,
    TimingOut,
    Hanging,
}

struct Member {
    receive_own: bool,
    channel: Weak<MemoryChannel>,
}

#[derive(Default)]
struct Room {
    members: HashMap<u64, Member>,
    /// Presence key -> (member id, state).
    presence: BTreeMap<String, (u64, Participant)>,
}

impl Room {
    fn presence_table(&self) -> Vec<Participant> {
        self.presence.values().map(|(_, p)| p.clone()).collect()
    }

    fn live_members(&self) -> Vec<(u64, Arc<MemoryChannel>)> {
        self.members
            .iter()
            .filter_map(|(id, m)| m.channel.upgrade().map(|ch| (*id, ch)))
            .collect()
    }
}

struct HubInner {
    mode: Mutex<HubMode>,
    rooms: Mutex<HashMap<String, Room>>,
    next_member: AtomicU64,
}

/// Shared in-process channel server. Clones refer to the same hub.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                mode: Mutex::new(HubMode::Healthy),
                rooms: Mutex::new(HashMap::new()),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn mode(&self) -> HubMode {
        *lock(&self.inner.mode)
    }

    /// Switch failure mode. Entering `Failing` drops every subscribed
    /// member with `ChannelError`.
    pub fn set_mode(&self, mode: HubMode) {
        *lock(&self.inner.mode) = mode;
        info!(?mode, "memory hub: mode changed");
        if mode == HubMode::Failing {
            let dropped: Vec<Arc<MemoryChannel>> = {
                let mut rooms = lock(&self.inner.rooms);
                let dropped = rooms.values().flat_map(Room::live_members).map(|(_, ch)| ch).collect();
                rooms.clear();
                dropped
            };
            for channel in dropped {
                channel.core.set_status(ChannelStatus::ChannelError);
            }
        }
    }

    /// Number of subscribed members in `channel`.
    #[must_use]
    pub fn member_count(&self, channel: &str) -> usize {
        lock(&self.inner.rooms).get(channel).map_or(0, |room| room.live_members().len())
    }

    /// Current presence table of `channel`.
    #[must_use]
    pub fn presence(&self, channel: &str) -> Vec<Participant> {
        lock(&self.inner.rooms).get(channel).map(Room::presence_table).unwrap_or_default()
    }

    fn join(&self, channel: &Arc<MemoryChannel>) {
        match self.mode() {
            HubMode::Failing => {
                channel.core.set_status(ChannelStatus::ChannelError);
                return;
            }
            HubMode::TimingOut => {
                channel.core.set_status(ChannelStatus::TimedOut);
                return;
            }
            HubMode::Hanging => return,
            HubMode::Healthy => {}
        }
        if channel.status() == ChannelStatus::Closed {
            return;
        }

        let table = {
            let mut rooms = lock(&self.inner.rooms);
            let room = rooms.entry(channel.core.name().to_owned()).or_default();
            room.members.insert(
                channel.member_id,
                Member { receive_own: channel.options.receive_own, channel: Arc::downgrade(channel) },
            );
            room.presence_table()
        };
        debug!(channel = %channel.core.name(), member = channel.member_id, "memory hub: joined");
        channel.core.set_status(ChannelStatus::Subscribed);
        channel.core.deliver_presence(&PresenceEvent::Sync(table));
    }

    fn leave(&self, channel: &MemoryChannel) {
        self.untrack(channel);
        let mut rooms = lock(&self.inner.rooms);
        if let Some(room) = rooms.get_mut(channel.core.name()) {
            room.members.remove(&channel.member_id);
            if room.members.is_empty() && room.presence.is_empty() {
                rooms.remove(channel.core.name());
            }
        }
    }

    fn broadcast(&self, from: &MemoryChannel, envelope: &Envelope) {
        let targets: Vec<Arc<MemoryChannel>> = {
            let rooms = lock(&self.inner.rooms);
            let Some(room) = rooms.get(from.core.name()) else {
                return;
            };
            room.members
                .iter()
                .filter(|(id, m)| **id != from.member_id || m.receive_own)
                .filter_map(|(_, m)| m.channel.upgrade())
                .collect()
        };
        for target in targets {
            target.core.deliver_event(envelope);
        }
    }

    fn track(&self, from: &MemoryChannel, participant: &Participant) {
        let key = from.options.presence_key.clone().unwrap_or_else(|| participant.id.clone());
        let (targets, table) = {
            let mut rooms = lock(&self.inner.rooms);
            let room = rooms.entry(from.core.name().to_owned()).or_default();
            room.presence.insert(key, (from.member_id, participant.clone()));
            (room.live_members(), room.presence_table())
        };
        let join = PresenceEvent::Join(vec![participant.clone()]);
        let sync = PresenceEvent::Sync(table);
        for (_, target) in targets {
            target.core.deliver_presence(&join);
            target.core.deliver_presence(&sync);
        }
    }

    fn untrack(&self, from: &MemoryChannel) {
        let (targets, left, table) = {
            let mut rooms = lock(&self.inner.rooms);
            let Some(room) = rooms.get_mut(from.core.name()) else {
                return;
            };
            let mut left = Vec::new();
            room.presence.retain(|_, (member, p)| {
                if *member == from.member_id {
                    left.push(p.clone());
                    false
                } else {
                    true
                }
            });
            (room.live_members(), left, room.presence_table())
        };
        if left.is_empty() {
            return;
        }
        let leave = PresenceEvent::Leave(left);
        let sync = PresenceEvent::Sync(table);
        for (id, target) in targets {
            if id == from.member_id {
                continue;
            }
            target.core.deliver_presence(&leave);
            target.core.deliver_presence(&sync);
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryHub {
    async fn connect(&self, channel: &str, options: ChannelOptions) -> Result<Arc<dyn Channel>, TransportError> {
        let handle = Arc::new(MemoryChannel {
            core: ChannelCore::new(channel),
            hub: Arc::downgrade(&self.inner),
            member_id: self.inner.next_member.fetch_add(1, Ordering::Relaxed),
            options,
        });

        let hub = self.clone();
        let joining = Arc::clone(&handle);
        tokio::spawn(async move { hub.join(&joining) });

        Ok(handle)
    }
}

// =============================================================================
// CHANNEL HANDLE
// =============================================================================

/// A member's handle on one hub room.
pub struct MemoryChannel {
    core: ChannelCore,
    hub: Weak<HubInner>,
    member_id: u64,
    options: ChannelOptions,
}

impl MemoryChannel {
    fn hub(&self) -> Result<MemoryHub, TransportError> {
        self.hub
            .upgrade()
            .map(|inner| MemoryHub { inner })
            .ok_or_else(|| TransportError::Closed(self.core.name().to_owned()))
    }

    fn require_subscribed(&self) -> Result<MemoryHub, TransportError> {
        match self.status() {
            ChannelStatus::Subscribed => self.hub(),
            ChannelStatus::Closed => Err(TransportError::Closed(self.core.name().to_owned())),
            _ => Err(TransportError::NotSubscribed(self.core.name().to_owned())),
        }
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn status(&self) -> ChannelStatus {
        self.core.status()
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let hub = self.require_subscribed()?;
        hub.broadcast(self, &envelope);
        Ok(())
    }

    fn on_event(&self, kind: EventKind, callback: Callback<Envelope>) -> Subscription {
        self.core.on_event(kind, callback)
    }

    fn on_status_change(&self, callback: Callback<ChannelStatus>) -> Subscription {
        self.core.on_status_change(callback)
    }

    fn on_presence(&self, callback: Callback<PresenceEvent>) -> Subscription {
        self.core.on_presence(callback)
    }

    async fn track(&self, participant: &Participant) -> Result<(), TransportError> {
        let hub = self.require_subscribed()?;
        hub.track(self, participant);
        Ok(())
    }

    async fn untrack(&self) -> Result<(), TransportError> {
        if let Ok(hub) = self.hub() {
            hub.untrack(self);
        }
        Ok(())
    }

    fn presence_state(&self) -> Vec<Participant> {
        self.core.presence_state()
    }

    async fn disconnect(&self) {
        if let Ok(hub) = self.hub() {
            hub.leave(self);
        }
        self.core.set_status(ChannelStatus::Closed);
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
