//! Cross-device relay — polling sync through a shared durable store.
//!
//! DESIGN
//! ======
//! Devices share no bus, so every write is an independent request against a
//! `DurableStore` and every device re-reads bounded windows on a fixed
//! interval: participants seen within `remote_liveness`, the newest
//! `message_history` messages, and the newest `remote_stroke_window`
//! strokes. Each successful poll republishes the fetched view whole; there
//! is no client-side delta.
//!
//! Own message/stroke/participant writes are overlaid on the published view
//! as soon as they are issued and stay overlaid until a poll returns them
//! (or the write fails), so this tier shows a caller its own writes before
//! the store round trip completes.
//!
//! ERROR HANDLING
//! ==============
//! A failed write is logged and dropped from the overlay. A poll where any
//! of the three reads fails is logged and publishes nothing; the schedule
//! continues and the next cycle retries. Retention runs every
//! `cleanup_interval` and failures there are only logged.

pub mod memory;
pub mod postgres;
pub mod store;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use crate::config::{SyncConfig, duration_ms};
use crate::listeners::{Callback, Listeners, Subscription, lock};
use crate::model::{
    BoardItem, ChatMessage, Participant, Stroke, SyncSnapshot, generate_id, now_ms, push_unique, retain_last,
    sort_participants,
};
use crate::scheduler::Scheduler;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{DurableStore, MessageRow, ParticipantRow, PruneReport, StoreError, StrokeRow};

/// An own write overlaid on the fetched view. `acked` holds the ack
/// sequence number once the store accepted it.
#[derive(Clone)]
struct Pending<T> {
    item: T,
    acked: Option<u64>,
}

impl<T> Pending<T> {
    fn new(item: T) -> Self {
        Self { item, acked: None }
    }
}

#[derive(Default)]
struct CrossState {
    /// Last successfully fetched view.
    remote: SyncSnapshot,
    pending_participants: BTreeMap<String, Pending<Participant>>,
    pending_messages: Vec<Pending<ChatMessage>>,
    pending_strokes: Vec<Pending<Stroke>>,
    ack_seq: u64,
}

impl CrossState {
    fn view(&self, config: &SyncConfig) -> SyncSnapshot {
        let mut participants = self.remote.participants.clone();
        for own in self.pending_participants.values().map(|p| &p.item) {
            match participants.iter_mut().find(|p| p.id == own.id) {
                Some(existing) => *existing = own.clone(),
                None => participants.push(own.clone()),
            }
        }
        sort_participants(&mut participants);

        SyncSnapshot {
            participants,
            messages: overlay(&self.remote.messages, &self.pending_messages, config.message_history),
            strokes: overlay(&self.remote.strokes, &self.pending_strokes, config.remote_stroke_window),
        }
    }

    fn next_ack(&mut self) -> u64 {
        self.ack_seq += 1;
        self.ack_seq
    }

    /// Drop overlay entries the store has returned, and entries acked
    /// before the poll began (deleted or aged out since).
    fn settle(&mut self, poll_started: u64) {
        let settled = |acked: Option<u64>| acked.is_some_and(|seq| seq <= poll_started);

        let seen: HashSet<&str> = self.remote.participants.iter().map(|p| p.id.as_str()).collect();
        self.pending_participants
            .retain(|id, p| !seen.contains(id.as_str()) && !settled(p.acked));
        let seen: HashSet<&str> = self.remote.messages.iter().map(|m| m.id.as_str()).collect();
        self.pending_messages
            .retain(|p| !seen.contains(p.item.id.as_str()) && !settled(p.acked));
        let seen: HashSet<&str> = self.remote.strokes.iter().map(|s| s.id.as_str()).collect();
        self.pending_strokes
            .retain(|p| !seen.contains(p.item.id.as_str()) && !settled(p.acked));
    }
}

fn overlay<T: BoardItem>(fetched: &[T], pending: &[Pending<T>], cap: usize) -> Vec<T> {
    let mut out = fetched.to_vec();
    for p in pending {
        push_unique(&mut out, p.item.clone());
    }
    out.sort_by_key(|item| item.timestamp());
    retain_last(&mut out, cap);
    out
}

/// Mark the pending entry with `id` as accepted by the store.
fn ack<T: BoardItem>(pending: &mut [Pending<T>], id: &str, seq: u64) {
    if let Some(p) = pending.iter_mut().find(|p| p.item.key() == id) {
        p.acked = Some(seq);
    }
}

struct CrossInner {
    device_id: String,
    store: Arc<dyn DurableStore>,
    config: SyncConfig,
    state: Mutex<CrossState>,
    listeners: Listeners<SyncSnapshot>,
    scheduler: Scheduler,
}

/// Handle on this device's cross-device relay. Clones share the relay.
#[derive(Clone)]
pub struct CrossDeviceRelay {
    inner: Arc<CrossInner>,
}

impl CrossDeviceRelay {
    /// Create the relay and start polling (first poll immediately) and
    /// periodic retention.
    #[must_use]
    pub fn start(store: Arc<dyn DurableStore>, config: &SyncConfig) -> Self {
        let relay = Self::detached(store, config);
        relay.spawn_poll();
        relay.spawn_cleanup();
        info!(device = %relay.inner.device_id, "cross-device relay: started");
        relay
    }

    /// Create the relay without any background jobs; `poll` and `cleanup`
    /// must be driven by the caller.
    #[must_use]
    pub fn detached(store: Arc<dyn DurableStore>, config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(CrossInner {
                device_id: generate_id("device"),
                store,
                config: *config,
                state: Mutex::new(CrossState::default()),
                listeners: Listeners::new(),
                scheduler: Scheduler::new(),
            }),
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Upsert a participant, stamping `last_seen` with now.
    pub async fn add_participant(&self, participant: &Participant) {
        let mut participant = participant.clone();
        participant.last_seen = now_ms();
        participant.source = None;
        let row = ParticipantRow::from_participant(&participant, &self.inner.device_id);
        let id = participant.id.clone();
        self.overlay_write(|state| {
            state.pending_participants.insert(id.clone(), Pending::new(participant));
        });

        let result = self.inner.store.upsert_participant(row).await;
        let mut state = lock(&self.inner.state);
        match result {
            Ok(()) => {
                let seq = state.next_ack();
                if let Some(p) = state.pending_participants.get_mut(&id) {
                    p.acked = Some(seq);
                }
            }
            Err(e) => {
                warn!(error = %e, participant = %id, "cross-device relay: participant upsert failed");
                state.pending_participants.remove(&id);
                drop(state);
                self.notify();
            }
        }
    }

    /// Delete a participant so other devices stop seeing it before the
    /// liveness window lapses.
    pub async fn remove_participant(&self, id: &str) {
        self.overlay_write(|state| {
            state.pending_participants.remove(id);
            state.remote.participants.retain(|p| p.id != id);
        });
        if let Err(e) = self.inner.store.delete_participant(id).await {
            warn!(error = %e, participant = %id, "cross-device relay: participant delete failed");
        }
    }

    pub async fn add_message(&self, message: &ChatMessage) {
        let row = MessageRow::from_message(message, &self.inner.device_id);
        let cap = self.inner.config.message_history;
        self.overlay_write(|state| {
            if !state.pending_messages.iter().any(|p| p.item.id == message.id) {
                state.pending_messages.push(Pending::new(message.clone()));
            }
            retain_last(&mut state.pending_messages, cap);
        });

        let result = self.inner.store.insert_message(row).await;
        let mut state = lock(&self.inner.state);
        match result {
            Ok(()) => {
                let seq = state.next_ack();
                ack(&mut state.pending_messages, &message.id, seq);
            }
            Err(e) => {
                warn!(error = %e, message = %message.id, "cross-device relay: message insert failed");
                state.pending_messages.retain(|p| p.item.id != message.id);
                drop(state);
                self.notify();
            }
        }
    }

    pub async fn add_stroke(&self, stroke: &Stroke) {
        let cap = self.inner.config.remote_stroke_window;
        self.overlay_write(|state| {
            if !state.pending_strokes.iter().any(|p| p.item.id == stroke.id) {
                state.pending_strokes.push(Pending::new(stroke.clone()));
            }
            retain_last(&mut state.pending_strokes, cap);
        });

        let result = match StrokeRow::from_stroke(stroke, &self.inner.device_id) {
            Ok(row) => self.inner.store.insert_stroke(row).await,
            Err(e) => Err(e),
        };
        let mut state = lock(&self.inner.state);
        match result {
            Ok(()) => {
                let seq = state.next_ack();
                ack(&mut state.pending_strokes, &stroke.id, seq);
            }
            Err(e) => {
                warn!(error = %e, stroke = %stroke.id, "cross-device relay: stroke insert failed");
                state.pending_strokes.retain(|p| p.item.id != stroke.id);
                drop(state);
                self.notify();
            }
        }
    }

    pub async fn clear_strokes(&self) {
        self.overlay_write(|state| {
            state.pending_strokes.clear();
            state.remote.strokes.clear();
        });
        match self.inner.store.clear_strokes().await {
            Ok(removed) => debug!(removed, "cross-device relay: strokes cleared"),
            Err(e) => warn!(error = %e, "cross-device relay: stroke clear failed"),
        }
    }

    // =========================================================================
    // POLL & RETENTION
    // =========================================================================

    /// Fetch all three windows and republish. Returns `false` (and
    /// publishes nothing) if any read failed.
    pub async fn poll(&self) -> bool {
        let config = &self.inner.config;
        let store = &self.inner.store;
        let since = now_ms() - duration_ms(config.remote_liveness);
        let started = lock(&self.inner.state).ack_seq;

        let participants = store.fetch_active_participants(since).await;
        let messages = store.fetch_recent_messages(config.message_history).await;
        let strokes = store.fetch_recent_strokes(config.remote_stroke_window).await;

        let (participants, messages, strokes) = match (participants, messages, strokes) {
            (Ok(p), Ok(m), Ok(s)) => (p, m, s),
            (p, m, s) => {
                for e in [p.err(), m.err(), s.err()].into_iter().flatten() {
                    warn!(error = %e, device = %self.inner.device_id, "cross-device relay: poll failed");
                }
                return false;
            }
        };

        let mut decoded = Vec::with_capacity(strokes.len());
        for row in strokes {
            let id = row.id.clone();
            match row.into_stroke() {
                Ok(stroke) => decoded.push(stroke),
                Err(e) => warn!(error = %e, stroke = %id, "cross-device relay: skipping undecodable stroke"),
            }
        }

        {
            let mut state = lock(&self.inner.state);
            state.remote = SyncSnapshot {
                participants: participants.into_iter().map(ParticipantRow::into_participant).collect(),
                messages: messages.into_iter().map(MessageRow::into_message).collect(),
                strokes: decoded,
            };
            state.settle(started);
        }
        self.notify();
        true
    }

    /// Apply retention to the durable store as of now.
    pub async fn cleanup(&self) -> Option<PruneReport> {
        match self.inner.store.prune(&self.inner.config.retention, now_ms()).await {
            Ok(report) => {
                if report != PruneReport::default() {
                    info!(
                        participants = report.participants,
                        messages = report.messages,
                        strokes = report.strokes,
                        "cross-device relay: retention pruned rows"
                    );
                }
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "cross-device relay: retention failed");
                None
            }
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Last fetched view with own pending writes overlaid.
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        lock(&self.inner.state).view(&self.inner.config)
    }

    /// Register for published views. The callback runs immediately with the
    /// current view.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&SyncSnapshot) + Send + Sync + 'static,
    {
        let callback: Callback<SyncSnapshot> = Arc::new(f);
        let sub = self.inner.listeners.subscribe_callback(Arc::clone(&callback));
        callback(&self.snapshot());
        sub
    }

    /// Cancel polling and retention.
    pub fn stop(&self) {
        self.inner.scheduler.cancel_all();
        debug!(device = %self.inner.device_id, "cross-device relay: stopped");
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn overlay_write<F>(&self, apply: F)
    where
        F: FnOnce(&mut CrossState),
    {
        apply(&mut lock(&self.inner.state));
        self.notify();
    }

    fn notify(&self) {
        let view = self.snapshot();
        self.inner.listeners.notify(&view);
    }

    fn spawn_poll(&self) {
        let weak: Weak<CrossInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.every_now("cross-device:poll", self.inner.config.poll_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    CrossDeviceRelay { inner }.poll().await;
                }
            }
        });
    }

    fn spawn_cleanup(&self) {
        let weak: Weak<CrossInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.every("cross-device:cleanup", self.inner.config.cleanup_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    CrossDeviceRelay { inner }.cleanup().await;
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
