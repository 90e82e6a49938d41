//! Local multi-surface relay — same-device sync without a network hop.
//!
//! DESIGN
//! ======
//! Each execution context (tab, window, embedded surface) owns one
//! `LocalRelay` with a random `tab-…` context id. Contexts on the same
//! device share a `LocalBus` and a `SnapshotStore`.
//!
//! Every local mutation runs in a fixed order: apply to the in-memory
//! state, publish on the bus, persist the snapshot, then notify
//! subscribers. The originating context is therefore up to date whether or
//! not any peer hears the broadcast. Bus messages carrying our own context
//! id are dropped on receipt.
//!
//! LIVENESS
//! ========
//! On start the persisted snapshot is loaded with a generous window
//! (`load_liveness`); afterwards a sweep every `sweep_interval` evicts
//! participants not renewed within `local_liveness` and re-broadcasts each
//! eviction so peers converge. A participant update received from a peer is
//! stamped with the receive time.
//!
//! ERROR HANDLING
//! ==============
//! Snapshot load/save failures are logged and ignored; the bus and the
//! in-memory state keep working.

pub mod bus;
pub mod snapshot;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config::{SyncConfig, duration_ms};
use crate::listeners::{Listeners, Subscription, lock};
use crate::model::{
    ChatMessage, Participant, Stroke, SyncSnapshot, generate_id, now_ms, push_unique, retain_last,
    sort_participants,
};
use crate::scheduler::Scheduler;

pub use bus::{BusEvent, BusMessage, LocalBus};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, PersistedSnapshot, SnapshotError, SnapshotStore};

#[derive(Default)]
struct RelayState {
    participants: BTreeMap<String, Participant>,
    messages: Vec<ChatMessage>,
    strokes: Vec<Stroke>,
}

impl RelayState {
    fn view(&self) -> SyncSnapshot {
        let mut participants: Vec<Participant> = self.participants.values().cloned().collect();
        sort_participants(&mut participants);
        SyncSnapshot { participants, strokes: self.strokes.clone(), messages: self.messages.clone() }
    }

    fn persisted(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            participants: self.participants.clone(),
            messages: self.messages.clone(),
            strokes: self.strokes.clone(),
        }
    }
}

struct RelayInner {
    context_id: String,
    bus: LocalBus,
    store: Arc<dyn SnapshotStore>,
    config: SyncConfig,
    state: Mutex<RelayState>,
    listeners: Listeners<SyncSnapshot>,
    scheduler: Scheduler,
}

/// Handle on one context's relay. Clones share the same relay.
#[derive(Clone)]
pub struct LocalRelay {
    inner: Arc<RelayInner>,
}

impl LocalRelay {
    /// Load the persisted snapshot, attach to the bus, and start the sweep.
    #[must_use]
    pub fn start(bus: LocalBus, store: Arc<dyn SnapshotStore>, config: &SyncConfig) -> Self {
        let context_id = generate_id("tab");
        let state = load_state(store.as_ref(), config, now_ms());
        info!(
            %context_id,
            participants = state.participants.len(),
            messages = state.messages.len(),
            strokes = state.strokes.len(),
            "local relay: started"
        );

        let rx = bus.subscribe();
        let relay = Self {
            inner: Arc::new(RelayInner {
                context_id,
                bus,
                store,
                config: *config,
                state: Mutex::new(state),
                listeners: Listeners::new(),
                scheduler: Scheduler::new(),
            }),
        };
        relay.spawn_bus_listener(rx);
        relay.spawn_sweep();
        relay
    }

    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.inner.context_id
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Insert or refresh a participant, stamping `last_seen` with now.
    pub fn add_participant(&self, participant: &Participant) {
        let mut participant = participant.clone();
        participant.last_seen = now_ms();
        participant.source = None;
        self.mutate(BusEvent::ParticipantUpdate(participant.clone()), |state| {
            state.participants.insert(participant.id.clone(), participant);
            true
        });
    }

    pub fn remove_participant(&self, id: &str) {
        self.mutate(BusEvent::ParticipantRemove { id: id.to_owned() }, |state| {
            state.participants.remove(id).is_some()
        });
    }

    /// Append a message. Returns `false` if its id is already present.
    pub fn add_message(&self, message: &ChatMessage) -> bool {
        let cap = self.inner.config.message_history;
        self.mutate(BusEvent::MessageAdd(message.clone()), |state| {
            let added = push_unique(&mut state.messages, message.clone());
            retain_last(&mut state.messages, cap);
            added
        })
    }

    /// Append a stroke. Returns `false` if its id is already present.
    pub fn add_stroke(&self, stroke: &Stroke) -> bool {
        let cap = self.inner.config.local_stroke_history;
        self.mutate(BusEvent::StrokeAdd(stroke.clone()), |state| {
            let added = push_unique(&mut state.strokes, stroke.clone());
            retain_last(&mut state.strokes, cap);
            added
        })
    }

    pub fn clear_strokes(&self) {
        self.mutate(BusEvent::StrokesClear, |state| {
            state.strokes.clear();
            true
        });
    }

    /// Evict participants not renewed within the liveness window as of
    /// `now`. Returns the evicted ids.
    pub fn sweep(&self, now: i64) -> Vec<String> {
        let window = duration_ms(self.inner.config.local_liveness);
        let evicted: Vec<String> = {
            let mut state = lock(&self.inner.state);
            let stale: Vec<String> = state
                .participants
                .values()
                .filter(|p| p.is_stale(now, window))
                .map(|p| p.id.clone())
                .collect();
            for id in &stale {
                state.participants.remove(id);
                self.publish(BusEvent::ParticipantRemove { id: id.clone() });
            }
            if !stale.is_empty() {
                self.persist(&state);
            }
            stale
        };

        if !evicted.is_empty() {
            info!(context = %self.inner.context_id, count = evicted.len(), "local relay: evicted inactive participants");
            self.notify();
        }
        evicted
    }

    // =========================================================================
    // READS
    // =========================================================================

    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        lock(&self.inner.state).view()
    }

    /// Register for state changes. The callback runs immediately with the
    /// current state.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&SyncSnapshot) + Send + Sync + 'static,
    {
        let callback: crate::listeners::Callback<SyncSnapshot> = Arc::new(f);
        let sub = self.inner.listeners.subscribe_callback(Arc::clone(&callback));
        callback(&self.snapshot());
        sub
    }

    /// Cancel the sweep and detach from the bus.
    pub fn stop(&self) {
        self.inner.scheduler.cancel_all();
        debug!(context = %self.inner.context_id, "local relay: stopped");
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Apply, broadcast, persist, notify. `apply` reports whether anything
    /// changed; nothing is broadcast or persisted otherwise.
    fn mutate<F>(&self, event: BusEvent, apply: F) -> bool
    where
        F: FnOnce(&mut RelayState) -> bool,
    {
        {
            let mut state = lock(&self.inner.state);
            if !apply(&mut state) {
                return false;
            }
            self.publish(event);
            self.persist(&state);
        }
        self.notify();
        true
    }

    fn publish(&self, event: BusEvent) {
        let message = BusMessage { event, origin_context_id: self.inner.context_id.clone(), timestamp: now_ms() };
        self.inner.bus.publish(message);
    }

    fn persist(&self, state: &RelayState) {
        if let Err(e) = self.inner.store.save(&state.persisted()) {
            warn!(error = %e, context = %self.inner.context_id, "local relay: snapshot save failed");
        }
    }

    fn notify(&self) {
        let view = self.snapshot();
        self.inner.listeners.notify(&view);
    }

    fn apply_remote(&self, message: BusMessage) {
        if message.origin_context_id == self.inner.context_id {
            return;
        }
        debug!(
            context = %self.inner.context_id,
            from = %message.origin_context_id,
            kind = message.event.kind(),
            "local relay: bus message"
        );

        let config = &self.inner.config;
        {
            let mut state = lock(&self.inner.state);
            match message.event {
                BusEvent::ParticipantUpdate(mut participant) => {
                    participant.last_seen = now_ms();
                    state.participants.insert(participant.id.clone(), participant);
                }
                BusEvent::ParticipantRemove { id } => {
                    state.participants.remove(&id);
                }
                BusEvent::MessageAdd(msg) => {
                    push_unique(&mut state.messages, msg);
                    retain_last(&mut state.messages, config.message_history);
                }
                BusEvent::StrokeAdd(stroke) => {
                    push_unique(&mut state.strokes, stroke);
                    retain_last(&mut state.strokes, config.local_stroke_history);
                }
                BusEvent::StrokesClear => state.strokes.clear(),
            }
            self.persist(&state);
        }
        self.notify();
    }

    fn spawn_bus_listener(&self, mut rx: tokio::sync::broadcast::Receiver<BusMessage>) {
        let weak: Weak<RelayInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.spawn("local-relay:bus", async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        let Some(inner) = weak.upgrade() else { break };
                        LocalRelay { inner }.apply_remote(message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "local relay: bus lagged; messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_sweep(&self) {
        let weak: Weak<RelayInner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.every("local-relay:sweep", self.inner.config.sweep_interval, move || {
            if let Some(inner) = weak.upgrade() {
                LocalRelay { inner }.sweep(now_ms());
            }
            std::future::ready(())
        });
    }
}

/// Seed state from the persisted snapshot, keeping participants seen
/// within the load window.
fn load_state(store: &dyn SnapshotStore, config: &SyncConfig, now: i64) -> RelayState {
    let persisted = match store.load() {
        Ok(Some(persisted)) => persisted,
        Ok(None) => return RelayState::default(),
        Err(e) => {
            warn!(error = %e, "local relay: snapshot load failed; starting empty");
            return RelayState::default();
        }
    };

    let window = duration_ms(config.load_liveness);
    let participants = persisted
        .participants
        .into_iter()
        .filter(|(_, p)| !p.is_stale(now, window))
        .collect();
    let mut messages = persisted.messages;
    retain_last(&mut messages, config.message_history);
    let mut strokes = persisted.strokes;
    retain_last(&mut strokes, config.local_stroke_history);

    RelayState { participants, messages, strokes }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
