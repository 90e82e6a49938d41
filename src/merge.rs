//! Merge engine — one snapshot from the same-device and cross-device views.
//!
//! DESIGN
//! ======
//! `merge` is pure: participants, messages, and strokes are keyed by id,
//! same-device entries are inserted first and win every conflict, and
//! cross-device entries only fill gaps. Participants are tagged with the
//! tier they came from unless already tagged, and collections are
//! stable-sorted by timestamp, so `merge(merge(a, b), b) == merge(a, b)`.
//!
//! `HybridRelay` is the fallback pipeline built on top of it: it listens to
//! whichever relays it was given, re-merges whenever either side publishes,
//! and fans every write out to both.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::config::SyncConfig;
use crate::cross_device::CrossDeviceRelay;
use crate::listeners::{Callback, Listeners, Subscription, lock};
use crate::local_relay::LocalRelay;
use crate::model::{BoardItem, ChatMessage, Participant, Source, Stroke, SyncSnapshot, retain_last, sort_participants};

// =============================================================================
// PURE MERGE
// =============================================================================

/// Combine `local` (same-device, preferred) with `remote` (cross-device).
#[must_use]
pub fn merge(local: &SyncSnapshot, remote: &SyncSnapshot) -> SyncSnapshot {
    let mut participants: Vec<Participant> = Vec::with_capacity(local.participants.len());
    let mut seen: HashSet<&str> = HashSet::new();
    for (batch, tag) in [(&local.participants, Source::SameDevice), (&remote.participants, Source::MultiDevice)] {
        for p in batch {
            if seen.insert(p.id.as_str()) {
                let mut p = p.clone();
                if p.source.is_none() {
                    p.source = Some(tag);
                }
                participants.push(p);
            }
        }
    }
    sort_participants(&mut participants);

    SyncSnapshot {
        participants,
        strokes: merge_items(&local.strokes, &remote.strokes),
        messages: merge_items(&local.messages, &remote.messages),
    }
}

fn merge_items<T: BoardItem>(preferred: &[T], fallback: &[T]) -> Vec<T> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Vec<T> = Vec::with_capacity(preferred.len() + fallback.len());
    for item in preferred.iter().chain(fallback) {
        if seen.insert(item.key()) {
            out.push(item.clone());
        }
    }
    out.sort_by_key(|item| item.timestamp());
    out
}

// =============================================================================
// HYBRID RELAY
// =============================================================================

#[derive(Default)]
struct Inputs {
    local: SyncSnapshot,
    remote: SyncSnapshot,
    merged: SyncSnapshot,
}

struct HybridInner {
    local: Option<LocalRelay>,
    remote: Option<CrossDeviceRelay>,
    message_history: usize,
    inputs: Mutex<Inputs>,
    /// Held across read, merge and notify so merges publish in order.
    publishing: Mutex<()>,
    listeners: Listeners<SyncSnapshot>,
    upstream: Mutex<Vec<Subscription>>,
}

/// Fallback pipeline over a local relay, a cross-device relay, or both.
#[derive(Clone)]
pub struct HybridRelay {
    inner: Arc<HybridInner>,
}

enum Side {
    Local,
    Remote,
}

impl HybridRelay {
    /// Attach to the given relays. A missing side contributes an empty
    /// snapshot.
    #[must_use]
    pub fn new(local: Option<LocalRelay>, remote: Option<CrossDeviceRelay>, config: &SyncConfig) -> Self {
        let relay = Self {
            inner: Arc::new(HybridInner {
                local,
                remote,
                message_history: config.message_history,
                inputs: Mutex::new(Inputs::default()),
                publishing: Mutex::new(()),
                listeners: Listeners::new(),
                upstream: Mutex::new(Vec::new()),
            }),
        };

        let mut upstream = Vec::new();
        if let Some(local) = &relay.inner.local {
            let weak = Arc::downgrade(&relay.inner);
            upstream.push(local.subscribe(move |_| on_input(&weak, Side::Local)));
        }
        if let Some(remote) = &relay.inner.remote {
            let weak = Arc::downgrade(&relay.inner);
            upstream.push(remote.subscribe(move |_| on_input(&weak, Side::Remote)));
        }
        *lock(&relay.inner.upstream) = upstream;
        relay
    }

    #[must_use]
    pub fn local(&self) -> Option<&LocalRelay> {
        self.inner.local.as_ref()
    }

    #[must_use]
    pub fn remote(&self) -> Option<&CrossDeviceRelay> {
        self.inner.remote.as_ref()
    }

    // -------------------------------------------------------------------------
    // Writes: same-device first (synchronous), then the durable store.
    // -------------------------------------------------------------------------

    pub async fn add_participant(&self, participant: &Participant) {
        if let Some(local) = &self.inner.local {
            local.add_participant(participant);
        }
        if let Some(remote) = &self.inner.remote {
            remote.add_participant(participant).await;
        }
    }

    pub async fn remove_participant(&self, id: &str) {
        if let Some(local) = &self.inner.local {
            local.remove_participant(id);
        }
        if let Some(remote) = &self.inner.remote {
            remote.remove_participant(id).await;
        }
    }

    pub async fn add_message(&self, message: &ChatMessage) {
        if let Some(local) = &self.inner.local {
            local.add_message(message);
        }
        if let Some(remote) = &self.inner.remote {
            remote.add_message(message).await;
        }
    }

    pub async fn add_stroke(&self, stroke: &Stroke) {
        if let Some(local) = &self.inner.local {
            local.add_stroke(stroke);
        }
        if let Some(remote) = &self.inner.remote {
            remote.add_stroke(stroke).await;
        }
    }

    pub async fn clear_strokes(&self) {
        if let Some(local) = &self.inner.local {
            local.clear_strokes();
        }
        if let Some(remote) = &self.inner.remote {
            remote.clear_strokes().await;
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        lock(&self.inner.inputs).merged.clone()
    }

    /// Register for merged snapshots. The callback runs immediately with the
    /// current merge.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&SyncSnapshot) + Send + Sync + 'static,
    {
        let callback: Callback<SyncSnapshot> = Arc::new(f);
        let sub = self.inner.listeners.subscribe_callback(Arc::clone(&callback));
        callback(&self.snapshot());
        sub
    }

    /// Detach from both relays and stop their background jobs.
    pub fn stop(&self) {
        lock(&self.inner.upstream).clear();
        if let Some(local) = &self.inner.local {
            local.stop();
        }
        if let Some(remote) = &self.inner.remote {
            remote.stop();
        }
    }
}

/// Re-read the side that changed. Notifications can arrive out of order
/// across threads, so the relay's current view wins over the delivered one.
fn on_input(weak: &Weak<HybridInner>, side: Side) {
    let Some(inner) = weak.upgrade() else { return };
    let _publishing = lock(&inner.publishing);
    let current = match side {
        Side::Local => inner.local.as_ref().map(LocalRelay::snapshot),
        Side::Remote => inner.remote.as_ref().map(CrossDeviceRelay::snapshot),
    }
    .unwrap_or_default();
    let merged = {
        let mut inputs = lock(&inner.inputs);
        match side {
            Side::Local => inputs.local = current,
            Side::Remote => inputs.remote = current,
        }
        let mut merged = merge(&inputs.local, &inputs.remote);
        retain_last(&mut merged.messages, inner.message_history);
        inputs.merged = merged.clone();
        merged
    };
    debug!(
        participants = merged.participants.len(),
        strokes = merged.strokes.len(),
        messages = merged.messages.len(),
        "hybrid relay: merged"
    );
    inner.listeners.notify(&merged);
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod tests;
