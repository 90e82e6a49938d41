//! Capacity gate — deterministic admission under a participant ceiling.
//!
//! DESIGN
//! ======
//! Every client runs the same pure rule over the participant set it
//! currently sees: order by the creation timestamp embedded in the id
//! (oldest first, id as tie-break) and admit the first `limit`. A client
//! that finds itself outside the admitted prefix is blocked and withdraws
//! its own presence; nobody evicts anyone else.
//!
//! TRADE-OFFS
//! ==========
//! Enforcement is voluntary and symmetric. Two partitions that cannot see
//! each other may each admit `limit` participants; the gate does not try to
//! arbitrate that. A blocked client is re-admitted as soon as its view of
//! the older participants shrinks.

use std::sync::{Arc, Mutex};

use crate::listeners::{Listeners, Subscription, lock};
use crate::model::{Participant, sort_participants};

/// Result of one admission pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapacityDecision {
    /// Admitted participants, oldest first.
    pub admitted: Vec<Participant>,
    /// True if the local participant is outside the admitted prefix.
    pub is_blocked: bool,
}

/// Admit the oldest `limit` participants of `participants ∪ {local}`.
///
/// When `local` appears in `participants` the listed copy is replaced by
/// `local` so the caller's freshest state is used.
#[must_use]
pub fn admit(participants: &[Participant], local: &Participant, limit: usize) -> CapacityDecision {
    let mut everyone: Vec<Participant> = participants.iter().filter(|p| p.id != local.id).cloned().collect();
    everyone.push(local.clone());
    sort_participants(&mut everyone);
    everyone.truncate(limit);

    let is_blocked = !everyone.iter().any(|p| p.id == local.id);
    CapacityDecision { admitted: everyone, is_blocked }
}

struct GateState {
    last: Option<CapacityDecision>,
}

/// Stateful wrapper around `admit` that reports block/unblock transitions.
#[derive(Clone)]
pub struct CapacityGate {
    limit: usize,
    state: Arc<Mutex<GateState>>,
    listeners: Listeners<bool>,
}

impl CapacityGate {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit, state: Arc::new(Mutex::new(GateState { last: None })), listeners: Listeners::new() }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Evaluate the current view. Listeners hear about changes of the
    /// blocked flag, including the first evaluation if it blocks.
    pub fn evaluate(&self, participants: &[Participant], local: &Participant) -> CapacityDecision {
        let decision = admit(participants, local, self.limit);
        let changed = {
            let mut state = lock(&self.state);
            let was_blocked = state.last.as_ref().is_some_and(|d| d.is_blocked);
            state.last = Some(decision.clone());
            was_blocked != decision.is_blocked
        };
        if changed {
            tracing::info!(
                local = %local.id,
                blocked = decision.is_blocked,
                admitted = decision.admitted.len(),
                limit = self.limit,
                "capacity: admission changed"
            );
            self.listeners.notify(&decision.is_blocked);
        }
        decision
    }

    /// Admitted set from the last evaluation.
    #[must_use]
    pub fn admitted(&self) -> Vec<Participant> {
        lock(&self.state).last.as_ref().map(|d| d.admitted.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        lock(&self.state).last.as_ref().is_some_and(|d| d.is_blocked)
    }

    /// Called with the new blocked flag whenever it flips.
    pub fn on_change<F>(&self, f: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.listeners.subscribe(f)
    }
}

#[cfg(test)]
#[path = "capacity_test.rs"]
mod tests;
