//! Callback registry with explicit unsubscribe handles.
//!
//! DESIGN
//! ======
//! Every component that publishes state (relays, transports, the facade)
//! owns a `Listeners<T>`. `notify` snapshots the callback list under the
//! lock and invokes callbacks after releasing it, so a callback may
//! subscribe, unsubscribe, or trigger another notification without
//! deadlocking.
//!
//! A panicking callback is caught and logged; the remaining callbacks
//! still run. Dropping a `Subscription` removes its callback.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

/// Shared callback invoked with each published value.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerTable<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Registry of callbacks for values of type `T`.
pub struct Listeners<T> {
    table: Arc<Mutex<ListenerTable<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self { table: Arc::clone(&self.table) }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Listeners<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { table: Arc::new(Mutex::new(ListenerTable { next_id: 0, entries: Vec::new() })) }
    }

    /// Register a closure. The callback stays registered while the
    /// returned `Subscription` is alive.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_callback(Arc::new(callback))
    }

    /// Register an already shared callback.
    pub fn subscribe_callback(&self, callback: Callback<T>) -> Subscription {
        let id = {
            let mut table = lock(&self.table);
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push((id, callback));
            id
        };

        let weak: Weak<Mutex<ListenerTable<T>>> = Arc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = weak.upgrade() {
                lock(&table).entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invoke every registered callback with `value`.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.table)
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                error!("listener panicked; continuing with remaining listeners");
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle for a registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Remove the callback now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[path = "listeners_test.rs"]
mod tests;
