//! Cancellable scheduler for timers and background listeners.
//!
//! DESIGN
//! ======
//! Every periodic job (poll, sweep, heartbeat, cleanup), one-shot timer
//! (failover grace, retry backoff), and long-lived listener task (local
//! bus receiver) is started through a `Scheduler` and identified by a
//! `Ticket`. Teardown is one `cancel_all` call; dropping the last clone of
//! a scheduler aborts whatever is still running, so no timer outlives the
//! component that owns it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::listeners::lock;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle for one scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    next_ticket: AtomicU64,
    tasks: Mutex<HashMap<u64, ScheduledTask>>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.handle.abort();
        }
    }
}

/// Owner of a component's timers. Clones share the same task table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(SchedulerInner { next_ticket: AtomicU64::new(1), tasks: Mutex::new(HashMap::new()) }) }
    }

    /// Run `job` every `period`, first run one period from now.
    pub fn every<F, Fut>(&self, name: &'static str, period: Duration, job: F) -> Ticket
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        self.repeat(name, Instant::now() + period, period, job)
    }

    /// Run `job` now and then every `period`.
    pub fn every_now<F, Fut>(&self, name: &'static str, period: Duration, job: F) -> Ticket
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        self.repeat(name, Instant::now(), period, job)
    }

    /// Run `job` once after `delay`.
    pub fn after<F, Fut>(&self, name: &'static str, delay: Duration, job: F) -> Ticket
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(name, async move {
            tokio::time::sleep(delay).await;
            job().await;
        })
    }

    /// Run a long-lived future until it completes or is cancelled.
    pub fn spawn<Fut>(&self, name: &'static str, fut: Fut) -> Ticket
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = Ticket(self.inner.next_ticket.fetch_add(1, Ordering::Relaxed));
        let handle = tokio::spawn(fut);
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|_, task| !task.handle.is_finished());
        tasks.insert(ticket.0, ScheduledTask { name, handle });
        ticket
    }

    /// Cancel one job. Returns `false` if the ticket was unknown or already cancelled.
    pub fn cancel(&self, ticket: Ticket) -> bool {
        let Some(task) = lock(&self.inner.tasks).remove(&ticket.0) else {
            return false;
        };
        task.handle.abort();
        debug!(task = task.name, "scheduler: cancelled");
        true
    }

    /// Cancel every job owned by this scheduler.
    pub fn cancel_all(&self) {
        let drained: Vec<ScheduledTask> = lock(&self.inner.tasks).drain().map(|(_, task)| task).collect();
        for task in &drained {
            task.handle.abort();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "scheduler: cancelled all");
        }
    }

    /// Number of jobs that have not finished.
    #[must_use]
    pub fn active(&self) -> usize {
        lock(&self.inner.tasks)
            .values()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    fn repeat<F, Fut>(&self, name: &'static str, start: Instant, period: Duration, mut job: F) -> Ticket
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(name, async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                job().await;
            }
        })
    }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
