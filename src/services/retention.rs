//! Retention service — periodic pruning of the durable cross-device store.
//!
//! DESIGN
//! ======
//! A background task wakes every cleanup interval and applies the retention
//! policy: stale participants are deleted and the message and stroke tables
//! are cut back to their newest rows. A failed pass is logged and the next
//! tick tries again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::RetentionPolicy;
use crate::cross_device::{DurableStore, PruneReport};
use crate::model::now_ms;

/// Spawn the background retention task. Returns a handle for shutdown.
pub fn spawn_retention_task(store: Arc<dyn DurableStore>, policy: RetentionPolicy, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            prune_once(store.as_ref(), &policy).await;
        }
    })
}

/// Run one retention pass. `None` when the store rejected it.
pub async fn prune_once(store: &dyn DurableStore, policy: &RetentionPolicy) -> Option<PruneReport> {
    match store.prune(policy, now_ms()).await {
        Ok(report) => {
            if report != PruneReport::default() {
                info!(
                    participants = report.participants,
                    messages = report.messages,
                    strokes = report.strokes,
                    "retention pass pruned rows"
                );
            }
            Some(report)
        }
        Err(e) => {
            error!(error = %e, "retention pass failed");
            None
        }
    }
}

#[cfg(test)]
#[path = "retention_test.rs"]
mod tests;
