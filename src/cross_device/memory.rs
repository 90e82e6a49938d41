//! In-process durable store with failure injection.
//!
//! Behaves like the Postgres store: id-keyed upserts and inserts, newest-N
//! windows returned oldest first, retention by age and count. Reads and
//! writes can be made to fail independently.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::store::{DurableStore, MessageRow, ParticipantRow, PruneReport, StoreError, StrokeRow};
use crate::config::{RetentionPolicy, duration_ms};
use crate::listeners::lock;
use crate::model::now_ms;

#[derive(Default)]
struct Tables {
    /// id -> (registration time, row)
    participants: BTreeMap<String, (i64, ParticipantRow)>,
    messages: Vec<MessageRow>,
    strokes: Vec<StrokeRow>,
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

/// Shared in-memory store. Clones see the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Read queries attempted so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Write requests attempted so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        lock(&self.inner.tables).participants.len()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        lock(&self.inner.tables).messages.len()
    }

    #[must_use]
    pub fn stroke_count(&self) -> usize {
        lock(&self.inner.tables).strokes.len()
    }

    fn read(&self) -> Result<(), StoreError> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn write(&self) -> Result<(), StoreError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

/// Newest `limit` rows by `created_at` (stable on ties), oldest first.
fn newest<T: Clone>(rows: &[T], limit: usize, created_at: impl Fn(&T) -> i64) -> Vec<T> {
    let mut ordered: Vec<&T> = rows.iter().collect();
    ordered.sort_by_key(|row| created_at(row));
    let skip = ordered.len().saturating_sub(limit);
    ordered.into_iter().skip(skip).cloned().collect()
}

/// Drop all but the newest `keep` rows. Returns how many were removed.
fn keep_newest<T: Clone>(rows: &mut Vec<T>, keep: usize, created_at: impl Fn(&T) -> i64) -> u64 {
    let before = rows.len();
    *rows = newest(rows, keep, created_at);
    u64::try_from(before - rows.len()).unwrap_or(u64::MAX)
}

#[async_trait::async_trait]
impl DurableStore for MemoryStore {
    async fn upsert_participant(&self, row: ParticipantRow) -> Result<(), StoreError> {
        self.write()?;
        let mut tables = lock(&self.inner.tables);
        let registered = tables.participants.get(&row.id).map_or_else(now_ms, |(created, _)| *created);
        tables.participants.insert(row.id.clone(), (registered, row));
        Ok(())
    }

    async fn delete_participant(&self, id: &str) -> Result<(), StoreError> {
        self.write()?;
        lock(&self.inner.tables).participants.remove(id);
        Ok(())
    }

    async fn insert_message(&self, row: MessageRow) -> Result<(), StoreError> {
        self.write()?;
        let mut tables = lock(&self.inner.tables);
        if !tables.messages.iter().any(|m| m.id == row.id) {
            tables.messages.push(row);
        }
        Ok(())
    }

    async fn insert_stroke(&self, row: StrokeRow) -> Result<(), StoreError> {
        self.write()?;
        let mut tables = lock(&self.inner.tables);
        if !tables.strokes.iter().any(|s| s.id == row.id) {
            tables.strokes.push(row);
        }
        Ok(())
    }

    async fn clear_strokes(&self) -> Result<u64, StoreError> {
        self.write()?;
        let mut tables = lock(&self.inner.tables);
        let removed = tables.strokes.len();
        tables.strokes.clear();
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn fetch_active_participants(&self, since: i64) -> Result<Vec<ParticipantRow>, StoreError> {
        self.read()?;
        let tables = lock(&self.inner.tables);
        let mut active: Vec<&(i64, ParticipantRow)> =
            tables.participants.values().filter(|(_, row)| row.last_seen >= since).collect();
        active.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(active.into_iter().map(|(_, row)| row.clone()).collect())
    }

    async fn fetch_recent_messages(&self, limit: usize) -> Result<Vec<MessageRow>, StoreError> {
        self.read()?;
        Ok(newest(&lock(&self.inner.tables).messages, limit, |m| m.created_at))
    }

    async fn fetch_recent_strokes(&self, limit: usize) -> Result<Vec<StrokeRow>, StoreError> {
        self.read()?;
        Ok(newest(&lock(&self.inner.tables).strokes, limit, |s| s.created_at))
    }

    async fn prune(&self, policy: &RetentionPolicy, now: i64) -> Result<PruneReport, StoreError> {
        self.write()?;
        let cutoff = now - duration_ms(policy.participant_ttl);
        let mut tables = lock(&self.inner.tables);

        let before = tables.participants.len();
        tables.participants.retain(|_, (_, row)| row.last_seen >= cutoff);
        let participants = u64::try_from(before - tables.participants.len()).unwrap_or(u64::MAX);

        let messages = keep_newest(&mut tables.messages, policy.max_messages, |m| m.created_at);
        let strokes = keep_newest(&mut tables.strokes, policy.max_strokes, |s| s.created_at);

        Ok(PruneReport { participants, messages, strokes })
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
