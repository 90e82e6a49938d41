use super::*;
use crate::cross_device::{MemoryStore, MessageRow, ParticipantRow};
use crate::model::now_ms;

fn participant(id: &str, last_seen: i64) -> ParticipantRow {
    ParticipantRow {
        id: id.into(),
        display_name: id.into(),
        color: "#ef4444".into(),
        device_id: "device-1-a".into(),
        last_seen,
        cursor_x: None,
        cursor_y: None,
    }
}

fn message(id: &str, created_at: i64) -> MessageRow {
    MessageRow {
        id: id.into(),
        author_id: "user-1-a".into(),
        author_name: "alice".into(),
        author_color: "#ef4444".into(),
        content: id.into(),
        device_id: "device-1-a".into(),
        created_at,
    }
}

fn policy() -> RetentionPolicy {
    RetentionPolicy { participant_ttl: Duration::from_secs(300), max_messages: 2, max_strokes: 10 }
}

#[tokio::test]
async fn prune_once_reports_removed_rows() {
    let store = MemoryStore::new();
    let now = now_ms();
    store.upsert_participant(participant("stale", now - 600_000)).await.expect("upsert");
    store.upsert_participant(participant("fresh", now)).await.expect("upsert");
    for i in 0..4 {
        store.insert_message(message(&format!("m{i}"), i)).await.expect("insert");
    }

    let report = prune_once(&store, &policy()).await.expect("report");
    assert_eq!(report, PruneReport { participants: 1, messages: 2, strokes: 0 });
    assert_eq!(store.participant_count(), 1);
    assert_eq!(store.message_count(), 2);
}

#[tokio::test]
async fn prune_once_swallows_store_failure() {
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    assert!(prune_once(&store, &policy()).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn task_prunes_on_every_tick() {
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    let handle = spawn_retention_task(Arc::new(store.clone()), policy(), Duration::from_secs(60));

    // First tick fires immediately, then once per interval.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.writes(), 1);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(store.writes(), 3);

    handle.abort();
}
