use super::*;
use std::time::Duration;

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

fn stroke(id: &str, created_at: i64) -> StrokeRow {
    StrokeRow {
        id: id.into(),
        device_id: "device-1-a".into(),
        points_blob: "[]".into(),
        color: "#000".into(),
        thickness: 1.0,
        created_at,
    }
}

#[tokio::test]
async fn upsert_replaces_by_id() {
    let store = MemoryStore::new();
    store.upsert_participant(participant("u1", 10)).await.expect("upsert");
    store.upsert_participant(participant("u1", 20)).await.expect("upsert");
    let active = store.fetch_active_participants(0).await.expect("fetch");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].last_seen, 20);
}

#[tokio::test]
async fn active_participants_respect_since() {
    let store = MemoryStore::new();
    store.upsert_participant(participant("old", 10)).await.expect("upsert");
    store.upsert_participant(participant("new", 100)).await.expect("upsert");
    let active = store.fetch_active_participants(50).await.expect("fetch");
    assert_eq!(active.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["new"]);
}

#[tokio::test]
async fn duplicate_inserts_are_ignored() {
    let store = MemoryStore::new();
    store.insert_message(message("m1", 1)).await.expect("insert");
    let mut changed = message("m1", 1);
    changed.content = "edited".into();
    store.insert_message(changed).await.expect("insert");
    store.insert_stroke(stroke("s1", 1)).await.expect("insert");
    store.insert_stroke(stroke("s1", 1)).await.expect("insert");

    let messages = store.fetch_recent_messages(10).await.expect("fetch");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "m1");
    assert_eq!(store.stroke_count(), 1);
}

#[tokio::test]
async fn recent_window_is_newest_in_ascending_order() {
    let store = MemoryStore::new();
    for (id, at) in [("c", 3), ("a", 1), ("d", 4), ("b", 2)] {
        store.insert_stroke(stroke(id, at)).await.expect("insert");
    }
    let recent = store.fetch_recent_strokes(2).await.expect("fetch");
    assert_eq!(recent.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["c", "d"]);
}

#[tokio::test]
async fn clear_strokes_reports_count() {
    let store = MemoryStore::new();
    store.insert_stroke(stroke("s1", 1)).await.expect("insert");
    store.insert_stroke(stroke("s2", 2)).await.expect("insert");
    assert_eq!(store.clear_strokes().await.expect("clear"), 2);
    assert_eq!(store.stroke_count(), 0);
}

#[tokio::test]
async fn prune_applies_age_and_count_limits() {
    let store = MemoryStore::new();
    let now = 1_000_000;
    store.upsert_participant(participant("gone", now - 301_000)).await.expect("upsert");
    store.upsert_participant(participant("kept", now - 1_000)).await.expect("upsert");
    for i in 0..5 {
        store.insert_message(message(&format!("m{i}"), i)).await.expect("insert");
        store.insert_stroke(stroke(&format!("s{i}"), i)).await.expect("insert");
    }

    let policy = RetentionPolicy { participant_ttl: Duration::from_secs(300), max_messages: 3, max_strokes: 2 };
    let report = store.prune(&policy, now).await.expect("prune");

    assert_eq!(report, PruneReport { participants: 1, messages: 2, strokes: 3 });
    let messages = store.fetch_recent_messages(10).await.expect("fetch");
    assert_eq!(messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["m2", "m3", "m4"]);
    assert_eq!(store.participant_count(), 1);
}

#[tokio::test]
async fn injected_failures_surface_as_unavailable() {
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    assert!(matches!(store.insert_stroke(stroke("s1", 1)).await, Err(StoreError::Unavailable)));
    store.set_fail_writes(false);
    store.set_fail_reads(true);
    assert!(matches!(store.fetch_recent_strokes(5).await, Err(StoreError::Unavailable)));
    assert_eq!(store.reads(), 1);
    assert_eq!(store.writes(), 1);
}
