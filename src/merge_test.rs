use super::*;
use crate::cross_device::MemoryStore;
use crate::local_relay::{LocalBus, MemorySnapshotStore};
use crate::model::Point;

fn participant(id: &str, color: &str) -> Participant {
    Participant {
        id: id.into(),
        display_name: id.into(),
        color: color.into(),
        cursor: None,
        last_seen: 0,
        source: None,
    }
}

fn stroke(id: &str, timestamp: i64) -> Stroke {
    Stroke { id: id.into(), points: vec![Point { x: 0.0, y: 0.0 }], color: "#000".into(), thickness: 1.0, timestamp }
}

fn message(id: &str, content: &str, timestamp: i64) -> ChatMessage {
    ChatMessage {
        id: id.into(),
        author_id: "u1".into(),
        author_name: "u1".into(),
        author_color: "#f00".into(),
        content: content.into(),
        timestamp,
    }
}

#[test]
fn same_device_wins_and_gaps_are_filled() {
    let local = SyncSnapshot { participants: vec![participant("u1", "#f00")], ..SyncSnapshot::default() };
    let remote = SyncSnapshot {
        participants: vec![participant("u1", "#00f"), participant("u2", "#0f0")],
        ..SyncSnapshot::default()
    };

    let merged = merge(&local, &remote);
    assert_eq!(merged.participants.len(), 2);
    let u1 = merged.participants.iter().find(|p| p.id == "u1").expect("u1");
    let u2 = merged.participants.iter().find(|p| p.id == "u2").expect("u2");
    assert_eq!(u1.color, "#f00");
    assert_eq!(u1.source, Some(Source::SameDevice));
    assert_eq!(u2.color, "#0f0");
    assert_eq!(u2.source, Some(Source::MultiDevice));
}

#[test]
fn merge_is_idempotent() {
    let local = SyncSnapshot {
        participants: vec![participant("user-2-b", "#f00")],
        strokes: vec![stroke("s2", 20), stroke("s1", 10)],
        messages: vec![message("m1", "local", 5)],
    };
    let remote = SyncSnapshot {
        participants: vec![participant("user-1-a", "#0f0"), participant("user-2-b", "#00f")],
        strokes: vec![stroke("s3", 15), stroke("s1", 10)],
        messages: vec![message("m1", "remote", 5), message("m2", "other", 3)],
    };

    let once = merge(&local, &remote);
    let twice = merge(&once, &remote);
    assert_eq!(once, twice);
    assert_eq!(serde_json::to_string(&once).expect("json"), serde_json::to_string(&twice).expect("json"));
}

#[test]
fn duplicates_collapse_and_sort_by_timestamp() {
    let local = SyncSnapshot { strokes: vec![stroke("s2", 20), stroke("s1", 10)], ..SyncSnapshot::default() };
    let remote = SyncSnapshot { strokes: vec![stroke("s1", 10), stroke("s3", 15)], ..SyncSnapshot::default() };

    let merged = merge(&local, &remote);
    let ids: Vec<&str> = merged.strokes.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s3", "s2"]);
}

#[test]
fn local_message_wins_on_same_id() {
    let local = SyncSnapshot { messages: vec![message("m1", "local", 1)], ..SyncSnapshot::default() };
    let remote = SyncSnapshot { messages: vec![message("m1", "remote", 1)], ..SyncSnapshot::default() };
    assert_eq!(merge(&local, &remote).messages[0].content, "local");
}

#[test]
fn participants_are_ordered_by_creation() {
    let local = SyncSnapshot { participants: vec![participant("user-30-c", "#f00")], ..SyncSnapshot::default() };
    let remote = SyncSnapshot {
        participants: vec![participant("user-20-b", "#0f0"), participant("user-10-a", "#00f")],
        ..SyncSnapshot::default()
    };
    let ids: Vec<String> = merge(&local, &remote).participants.into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["user-10-a", "user-20-b", "user-30-c"]);
}

#[tokio::test]
async fn hybrid_relay_fans_out_and_merges() {
    let config = SyncConfig::default();
    let bus = LocalBus::default();
    let store = MemoryStore::new();
    let local = LocalRelay::start(bus, Arc::new(MemorySnapshotStore::new()), &config);
    let remote = CrossDeviceRelay::detached(Arc::new(store.clone()), &config);
    let hybrid = HybridRelay::new(Some(local.clone()), Some(remote.clone()), &config);

    let s = Stroke::new(vec![Point { x: 1.0, y: 1.0 }], "#000", 2.0);
    hybrid.add_stroke(&s).await;

    assert_eq!(local.snapshot().strokes.len(), 1);
    assert_eq!(store.stroke_count(), 1);
    assert_eq!(hybrid.snapshot().strokes, vec![s]);

    remote.poll().await;
    assert_eq!(hybrid.snapshot().strokes.len(), 1);
}

#[tokio::test]
async fn hybrid_relay_sees_other_device_through_store() {
    let config = SyncConfig::default();
    let store = MemoryStore::new();
    let ours = CrossDeviceRelay::detached(Arc::new(store.clone()), &config);
    let theirs = CrossDeviceRelay::detached(Arc::new(store), &config);
    let local = LocalRelay::start(LocalBus::default(), Arc::new(MemorySnapshotStore::new()), &config);
    let hybrid = HybridRelay::new(Some(local), Some(ours.clone()), &config);

    let me = Participant::new("me", "#f00");
    let them = Participant::new("them", "#0f0");
    hybrid.add_participant(&me).await;
    theirs.add_participant(&them).await;
    ours.poll().await;

    let merged = hybrid.snapshot();
    assert_eq!(merged.participants.len(), 2);
    let mine = merged.participants.iter().find(|p| p.id == me.id).expect("me");
    let other = merged.participants.iter().find(|p| p.id == them.id).expect("them");
    assert_eq!(mine.source, Some(Source::SameDevice));
    assert_eq!(other.source, Some(Source::MultiDevice));
}

#[tokio::test]
async fn hybrid_relay_works_with_one_side() {
    let config = SyncConfig::default();
    let local = LocalRelay::start(LocalBus::default(), Arc::new(MemorySnapshotStore::new()), &config);
    let hybrid = HybridRelay::new(Some(local), None, &config);
    let author = Participant::new("alice", "#f00");
    hybrid.add_message(&ChatMessage::from_participant(&author, "hi").expect("message")).await;
    assert_eq!(hybrid.snapshot().messages.len(), 1);
    assert!(hybrid.remote().is_none());
}

#[tokio::test]
async fn stopped_hybrid_relay_ignores_inputs() {
    let config = SyncConfig::default();
    let local = LocalRelay::start(LocalBus::default(), Arc::new(MemorySnapshotStore::new()), &config);
    let hybrid = HybridRelay::new(Some(local.clone()), None, &config);
    hybrid.stop();
    local.add_stroke(&Stroke::new(vec![], "#000", 1.0));
    assert!(hybrid.snapshot().strokes.is_empty());
}
