use super::*;
use crate::model::Point;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn relay_pair() -> (LocalRelay, LocalRelay, MemorySnapshotStore) {
    let bus = LocalBus::default();
    let store = MemorySnapshotStore::new();
    let config = SyncConfig::default();
    let a = LocalRelay::start(bus.clone(), Arc::new(store.clone()), &config);
    let b = LocalRelay::start(bus, Arc::new(store.clone()), &config);
    (a, b, store)
}

fn stroke() -> Stroke {
    Stroke::new(vec![Point { x: 0.0, y: 0.0 }, Point { x: 4.0, y: 4.0 }], "#000000", 2.0)
}

fn seen_ago(name: &str, ms: i64) -> Participant {
    let mut p = Participant::new(name, "#ef4444");
    p.last_seen = now_ms() - ms;
    p
}

async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn context_ids_are_distinct() {
    let (a, b, _) = relay_pair();
    assert!(a.context_id().starts_with("tab-"));
    assert_ne!(a.context_id(), b.context_id());
}

#[tokio::test]
async fn stroke_reaches_sibling_context() {
    let (a, b, _) = relay_pair();
    let s = stroke();
    assert!(a.add_stroke(&s));
    settle().await;

    assert_eq!(b.snapshot().strokes, vec![s.clone()]);
    assert_eq!(a.snapshot().strokes, vec![s]);
}

#[tokio::test]
async fn own_broadcast_is_not_reapplied() {
    let (a, _b, _) = relay_pair();
    let notifications = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&notifications);
    let _sub = a.subscribe(move |_| {
        n.fetch_add(1, Ordering::SeqCst);
    });

    let author = Participant::new("alice", "#ef4444");
    a.add_message(&ChatMessage::from_participant(&author, "hello").expect("message"));
    settle().await;

    assert_eq!(a.snapshot().messages.len(), 1);
    // Initial seed plus the one local mutation.
    assert_eq!(notifications.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn duplicate_ids_are_ignored() {
    let (a, b, _) = relay_pair();
    let s = stroke();
    assert!(a.add_stroke(&s));
    settle().await;
    assert!(!b.add_stroke(&s));
    assert!(!a.add_stroke(&s));
    settle().await;
    assert_eq!(a.snapshot().strokes.len(), 1);
    assert_eq!(b.snapshot().strokes.len(), 1);
}

#[tokio::test]
async fn snapshot_is_persisted_before_subscribers_run() {
    let (a, _b, store) = relay_pair();
    let persisted_at_notify = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&persisted_at_notify);
    let reader = store.clone();
    let _sub = a.subscribe(move |_| {
        let count = reader.load().expect("load").map_or(0, |p| p.strokes.len());
        sink.lock().expect("lock").push(count);
    });

    a.add_stroke(&stroke());
    assert_eq!(*persisted_at_notify.lock().expect("lock"), vec![0, 1]);
}

#[tokio::test]
async fn subscribe_receives_current_state_immediately() {
    let (a, _b, _) = relay_pair();
    a.add_stroke(&stroke());
    let got = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&got);
    let _sub = a.subscribe(move |snap| *sink.lock().expect("lock") = Some(snap.strokes.len()));
    assert_eq!(*got.lock().expect("lock"), Some(1));
}

#[tokio::test]
async fn start_seeds_from_store_within_load_window() {
    let store = MemorySnapshotStore::new();
    let fresh = seen_ago("fresh", 31_000);
    let expired = seen_ago("expired", 50_000);
    let mut persisted = PersistedSnapshot::default();
    persisted.participants.insert(fresh.id.clone(), fresh.clone());
    persisted.participants.insert(expired.id.clone(), expired);
    persisted.strokes.push(stroke());
    store.save(&persisted).expect("seed");

    let relay = LocalRelay::start(LocalBus::default(), Arc::new(store), &SyncConfig::default());
    let snap = relay.snapshot();
    assert_eq!(snap.participants.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec![fresh.id.as_str()]);
    assert_eq!(snap.strokes.len(), 1);
}

#[tokio::test]
async fn sweep_evicts_stale_participant_everywhere() {
    let (a, b, store) = relay_pair();
    let stale = seen_ago("stale", 31_000);
    let live = Participant::new("live", "#3b82f6");
    a.add_participant(&live);
    {
        let mut state = lock(&a.inner.state);
        state.participants.insert(stale.id.clone(), stale.clone());
    }
    {
        let mut state = lock(&b.inner.state);
        state.participants.insert(stale.id.clone(), stale.clone());
    }
    settle().await;

    let evicted = a.sweep(now_ms());
    assert_eq!(evicted, vec![stale.id.clone()]);
    settle().await;

    assert!(a.snapshot().participants.iter().all(|p| p.id != stale.id));
    assert!(b.snapshot().participants.iter().all(|p| p.id != stale.id));
    assert!(b.snapshot().participants.iter().any(|p| p.id == live.id));
    let persisted = store.load().expect("load").expect("record");
    assert!(!persisted.participants.contains_key(&stale.id));
}

#[tokio::test]
async fn remote_participant_update_is_restamped() {
    let (a, b, _) = relay_pair();
    let old = seen_ago("bob", 20_000);
    let before = now_ms();
    a.add_participant(&old);
    settle().await;

    let seen = b.snapshot().participants.into_iter().find(|p| p.id == old.id).expect("bob");
    assert!(seen.last_seen >= before);
}

#[tokio::test]
async fn remove_and_clear_propagate() {
    let (a, b, _) = relay_pair();
    let p = Participant::new("carol", "#10b981");
    a.add_participant(&p);
    a.add_stroke(&stroke());
    settle().await;
    assert_eq!(b.snapshot().participants.len(), 1);

    b.remove_participant(&p.id);
    b.clear_strokes();
    settle().await;

    assert!(a.snapshot().participants.is_empty());
    assert!(a.snapshot().strokes.is_empty());
}

#[tokio::test]
async fn message_history_is_capped() {
    let (a, _b, _) = relay_pair();
    let author = Participant::new("alice", "#ef4444");
    for i in 0..60 {
        a.add_message(&ChatMessage::from_participant(&author, &format!("m{i}")).expect("message"));
    }
    let messages = a.snapshot().messages;
    assert_eq!(messages.len(), 50);
    assert_eq!(messages[0].content, "m10");
}

#[tokio::test]
async fn stroke_history_is_capped() {
    let (a, b, store) = relay_pair();
    let strokes: Vec<Stroke> = (0..210).map(|_| stroke()).collect();
    for s in &strokes {
        assert!(a.add_stroke(s));
    }

    let kept = a.snapshot().strokes;
    assert_eq!(kept.len(), 200);
    assert_eq!(kept[0].id, strokes[10].id);
    assert_eq!(kept[199].id, strokes[209].id);

    let persisted = store.load().expect("load").expect("snapshot");
    assert_eq!(persisted.strokes.len(), 200);

    for _ in 0..4 {
        settle().await;
    }
    assert_eq!(b.snapshot().strokes.len(), 200);
}

#[tokio::test]
async fn unavailable_store_does_not_block_local_state() {
    let bus = LocalBus::default();
    let store = MemorySnapshotStore::new();
    store.set_unavailable(true);
    let relay = LocalRelay::start(bus, Arc::new(store), &SyncConfig::default());

    assert!(relay.add_stroke(&stroke()));
    assert_eq!(relay.snapshot().strokes.len(), 1);
}

#[tokio::test]
async fn stopped_relay_ignores_bus() {
    let (a, b, _) = relay_pair();
    b.stop();
    a.add_stroke(&stroke());
    settle().await;
    assert!(b.snapshot().strokes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn periodic_sweep_runs_on_interval() {
    let store = MemorySnapshotStore::new();
    let stale = seen_ago("stale", 31_000);
    let mut persisted = PersistedSnapshot::default();
    persisted.participants.insert(stale.id.clone(), stale);
    store.save(&persisted).expect("seed");

    let relay = LocalRelay::start(LocalBus::default(), Arc::new(store), &SyncConfig::default());
    assert_eq!(relay.snapshot().participants.len(), 1);

    tokio::time::sleep(Duration::from_millis(10_100)).await;
    assert!(relay.snapshot().participants.is_empty());
}

#[test]
fn bus_message_wire_shape() {
    let msg = BusMessage {
        event: BusEvent::ParticipantRemove { id: "user-1-x".into() },
        origin_context_id: "tab-1-y".into(),
        timestamp: 7,
    };
    let json = serde_json::to_value(&msg).expect("json");
    assert_eq!(json["type"], "participant-remove");
    assert_eq!(json["data"]["id"], "user-1-x");
    assert_eq!(json["originContextId"], "tab-1-y");
    assert_eq!(json["timestamp"], 7);

    let clear = serde_json::to_value(BusMessage {
        event: BusEvent::StrokesClear,
        origin_context_id: "t".into(),
        timestamp: 0,
    })
    .expect("json");
    assert_eq!(clear["type"], "strokes-clear");
}
