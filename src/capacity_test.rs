use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

fn participant_at(ts: i64) -> Participant {
    Participant {
        id: format!("user-{ts}-abcdefghi"),
        display_name: format!("p{ts}"),
        color: "#ef4444".into(),
        cursor: None,
        last_seen: ts,
        source: None,
    }
}

fn crowd(n: i64) -> Vec<Participant> {
    (1..=n).map(|i| participant_at(1_000 + i)).collect()
}

#[test]
fn admits_everyone_under_the_limit() {
    let people = crowd(4);
    let decision = admit(&people, &people[3], 10);
    assert_eq!(decision.admitted.len(), 4);
    assert!(!decision.is_blocked);
}

#[test]
fn admitted_size_is_min_of_count_and_limit() {
    for n in [1_i64, 5, 10, 11, 25] {
        let people = crowd(n);
        let decision = admit(&people, &people[0], 10);
        let expected = usize::try_from(n).expect("small").min(10);
        assert_eq!(decision.admitted.len(), expected, "n = {n}");
    }
}

#[test]
fn admits_the_oldest_when_over_limit() {
    let mut people = crowd(15);
    people.reverse();
    let newest = people[0].clone();
    let decision = admit(&people, &newest, 10);

    let ids: Vec<&str> = decision.admitted.iter().map(|p| p.id.as_str()).collect();
    let expected: Vec<String> = (1..=10).map(|i| format!("user-{}-abcdefghi", 1_000 + i)).collect();
    assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(decision.is_blocked);
}

#[test]
fn eleventh_participant_is_blocked_and_tenth_is_not() {
    let people = crowd(11);
    assert!(admit(&people, &people[10], 10).is_blocked);
    assert!(!admit(&people, &people[9], 10).is_blocked);
}

#[test]
fn local_is_counted_even_if_not_listed() {
    let people = crowd(10);
    let me = participant_at(5_000);
    let decision = admit(&people, &me, 10);
    assert!(decision.is_blocked);
    assert_eq!(decision.admitted.len(), 10);

    let decision = admit(&people[..9], &me, 10);
    assert!(!decision.is_blocked);
    assert_eq!(decision.admitted.len(), 10);
}

#[test]
fn local_copy_replaces_listed_copy() {
    let people = crowd(3);
    let mut me = people[1].clone();
    me.display_name = "fresh".into();
    let decision = admit(&people, &me, 10);
    assert_eq!(decision.admitted.len(), 3);
    assert_eq!(decision.admitted[1].display_name, "fresh");
}

#[test]
fn malformed_ids_sort_last() {
    let mut people = crowd(10);
    let odd = Participant { id: "guest".into(), ..participant_at(1) };
    people.push(odd.clone());
    let decision = admit(&people, &odd, 10);
    assert!(decision.is_blocked);
}

#[test]
fn gate_reports_block_transitions() {
    let gate = CapacityGate::new(2);
    let flips = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&flips);
    let _sub = gate.on_change(move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });

    let people = crowd(3);
    let me = people[2].clone();

    assert!(!gate.evaluate(&people[2..], &me).is_blocked);
    assert_eq!(flips.load(Ordering::SeqCst), 0);

    assert!(gate.evaluate(&people, &me).is_blocked);
    assert!(gate.is_blocked());
    assert_eq!(flips.load(Ordering::SeqCst), 1);

    gate.evaluate(&people, &me);
    assert_eq!(flips.load(Ordering::SeqCst), 1);

    assert!(!gate.evaluate(&people[1..], &me).is_blocked);
    assert_eq!(flips.load(Ordering::SeqCst), 2);
    assert_eq!(gate.admitted().len(), 2);
}
