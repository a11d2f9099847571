// End-to-end diff behavior over sorted maps.

mod common;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use common::{collect_diff, int_entries, CountingStore};
use prolly_seq::{
    diff_maps_left_right, diff_maps_top_down, ChangeType, InMemoryStore, SortedMap, Value,
    ValueChanged,
};

fn entry(k: &str, v: i64) -> (Value, Value) {
    (Value::from(k), Value::Int(v))
}

#[tokio::test]
async fn diff_of_empty_maps_emits_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let last = SortedMap::new(Arc::clone(&store), vec![]).await.unwrap();
    let current = SortedMap::new(Arc::clone(&store), vec![]).await.unwrap();
    assert_eq!(last.hash(), current.hash());
    let events = collect_diff(&last, &current).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn diff_of_equal_maps_emits_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let last = SortedMap::new(Arc::clone(&store), int_entries(2000)).await.unwrap();
    let current = SortedMap::new(Arc::clone(&store), int_entries(2000)).await.unwrap();
    assert_eq!(last.hash(), current.hash());
    let events = collect_diff(&last, &current).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn added_one_entry() {
    let store = Arc::new(InMemoryStore::new());
    let last = SortedMap::new(Arc::clone(&store), vec![entry("a", 1), entry("c", 3)])
        .await
        .unwrap();
    let current = SortedMap::new(
        Arc::clone(&store),
        vec![entry("a", 1), entry("b", 2), entry("c", 3)],
    )
    .await
    .unwrap();

    let events = collect_diff(&last, &current).await;
    assert_eq!(
        events,
        vec![ValueChanged {
            change_type: ChangeType::Added,
            key: Value::from("b"),
            old_value: None,
            new_value: Some(Value::Int(2)),
        }]
    );
}

#[tokio::test]
async fn removed_middle_entry() {
    let store = Arc::new(InMemoryStore::new());
    let last = SortedMap::new(
        Arc::clone(&store),
        vec![entry("a", 1), entry("b", 2), entry("c", 3)],
    )
    .await
    .unwrap();
    let current = SortedMap::new(Arc::clone(&store), vec![entry("a", 1), entry("c", 3)])
        .await
        .unwrap();

    let events = collect_diff(&last, &current).await;
    assert_eq!(
        events,
        vec![ValueChanged {
            change_type: ChangeType::Removed,
            key: Value::from("b"),
            old_value: Some(Value::Int(2)),
            new_value: None,
        }]
    );
}

#[tokio::test]
async fn modified_one_entry() {
    let store = Arc::new(InMemoryStore::new());
    let last = SortedMap::new(Arc::clone(&store), vec![entry("a", 1), entry("b", 2)])
        .await
        .unwrap();
    let current = SortedMap::new(Arc::clone(&store), vec![entry("a", 1), entry("b", 20)])
        .await
        .unwrap();

    let events = collect_diff(&last, &current).await;
    assert_eq!(
        events,
        vec![ValueChanged {
            change_type: ChangeType::Modified,
            key: Value::from("b"),
            old_value: Some(Value::Int(2)),
            new_value: Some(Value::Int(20)),
        }]
    );
}

async fn collect_with<F, Fut>(run: F) -> (Vec<ValueChanged>, bool)
where
    F: FnOnce(mpsc::Sender<ValueChanged>, watch::Receiver<bool>) -> Fut,
    Fut: std::future::Future<Output = prolly_seq::Result<bool>> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(64);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(run(tx, stop_rx));
    let mut events = Vec::new();
    while let Some(change) = rx.recv().await {
        events.push(change);
    }
    let complete = handle.await.unwrap().unwrap();
    (events, complete)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn both_strategies_agree_on_a_busy_diff() {
    let store = Arc::new(InMemoryStore::new());
    let last = SortedMap::new(Arc::clone(&store), int_entries(5000)).await.unwrap();

    // A spread of modifications, removals and insertions.
    let mut editor = last.edit();
    for i in (0..5000).step_by(97) {
        editor = editor.update(Value::Int(i), Value::Int(-i));
    }
    for i in (1..5000).step_by(301) {
        editor = editor.remove(Value::Int(i));
    }
    for i in 5000..5040 {
        editor = editor.insert(Value::Int(i), Value::Int(i));
    }
    let current = editor.build().await.unwrap();

    let (lr_events, lr_complete) = {
        let (last, current) = (last.clone(), current.clone());
        collect_with(move |tx, stop| {
            diff_maps_left_right(
                last.sequence().clone(),
                current.sequence().clone(),
                tx,
                stop,
            )
        })
        .await
    };
    let (td_events, td_complete) = {
        let (last, current) = (last.clone(), current.clone());
        collect_with(move |tx, stop| {
            diff_maps_top_down(
                last.sequence().clone(),
                current.sequence().clone(),
                tx,
                stop,
            )
        })
        .await
    };

    assert!(lr_complete && td_complete);
    assert!(!lr_events.is_empty());
    assert_eq!(lr_events, td_events, "strategies disagree");

    // Left-right events are strictly key ordered.
    for pair in lr_events.windows(2) {
        assert!(pair[0].key < pair[1].key);
    }
}

#[tokio::test]
async fn applying_diff_events_reproduces_current() {
    let store = Arc::new(InMemoryStore::new());
    let last = SortedMap::new(Arc::clone(&store), int_entries(3000)).await.unwrap();
    let mut editor = last.edit();
    for i in (0..3000).step_by(41) {
        editor = editor.update(Value::Int(i), Value::from(format!("changed-{i}")));
    }
    for i in (5..3000).step_by(173) {
        editor = editor.remove(Value::Int(i));
    }
    editor = editor.insert(Value::Int(-1), Value::from("new low"));
    let current = editor.build().await.unwrap();

    let events = collect_diff(&last, &current).await;

    // Completeness: the changed key set matches the events exactly, no
    // duplicates.
    let mut keys: Vec<_> = events.iter().map(|e| e.key.clone()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), events.len(), "duplicate keys in diff events");

    // Soundness: replaying the events onto `last` rebuilds `current`.
    let mut replay = last.edit();
    for event in events {
        replay = match event.change_type {
            ChangeType::Added | ChangeType::Modified => {
                replay.insert(event.key, event.new_value.unwrap())
            }
            ChangeType::Removed => replay.remove(event.key),
        };
    }
    let rebuilt = replay.build().await.unwrap();
    assert_eq!(rebuilt.hash(), current.hash());
}

#[tokio::test]
async fn large_shared_prefix_reads_a_fraction_of_the_tree() {
    let store = Arc::new(CountingStore::new());
    let n: i64 = 100_000;
    let last = SortedMap::new(Arc::clone(&store), int_entries(n)).await.unwrap();
    let current = last
        .edit()
        .update(Value::Int(50_000), Value::from("surprise"))
        .build()
        .await
        .unwrap();
    assert_ne!(last.hash(), current.hash());

    store.reset_reads();
    let (events, complete) = {
        let (last, current) = (last.clone(), current.clone());
        collect_with(move |tx, stop| {
            diff_maps_left_right(
                last.sequence().clone(),
                current.sequence().clone(),
                tx,
                stop,
            )
        })
        .await
    };
    assert!(complete);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key, Value::Int(50_000));
    assert_eq!(events[0].change_type, ChangeType::Modified);
    assert_eq!(events[0].new_value, Some(Value::from("surprise")));

    // ~100k entries span well over a thousand leaf chunks. The
    // fast-forward must confine reads to the two root-to-leaf paths around
    // the change plus the seams, far below a full walk.
    let reads = store.reads();
    assert!(
        reads < 100,
        "left-right diff read {reads} chunks on a one-entry change"
    );
}

#[tokio::test]
async fn diff_across_very_different_sizes() {
    // Height equalization: a one-leaf map against a deep one.
    let store = Arc::new(InMemoryStore::new());
    let small = SortedMap::new(Arc::clone(&store), int_entries(3)).await.unwrap();
    let large = SortedMap::new(Arc::clone(&store), int_entries(4000)).await.unwrap();

    let events = collect_diff(&small, &large).await;
    assert_eq!(events.len(), 4000 - 3);
    assert!(events
        .iter()
        .all(|e| e.change_type == ChangeType::Added));

    let events = collect_diff(&large, &small).await;
    assert_eq!(events.len(), 4000 - 3);
    assert!(events
        .iter()
        .all(|e| e.change_type == ChangeType::Removed));
}

#[tokio::test]
async fn pre_signalled_stop_yields_no_events() {
    let store = Arc::new(InMemoryStore::new());
    let last = SortedMap::new(Arc::clone(&store), int_entries(2000)).await.unwrap();
    let current = SortedMap::new(Arc::clone(&store), vec![]).await.unwrap();

    let (tx, mut rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);
    stop_tx.send(true).unwrap();

    let complete = current.diff(&last, tx, stop_rx).await.unwrap();
    assert!(!complete, "stopped diff must report incompleteness");
    assert!(rx.recv().await.is_none(), "no events after the stop signal");
}

#[tokio::test]
async fn stop_midway_terminates_cleanly() {
    let store = Arc::new(InMemoryStore::new());
    let last = SortedMap::new(Arc::clone(&store), int_entries(5000)).await.unwrap();
    let current = SortedMap::new(Arc::clone(&store), vec![]).await.unwrap();

    let (tx, mut rx) = mpsc::channel(1);
    let (stop_tx, stop_rx) = watch::channel(false);
    let last2 = last.clone();
    let current2 = current.clone();
    let handle =
        tokio::spawn(async move { current2.diff(&last2, tx, stop_rx).await });

    // Take a handful of events, then cancel and stop reading.
    let mut taken = 0;
    while taken < 5 {
        match rx.recv().await {
            Some(_) => taken += 1,
            None => break,
        }
    }
    stop_tx.send(true).unwrap();

    // The engine must wind down without deadlock even though the consumer
    // has stopped draining.
    let complete = handle.await.unwrap().unwrap();
    assert!(!complete);
}

#[tokio::test]
async fn diffing_a_list_root_as_a_map_is_a_type_mismatch() {
    let store = Arc::new(InMemoryStore::new());
    let list = prolly_seq::List::new(Arc::clone(&store), common::int_values(10))
        .await
        .unwrap();
    let map = SortedMap::new(Arc::clone(&store), int_entries(10)).await.unwrap();

    let (tx, _rx) = mpsc::channel(8);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let err = prolly_seq::diff_maps(list.sequence(), map.sequence(), tx, stop_rx)
        .await
        .unwrap_err();
    assert!(matches!(err, prolly_seq::ProllyError::TypeMismatch(_)));
}
