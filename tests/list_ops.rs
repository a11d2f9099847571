// List construction, concat, edits, iteration and splice diff.

mod common;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use common::int_values;
use prolly_seq::{InMemoryStore, List, Splice, Value};

async fn build(store: &Arc<InMemoryStore>, values: Vec<Value>) -> List<InMemoryStore> {
    List::new(Arc::clone(store), values).await.unwrap()
}

async fn collect_splices(
    last: &List<InMemoryStore>,
    current: &List<InMemoryStore>,
) -> Vec<Splice> {
    let (tx, mut rx) = mpsc::channel(64);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let (last, current) = (last.clone(), current.clone());
    let handle = tokio::spawn(async move { current.diff(&last, tx, stop_rx).await });
    let mut splices = Vec::new();
    while let Some(splice) = rx.recv().await {
        splices.push(splice);
    }
    assert!(handle.await.unwrap().unwrap());
    splices
}

/// Applies splices to `last`'s values, pulling added runs from `current`.
fn apply_splices(last: &[Value], current: &[Value], splices: &[Splice]) -> Vec<Value> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    for s in splices {
        out.extend_from_slice(&last[pos..s.at as usize]);
        out.extend_from_slice(&current[s.from as usize..(s.from + s.added) as usize]);
        pos = (s.at + s.removed) as usize;
    }
    out.extend_from_slice(&last[pos..]);
    out
}

#[tokio::test]
async fn build_then_read_back() {
    let store = Arc::new(InMemoryStore::new());
    let list = build(&store, int_values(2500)).await;
    assert_eq!(list.len(), 2500);
    assert_eq!(list.values().await.unwrap(), int_values(2500));

    // Random access.
    for idx in [0u64, 1, 77, 1024, 2499] {
        assert_eq!(
            list.get(idx).await.unwrap(),
            Some(Value::Int(idx as i64))
        );
    }
    assert_eq!(list.get(2500).await.unwrap(), None);
}

#[tokio::test]
async fn iteration_round_trip_preserves_the_root() {
    let store = Arc::new(InMemoryStore::new());
    let list = build(&store, int_values(3000)).await;
    let rebuilt = build(&store, list.values().await.unwrap()).await;
    assert_eq!(list.hash(), rebuilt.hash());
}

#[tokio::test]
async fn concat_preserves_order_and_canonical_form() {
    let store = Arc::new(InMemoryStore::new());
    let a = build(&store, vec![Value::Int(1), Value::Int(2), Value::Int(3)]).await;
    let b = build(&store, vec![Value::Int(4), Value::Int(5), Value::Int(6)]).await;

    let joined = a.concat(&b).await.unwrap();
    assert_eq!(
        joined.values().await.unwrap(),
        (1..=6).map(Value::Int).collect::<Vec<_>>()
    );

    let direct = build(&store, (1..=6).map(Value::Int).collect()).await;
    assert_eq!(joined.hash(), direct.hash());
}

#[tokio::test]
async fn concat_equals_build_at_scale() {
    let store = Arc::new(InMemoryStore::new());
    let a = build(&store, int_values(1700)).await;
    let b = build(
        &store,
        (1700..4100).map(Value::Int).collect::<Vec<_>>(),
    )
    .await;

    let joined = a.concat(&b).await.unwrap();
    let direct = build(&store, int_values(4100)).await;
    assert_eq!(joined.len(), 4100);
    assert_eq!(joined.hash(), direct.hash());
}

#[tokio::test]
async fn concat_with_empty_is_identity() {
    let store = Arc::new(InMemoryStore::new());
    let a = build(&store, int_values(800)).await;
    let empty = build(&store, vec![]).await;

    assert_eq!(a.concat(&empty).await.unwrap().hash(), a.hash());
    assert_eq!(empty.concat(&a).await.unwrap().hash(), a.hash());
}

#[tokio::test]
async fn concat_is_associative() {
    let store = Arc::new(InMemoryStore::new());
    let a = build(&store, int_values(900)).await;
    let b = build(&store, (900..1300).map(Value::Int).collect()).await;
    let c = build(&store, (1300..2600).map(Value::Int).collect()).await;

    let left = a.concat(&b).await.unwrap().concat(&c).await.unwrap();
    let right = a.concat(&b.concat(&c).await.unwrap()).await.unwrap();
    assert_eq!(left.hash(), right.hash());
    assert_eq!(left.len(), 2600);
}

#[tokio::test]
async fn editor_matches_from_scratch_build() {
    let store = Arc::new(InMemoryStore::new());
    let list = build(&store, int_values(2000)).await;

    // splice out [500, 510), insert three values at 500, append one at end
    let edited = list
        .edit()
        .splice(500, 10, vec![Value::Int(-1), Value::Int(-2), Value::Int(-3)])
        .insert(2000, vec![Value::Int(9999)])
        .build()
        .await
        .unwrap();

    let mut expected = int_values(2000);
    expected.splice(
        500..510,
        vec![Value::Int(-1), Value::Int(-2), Value::Int(-3)],
    );
    expected.push(Value::Int(9999));

    assert_eq!(edited.values().await.unwrap(), expected);
    let direct = build(&store, expected).await;
    assert_eq!(edited.hash(), direct.hash());
}

#[tokio::test]
async fn overlapping_edits_are_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let list = build(&store, int_values(100)).await;
    let err = list
        .edit()
        .remove(10, 20)
        .insert(15, vec![Value::Int(0)])
        .build()
        .await
        .unwrap_err();
    assert!(matches!(err, prolly_seq::ProllyError::InvalidOperation(_)));

    let err = list.edit().remove(95, 10).build().await.unwrap_err();
    assert!(matches!(err, prolly_seq::ProllyError::InvalidOperation(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn iter_all_visits_everything_in_order() {
    let store = Arc::new(InMemoryStore::new());
    let n = 20_000i64;
    let list = build(&store, int_values(n)).await;

    let mut seen = Vec::with_capacity(n as usize);
    list.iter_all(|v, idx| {
        assert_eq!(idx, seen.len() as u64);
        seen.push(v);
    })
    .await
    .unwrap();
    assert_eq!(seen, int_values(n));
}

#[tokio::test]
async fn iter_stops_on_request() {
    let store = Arc::new(InMemoryStore::new());
    let list = build(&store, int_values(1000)).await;
    let mut count = 0u64;
    list.iter(|_, idx| {
        count += 1;
        idx == 9
    })
    .await
    .unwrap();
    assert_eq!(count, 10);
}

#[tokio::test]
async fn list_diff_reports_a_single_update() {
    let store = Arc::new(InMemoryStore::new());
    let last = build(&store, vec![1, 2, 3, 4].into_iter().map(Value::Int).collect()).await;
    let current = build(&store, vec![1, 2, 9, 4].into_iter().map(Value::Int).collect()).await;

    let splices = collect_splices(&last, &current).await;
    assert_eq!(
        splices,
        vec![Splice {
            at: 2,
            removed: 1,
            added: 1,
            from: 2
        }]
    );
}

#[tokio::test]
async fn list_diff_round_trips_through_splices() {
    let store = Arc::new(InMemoryStore::new());
    let last_values = int_values(3000);
    let mut current_values = last_values.clone();
    current_values.splice(100..140, vec![Value::from("wedge")]);
    current_values.extend((0..25).map(|i| Value::Int(100_000 + i)));

    let last = build(&store, last_values.clone()).await;
    let current = build(&store, current_values.clone()).await;

    let splices = collect_splices(&last, &current).await;
    assert!(!splices.is_empty());
    assert_eq!(
        apply_splices(&last_values, &current_values, &splices),
        current_values
    );
}

#[tokio::test]
async fn list_diff_of_equal_lists_is_empty() {
    let store = Arc::new(InMemoryStore::new());
    let a = build(&store, int_values(1200)).await;
    let b = build(&store, int_values(1200)).await;
    assert!(collect_splices(&a, &b).await.is_empty());
}

#[tokio::test]
async fn list_diff_against_empty() {
    let store = Arc::new(InMemoryStore::new());
    let empty = build(&store, vec![]).await;
    let full = build(&store, int_values(50)).await;

    assert_eq!(
        collect_splices(&empty, &full).await,
        vec![Splice {
            at: 0,
            removed: 0,
            added: 50,
            from: 0
        }]
    );
    assert_eq!(
        collect_splices(&full, &empty).await,
        vec![Splice {
            at: 0,
            removed: 50,
            added: 0,
            from: 0
        }]
    );
}
