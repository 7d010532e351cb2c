//! Tests for LWW conflict resolution across replicas.
//!
//! Replicas are separate documents exchanging full-state updates; the
//! merged sequence order is the deterministic tiebreak for equal
//! timestamps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use claims::assert_some_eq;
use serde_json::json;
use yrs::Doc;

use crate::clock::ManualClock;
use crate::lww::LwwStore;

use super::common::sync_into;

fn replica(client_id: u64, now: u64) -> (Doc, Arc<LwwStore>, Arc<ManualClock>) {
    let doc = Doc::with_client_id(client_id);
    let clock = Arc::new(ManualClock::new(now));
    let store = Arc::new(LwwStore::new(&doc, "posts", Arc::clone(&clock) as _));
    (doc, store, clock)
}

// =============================================================================
// Test: Larger timestamp wins regardless of merge order
// =============================================================================

#[test]
fn test_concurrent_sets_resolve_by_timestamp() {
    let (doc_a, store_a, _clock_a) = replica(1, 100);
    let (doc_b, store_b, _clock_b) = replica(2, 200);

    store_a.set("p1", json!({"title": "A"})).unwrap();
    store_b.set("p1", json!({"title": "B"})).unwrap();

    // Merge in both directions.
    sync_into(&doc_a, &doc_b);
    sync_into(&doc_b, &doc_a);

    assert_some_eq!(store_a.get("p1"), json!({"title": "B"}));
    assert_some_eq!(store_b.get("p1"), json!({"title": "B"}));
}

#[test]
fn test_third_replica_converges_in_any_merge_order() {
    let (doc_a, store_a, _) = replica(1, 100);
    let (doc_b, store_b, _) = replica(2, 200);

    store_a.set("p1", json!({"title": "A"})).unwrap();
    store_b.set("p1", json!({"title": "B"})).unwrap();

    // b-then-a on one observer, a-then-b on another.
    let (doc_c, store_c, _) = replica(3, 0);
    sync_into(&doc_c, &doc_b);
    sync_into(&doc_c, &doc_a);

    let (doc_d, store_d, _) = replica(4, 0);
    sync_into(&doc_d, &doc_a);
    sync_into(&doc_d, &doc_b);

    assert_some_eq!(store_c.get("p1"), json!({"title": "B"}));
    assert_some_eq!(store_d.get("p1"), json!({"title": "B"}));
}

// =============================================================================
// Test: Equal timestamps still converge deterministically
// =============================================================================

#[test]
fn test_timestamp_ties_converge_to_the_same_winner() {
    let (doc_a, store_a, _) = replica(1, 500);
    let (doc_b, store_b, _) = replica(2, 500);

    store_a.set("p1", json!({"title": "A"})).unwrap();
    store_b.set("p1", json!({"title": "B"})).unwrap();

    sync_into(&doc_a, &doc_b);
    sync_into(&doc_b, &doc_a);

    let on_a = store_a.get("p1").expect("key should survive the merge");
    let on_b = store_b.get("p1").expect("key should survive the merge");

    assert_eq!(on_a, on_b, "replicas must agree on the tie winner");
    assert!(
        on_a == json!({"title": "A"}) || on_a == json!({"title": "B"}),
        "the winner is one of the contenders"
    );
}

// =============================================================================
// Test: Local writes cannot displace newer merged records
// =============================================================================

#[test]
fn test_stale_local_set_loses_to_a_newer_merged_entry() {
    let (doc_a, store_a, _clock_a) = replica(1, 200);
    let (doc_b, store_b, clock_b) = replica(2, 200);

    // A writes at ts=200 and B merges it in.
    store_a.set("p1", json!({"title": "newer"})).unwrap();
    sync_into(&doc_b, &doc_a);
    assert_some_eq!(store_b.get("p1"), json!({"title": "newer"}));

    // B's clock lags: its own write carries ts=50. The stale record is
    // appended, not swapped in; A's record must stay the winner locally
    // and must survive in the sequence for the next sync.
    clock_b.set(50);
    store_b.set("p1", json!({"title": "stale"})).unwrap();
    assert_some_eq!(
        store_b.get("p1"),
        json!({"title": "newer"}),
        "a stale local write must not displace the newer merged record"
    );

    sync_into(&doc_a, &doc_b);
    sync_into(&doc_b, &doc_a);

    assert_some_eq!(store_a.get("p1"), json!({"title": "newer"}));
    assert_some_eq!(store_b.get("p1"), json!({"title": "newer"}));
}

// =============================================================================
// Test: Deletes compete in LWW like any other write
// =============================================================================

#[test]
fn test_newer_delete_beats_older_concurrent_set() {
    let (doc_a, store_a, clock_a) = replica(1, 100);
    let (doc_b, store_b, clock_b) = replica(2, 100);

    store_a.set("p1", json!({"title": "v1"})).unwrap();
    sync_into(&doc_b, &doc_a);

    // Concurrently: A updates at ts=150, B deletes at ts=200.
    clock_a.set(150);
    store_a.set("p1", json!({"title": "v2"})).unwrap();
    clock_b.set(200);
    store_b.delete("p1").unwrap();

    sync_into(&doc_a, &doc_b);
    sync_into(&doc_b, &doc_a);

    assert!(!store_a.has("p1"), "the newer tombstone wins on A");
    assert!(!store_b.has("p1"), "the newer tombstone wins on B");
}

#[test]
fn test_newer_set_beats_older_concurrent_delete() {
    let (doc_a, store_a, clock_a) = replica(1, 100);
    let (doc_b, store_b, clock_b) = replica(2, 100);

    store_a.set("p1", json!({"title": "v1"})).unwrap();
    sync_into(&doc_b, &doc_a);

    clock_a.set(300);
    store_a.set("p1", json!({"title": "survivor"})).unwrap();
    clock_b.set(200);
    store_b.delete("p1").unwrap();

    sync_into(&doc_a, &doc_b);
    sync_into(&doc_b, &doc_a);

    assert_some_eq!(store_a.get("p1"), json!({"title": "survivor"}));
    assert_some_eq!(store_b.get("p1"), json!({"title": "survivor"}));
}

// =============================================================================
// Test: Remote transactions notify observers once
// =============================================================================

#[test]
fn test_remote_merge_fires_one_observer_callback() {
    let (doc_a, store_a, _) = replica(1, 100);
    let (doc_b, store_b, _) = replica(2, 50);

    store_a.set("p1", json!(1)).unwrap();
    store_b.set("p2", json!(2)).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let _sub = {
        let calls = Arc::clone(&calls);
        store_b.observe(move |delta| {
            assert!(
                delta.changes.contains_key("p1"),
                "remote delta should carry the incoming key"
            );
            let _ = calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    sync_into(&doc_b, &doc_a);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store_b.has("p1") && store_b.has("p2"));
    drop(store_a);
}
