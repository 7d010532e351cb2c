//! Tests for the table helper: read pipeline, batches, observation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use weft_schema::{MigrationError, TableDefinition, TypedSchema, Validator};
use yrs::{Array, Doc, Transact};

use crate::entry::LwwEntry;
use crate::errors::StoreError;
use crate::table::{DeleteResult, GetResult, Table, TableDelta};

use super::common::{posts_definition, store_with_clock, Post};

fn posts_table(doc: &Doc) -> (Table<Post>, Arc<crate::clock::ManualClock>) {
    let (store, clock) = store_with_clock(doc, "table:posts");
    (Table::new(store, posts_definition()), clock)
}

/// Writes a raw record straight into the table's sequence, bypassing
/// the typed write path.
fn insert_raw(doc: &Doc, value: serde_json::Value, ts: u64) {
    let array = doc.get_or_insert_array("table:posts");
    let mut txn = doc.transact_mut();
    let key = value
        .get("id")
        .and_then(|id| id.as_str())
        .unwrap_or("p1")
        .to_owned();
    let _ = array.push_back(&mut txn, LwwEntry::new(key, value, ts).to_any());
}

// =============================================================================
// Test: Read pipeline
// =============================================================================

#[test]
fn test_set_then_get_round_trips() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);

    let row = Post {
        id: "p1".to_owned(),
        title: "Hello".to_owned(),
        views: 0,
    };
    posts.set(&row).unwrap();

    match posts.get("p1") {
        GetResult::Valid { row: read } => assert_eq!(read, row),
        other => panic!("expected a valid row, got {other:?}"),
    }
    assert_eq!(posts.count(), 1);
}

#[test]
fn test_older_version_migrates_on_read() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);

    // A v1 row written by an older replica: no `views` field, ts 0.
    insert_raw(&doc, json!({"id": "p1", "title": "Old"}), 0);

    match posts.get("p1") {
        GetResult::Valid { row } => {
            assert_eq!(row.title, "Old");
            assert_eq!(row.views, 0, "migration should default views to 0");
        }
        other => panic!("expected migration to succeed, got {other:?}"),
    }
}

#[test]
fn test_unmatched_shapes_read_as_invalid() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);

    insert_raw(&doc, json!({"id": "p1", "title": 5}), 0);

    match posts.get("p1") {
        GetResult::Invalid { report } => {
            assert_eq!(report.id, "p1");
            assert!(
                report.issues[0].message.contains("schema versions"),
                "the union summary leads the issue list"
            );
            assert_eq!(report.raw, json!({"id": "p1", "title": 5}));
        }
        other => panic!("expected an invalid read, got {other:?}"),
    }

    assert!(posts.get_all_valid().is_empty());
    assert_eq!(posts.get_all_invalid().len(), 1);
    assert_eq!(posts.get_all().len(), 1, "invalid rows still count in get_all");
}

#[test]
fn test_missing_rows_read_as_not_found() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);

    assert!(matches!(
        posts.get("nope"),
        GetResult::NotFound { id } if id == "nope"
    ));
}

#[test]
fn test_migration_id_mismatch_is_invalid() {
    let doc = Doc::new();
    let (store, _clock) = store_with_clock(&doc, "table:posts");

    // A migration that rewrites every id is a definition bug; reads
    // must surface it rather than hand out a mis-keyed row.
    let versions: Vec<Arc<dyn Validator>> = vec![Arc::new(TypedSchema::<Post>::new())];
    let broken = Arc::new(
        TableDefinition::new("posts", versions, |raw| {
            let mut row: Post = serde_json::from_value(raw).map_err(MigrationError::from)?;
            row.id = "rewritten".to_owned();
            Ok(row)
        })
        .unwrap(),
    );

    let posts = Table::new(store, broken);
    posts.set(&Post::new("rewritten", "x")).unwrap();
    insert_raw(&doc, json!({"id": "p1", "title": "y"}), 0);

    match posts.get("p1") {
        GetResult::Invalid { report } => assert!(
            report.issues[0].message.contains("does not match"),
            "expected the synthetic id-mismatch issue, got {:?}",
            report.issues[0].message
        ),
        other => panic!("expected invalid, got {other:?}"),
    }
}

// =============================================================================
// Test: Queries
// =============================================================================

#[test]
fn test_filter_and_find_see_only_valid_rows() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);

    posts.set(&Post::new("p1", "keep")).unwrap();
    posts.set(&Post::new("p2", "drop")).unwrap();
    insert_raw(&doc, json!({"id": "p3", "title": 5}), 0);

    let kept = posts.filter(|row| row.title == "keep");
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, "p1");

    let found = posts.find(|row| row.title == "drop").unwrap();
    assert_eq!(found.id, "p2");
    assert!(posts.find(|row| row.id == "p3").is_none());
}

// =============================================================================
// Test: Writes, deletes, batches
// =============================================================================

#[test]
fn test_set_many_is_one_transaction() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);

    let calls = Arc::new(AtomicUsize::new(0));
    let _sub = {
        let calls = Arc::clone(&calls);
        posts.observe(move |_delta| {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    posts
        .set_many([Post::new("p1", "a"), Post::new("p2", "b")].iter())
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(posts.count(), 2);
}

#[test]
fn test_empty_row_id_is_rejected() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);

    assert!(matches!(
        posts.set(&Post::new("", "nameless")),
        Err(StoreError::EmptyKey)
    ));
}

#[test]
fn test_delete_reports_local_presence() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);
    posts.set(&Post::new("p1", "x")).unwrap();

    assert_eq!(posts.delete("p1").unwrap(), DeleteResult::Deleted);
    assert_eq!(
        posts.delete("p1").unwrap(),
        DeleteResult::NotFoundLocally,
        "second delete finds nothing locally"
    );
}

#[test]
fn test_delete_many_partitions_ids() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);
    posts.set(&Post::new("p1", "x")).unwrap();
    posts.set(&Post::new("p2", "y")).unwrap();

    let result = posts.delete_many(["p1", "p2", "ghost"]).unwrap();

    assert_eq!(result.deleted, vec!["p1".to_owned(), "p2".to_owned()]);
    assert_eq!(result.not_found_locally, vec!["ghost".to_owned()]);
    assert_eq!(posts.count(), 0);
}

#[test]
fn test_clear_empties_the_table() {
    let doc = Doc::new();
    let (posts, _clock) = posts_table(&doc);
    posts.set(&Post::new("p1", "x")).unwrap();
    posts.set(&Post::new("p2", "y")).unwrap();

    posts.clear().unwrap();

    assert_eq!(posts.count(), 0);
    assert!(!posts.has("p1"));
}

#[test]
fn test_batch_is_atomic_for_observers() {
    let doc = Doc::new();
    let (posts, clock) = posts_table(&doc);
    posts.set(&Post::new("p3", "old")).unwrap();
    clock.advance(1);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::<TableDelta>::new()));
    let _sub = {
        let calls = Arc::clone(&calls);
        let seen = Arc::clone(&seen);
        posts.observe(move |delta| {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            seen.lock().unwrap().push(delta.clone());
        })
    };

    posts
        .batch(|tx| {
            tx.set(&Post::new("p1", "X"))?;
            tx.set(&Post::new("p2", "Y"))?;
            tx.delete("p3")
        })
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1, "one callback per batch");

    let seen = seen.lock().unwrap();
    let changed: Vec<&str> = seen[0].changed.iter().map(String::as_str).collect();
    assert_eq!(changed, vec!["p1", "p2", "p3"]);
}
