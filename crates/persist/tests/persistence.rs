//! Integration tests for the persistence extension: load/save round
//! trips, the JSON mirrors, and failure tolerance.

use core::time::Duration;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_persist::{persistence, PersistenceConfig, PersistenceExtension};
use weft_primitives::Epoch;
use weft_schema::{Row, TableDefinition, TypedSchema};
use weft_store::GetResult;
use weft_workspace::{ExtensionSet, Workspace, WorkspaceDefinition};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Post {
    id: String,
    title: String,
}

impl Row for Post {
    fn id(&self) -> &str {
        &self.id
    }
}

fn posts_definition() -> Arc<TableDefinition<Post>> {
    Arc::new(
        TableDefinition::<Post>::latest_only("posts", Arc::new(TypedSchema::<Post>::new()))
            .unwrap(),
    )
}

fn definition() -> WorkspaceDefinition {
    WorkspaceDefinition::new("w1".parse().unwrap(), Epoch::ZERO)
        .with_name("Scratchpad")
        .with_icon("notebook")
        .with_table(&posts_definition())
}

fn root_of(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("tempdir paths are utf-8")
}

fn fast_persistence(root: &Utf8PathBuf) -> ExtensionSet {
    ExtensionSet::new().with(
        "persistence",
        persistence(PersistenceConfig::new(root.clone()).with_json_debounce(Duration::from_millis(20))),
    )
}

async fn read_json(path: &Utf8PathBuf) -> Value {
    let bytes = tokio::fs::read(path).await.expect("file should exist");
    serde_json::from_slice(&bytes).expect("file should hold valid json")
}

// =============================================================================
// Test: Round trip through disk
// =============================================================================

#[tokio::test]
async fn test_workspace_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(&dir);
    let posts = posts_definition();

    // First life: write one row, then shut down.
    {
        let workspace = Workspace::create(definition(), fast_persistence(&root)).unwrap();
        workspace.when_synced().await.unwrap();

        workspace
            .table(&posts)
            .unwrap()
            .set(&Post {
                id: "p1".to_owned(),
                title: "Hello".to_owned(),
            })
            .unwrap();

        workspace.destroy().await.unwrap();
    }

    // Second life: same id, same epoch, same root.
    let workspace = Workspace::create(definition(), fast_persistence(&root)).unwrap();
    workspace.when_synced().await.unwrap();

    match workspace.table(&posts).unwrap().get("p1") {
        GetResult::Valid { row } => assert_eq!(row.title, "Hello"),
        other => panic!("persisted row should load as valid, got {other:?}"),
    }

    workspace.destroy().await.unwrap();
}

#[tokio::test]
async fn test_json_mirror_follows_the_data() {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(&dir);
    let posts = posts_definition();

    let workspace = Workspace::create(definition(), fast_persistence(&root)).unwrap();
    workspace.when_synced().await.unwrap();

    workspace
        .table(&posts)
        .unwrap()
        .set(&Post {
            id: "p1".to_owned(),
            title: "Mirrored".to_owned(),
        })
        .unwrap();

    // Wait out the debounce.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mirror = read_json(&root.join("w1/0/workspace.json")).await;
    assert_eq!(mirror["tables"]["posts"]["p1"]["title"], "Mirrored");

    workspace.destroy().await.unwrap();
}

#[tokio::test]
async fn test_destroy_flushes_a_pending_mirror_write() {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(&dir);
    let posts = posts_definition();

    let workspace = Workspace::create(
        definition(),
        ExtensionSet::new().with(
            "persistence",
            persistence(
                PersistenceConfig::new(root.clone()).with_json_debounce(Duration::from_secs(3_600)),
            ),
        ),
    )
    .unwrap();
    workspace.when_synced().await.unwrap();

    workspace
        .table(&posts)
        .unwrap()
        .set(&Post {
            id: "p1".to_owned(),
            title: "Flushed".to_owned(),
        })
        .unwrap();

    // The debounce would fire in an hour; teardown must not wait.
    workspace.destroy().await.unwrap();

    let mirror = read_json(&root.join("w1/0/workspace.json")).await;
    assert_eq!(mirror["tables"]["posts"]["p1"]["title"], "Flushed");
}

// =============================================================================
// Test: Companion files
// =============================================================================

#[tokio::test]
async fn test_definition_file_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(&dir);

    let workspace = Workspace::create(definition(), fast_persistence(&root)).unwrap();
    workspace.when_synced().await.unwrap();

    let file = read_json(&root.join("w1/0/definition.json")).await;
    assert_eq!(file["id"], "w1");
    assert_eq!(file["name"], "Scratchpad");
    assert!(file["tables"]["posts"].is_object());

    workspace.destroy().await.unwrap();
}

#[tokio::test]
async fn test_head_mirror_flattens_meta_and_keeps_epochs() {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(&dir);

    let workspace = Workspace::create(definition(), fast_persistence(&root)).unwrap();
    workspace.when_synced().await.unwrap();

    let head = read_json(&root.join("w1/head.json")).await;

    assert_eq!(head["name"], "Scratchpad", "meta fields are top-level");
    assert_eq!(head["icon"], "notebook");
    let epochs = head["epochs"]
        .as_object()
        .expect("epochs stays a nested object");
    assert_eq!(epochs.len(), 1, "this client registered its epoch");
    assert!(epochs.values().all(|epoch| epoch == &Value::from(0)));

    workspace.destroy().await.unwrap();
}

// =============================================================================
// Test: Failure semantics
// =============================================================================

#[tokio::test]
async fn test_unreadable_state_still_syncs_as_new() {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(&dir);

    // Plant garbage where the binary state should be.
    tokio::fs::create_dir_all(root.join("w1/0")).await.unwrap();
    tokio::fs::write(root.join("w1/0/workspace.yjs"), b"not an update")
        .await
        .unwrap();

    let workspace = Workspace::create(definition(), fast_persistence(&root)).unwrap();
    workspace
        .when_synced()
        .await
        .expect("garbage on disk must not wedge hydration");

    // The healed file now holds a decodable (empty) state.
    let posts = posts_definition();
    assert_eq!(workspace.table(&posts).unwrap().count(), 0);

    workspace.destroy().await.unwrap();
}

#[tokio::test]
async fn test_save_failures_do_not_break_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(&dir);

    // Make `<root>/w1` a file so every directory creation and write
    // under it fails.
    tokio::fs::write(root.join("w1"), b"squatter").await.unwrap();

    let workspace = Workspace::create(definition(), fast_persistence(&root)).unwrap();
    workspace
        .when_synced()
        .await
        .expect("persistence degrades, the workspace still hydrates");

    let posts = posts_definition();
    let table = workspace.table(&posts).unwrap();
    table
        .set(&Post {
            id: "p1".to_owned(),
            title: "In memory".to_owned(),
        })
        .unwrap();
    assert!(table.get("p1").is_valid(), "reads and writes keep working");

    workspace.destroy().await.unwrap();
}

// =============================================================================
// Test: Typed extension surface
// =============================================================================

#[tokio::test]
async fn test_layout_is_reachable_through_the_extension_surface() {
    let dir = tempfile::tempdir().unwrap();
    let root = root_of(&dir);

    let workspace = Workspace::create(definition(), fast_persistence(&root)).unwrap();
    workspace.when_synced().await.unwrap();

    let surface: &PersistenceExtension = workspace
        .extension("persistence")
        .expect("the extension exposes its surface");
    assert_eq!(surface.layout().data_binary(), root.join("w1/0/workspace.yjs"));

    workspace.destroy().await.unwrap();
}
