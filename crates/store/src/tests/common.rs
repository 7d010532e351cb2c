//! Shared fixtures for the store test suites.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use weft_schema::{MigrationError, Row, TableDefinition, TypedSchema, Validator};
use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::clock::ManualClock;
use crate::lww::LwwStore;

/// The latest post shape (v2): v1 lacked `views`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub views: u64,
}

impl Row for Post {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Post {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_owned(),
            title: title.to_owned(),
            views: 0,
        }
    }
}

/// Strict v1 shape used as the older schema version.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostV1 {
    pub id: String,
    pub title: String,
}

/// Strict v2 shape used for validation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostV2 {
    pub id: String,
    pub title: String,
    pub views: u64,
}

/// The posts table: two versions, migration fills in `views = 0`.
pub fn posts_definition() -> Arc<TableDefinition<Post>> {
    let versions: Vec<Arc<dyn Validator>> = vec![
        Arc::new(TypedSchema::<PostV2>::new()),
        Arc::new(TypedSchema::<PostV1>::new()),
    ];

    Arc::new(
        TableDefinition::new("posts", versions, |raw| {
            serde_json::from_value(raw).map_err(MigrationError::from)
        })
        .unwrap(),
    )
}

pub fn store_with_clock(doc: &Doc, name: &str) -> (Arc<LwwStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = Arc::new(LwwStore::new(doc, name, Arc::clone(&clock) as _));
    (store, clock)
}

/// Applies everything `source` knows onto `target`.
pub fn sync_into(target: &Doc, source: &Doc) {
    let update = source
        .transact()
        .encode_state_as_update_v1(&StateVector::default());
    let decoded = Update::decode_v1(&update).expect("well-formed update");
    target
        .transact_mut()
        .apply_update(decoded)
        .expect("update should apply");
}
