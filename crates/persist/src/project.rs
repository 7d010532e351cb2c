//! Plain-object projection of a workspace document.
//!
//! The JSON mirror is a function of document state only: tables project
//! to `name -> { id -> row }`, KV to `key -> value`, and object keys are
//! emitted in sorted order, so equal states yield equal bytes.

use serde_json::{Map as JsonMap, Value};
use weft_store::{sequence_winners, value::any_to_json};
use weft_workspace::{table_root, WorkspaceDescriptor, KV_ROOT};
use yrs::{Any, ArrayRef, Doc, Out, ReadTxn, Transact};

/// Projects the data document into its JSON-mirror shape.
#[must_use]
pub fn workspace_json(doc: &Doc, descriptor: &WorkspaceDescriptor) -> Value {
    let txn = doc.transact();

    let mut tables = JsonMap::new();
    for name in descriptor.tables.keys() {
        let rows = txn
            .get_array(table_root(name).as_str())
            .map_or_else(JsonMap::new, |array| winners_json(&txn, &array));
        let _ = tables.insert(name.clone(), Value::Object(rows));
    }

    let kv = txn
        .get_array(KV_ROOT)
        .map_or_else(JsonMap::new, |array| winners_json(&txn, &array));

    let mut root = JsonMap::new();
    let _ = root.insert("tables".to_owned(), Value::Object(tables));
    let _ = root.insert("kv".to_owned(), Value::Object(kv));
    Value::Object(root)
}

fn winners_json<T: ReadTxn>(txn: &T, array: &ArrayRef) -> JsonMap<String, Value> {
    let mut object = JsonMap::new();
    for (key, entry) in sequence_winners(txn, array) {
        let _ = object.insert(key, entry.value.unwrap_or(Value::Null));
    }
    object
}

/// Converts a document output value into JSON for mirroring.
pub(crate) fn out_to_json(out: &Out) -> Value {
    match out {
        Out::Any(any) => any_to_json(any),
        _ => any_to_json(&Any::Null),
    }
}
