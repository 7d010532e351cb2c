//! The KV helper.
//!
//! All KV keys of a workspace share one LWW store; each key is an
//! independent single-value slot with its own version history. Two
//! shapes are offered: the flat [`KvStore`] keyed by definitions, and
//! per-key [`KvSlot`] accessors generated from the definition map.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use weft_schema::{Issue, KvDefinition};

use crate::errors::StoreError;
use crate::lww::{KeyChange, LwwStore, StoreSubscription};

/// Outcome of reading one KV slot.
#[derive(Clone, Debug)]
#[must_use]
pub enum KvGetResult<T> {
    Valid { value: T },
    Invalid { key: String, issues: Vec<Issue>, raw: Value },
    NotFound { key: String },
}

impl<T> KvGetResult<T> {
    /// The value, if valid.
    pub fn valid(self) -> Option<T> {
        match self {
            Self::Valid { value } => Some(value),
            Self::Invalid { .. } | Self::NotFound { .. } => None,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Per-transaction notification for one KV key.
///
/// Invalid stored values are skipped by observation; they surface on
/// `get` instead.
#[derive(Clone, Debug)]
#[must_use = "events describe a change that already happened"]
pub enum KvEvent<T> {
    Set { value: T },
    Deleted,
}

/// The flat KV dictionary over one shared store.
#[derive(Clone, Debug)]
pub struct KvStore {
    store: Arc<LwwStore>,
}

impl KvStore {
    #[must_use]
    pub fn new(store: Arc<LwwStore>) -> Self {
        Self { store }
    }

    /// Reads, validates and migrates the slot of `definition`.
    pub fn get<T>(&self, definition: &KvDefinition<T>) -> KvGetResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let key = definition.key();
        match self.store.get(key) {
            Some(raw) => decode(definition, raw),
            None => KvGetResult::NotFound {
                key: key.to_owned(),
            },
        }
    }

    /// Writes the slot of `definition`. Writes are trusted; only reads
    /// validate.
    pub fn set<T>(&self, definition: &KvDefinition<T>, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let raw = serde_json::to_value(value)?;
        self.store.set(definition.key(), raw)
    }

    /// Deletes the slot of `definition`.
    pub fn delete<T>(&self, definition: &KvDefinition<T>) -> Result<(), StoreError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.store.delete(definition.key())
    }

    /// Whether the slot currently holds a value locally.
    #[must_use]
    pub fn has<T>(&self, definition: &KvDefinition<T>) -> bool
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.store.has(definition.key())
    }

    /// Subscribes to changes of one slot.
    pub fn observe<T, F>(
        &self,
        definition: &Arc<KvDefinition<T>>,
        callback: F,
    ) -> StoreSubscription
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn(&KvEvent<T>) + Send + Sync + 'static,
    {
        let definition = Arc::clone(definition);
        self.store.observe(move |delta| {
            let Some(change) = delta.changes.get(definition.key()) else {
                return;
            };

            match change {
                KeyChange::Added { new } | KeyChange::Updated { new, .. } => {
                    let raw = new.value.clone().unwrap_or(Value::Null);
                    match decode(&definition, raw) {
                        KvGetResult::Valid { value } => callback(&KvEvent::Set { value }),
                        KvGetResult::Invalid { key, .. } => {
                            debug!(%key, "skipping invalid kv value in observer");
                        }
                        KvGetResult::NotFound { .. } => {}
                    }
                }
                KeyChange::Removed { .. } => callback(&KvEvent::Deleted),
            }
        })
    }

    /// Builds the per-key accessor for `definition`.
    #[must_use]
    pub fn slot<T>(&self, definition: &Arc<KvDefinition<T>>) -> KvSlot<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        KvSlot {
            store: Arc::clone(&self.store),
            definition: Arc::clone(definition),
        }
    }
}

/// A single named slot bound to its definition.
pub struct KvSlot<T> {
    store: Arc<LwwStore>,
    definition: Arc<KvDefinition<T>>,
}

impl<T> KvSlot<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[must_use]
    pub fn key(&self) -> &str {
        self.definition.key()
    }

    pub fn get(&self) -> KvGetResult<T> {
        let key = self.definition.key();
        match self.store.get(key) {
            Some(raw) => decode(&self.definition, raw),
            None => KvGetResult::NotFound {
                key: key.to_owned(),
            },
        }
    }

    pub fn set(&self, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_value(value)?;
        self.store.set(self.definition.key(), raw)
    }

    /// Clears the slot back to its absent state.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.store.delete(self.definition.key())
    }

    pub fn observe<F>(&self, callback: F) -> StoreSubscription
    where
        F: Fn(&KvEvent<T>) + Send + Sync + 'static,
    {
        KvStore::new(Arc::clone(&self.store)).observe(&self.definition, callback)
    }
}

impl<T> Clone for KvSlot<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            definition: Arc::clone(&self.definition),
        }
    }
}

impl<T> core::fmt::Debug for KvSlot<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KvSlot")
            .field("key", &self.definition.key())
            .finish_non_exhaustive()
    }
}

fn decode<T>(definition: &KvDefinition<T>, raw: Value) -> KvGetResult<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let key = definition.key();

    if let Err(issues) = definition.union().validate(&raw) {
        return KvGetResult::Invalid {
            key: key.to_owned(),
            issues,
            raw,
        };
    }

    match definition.migrate(raw.clone()) {
        Ok(value) => KvGetResult::Valid { value },
        Err(err) => KvGetResult::Invalid {
            key: key.to_owned(),
            issues: vec![Issue::new(err.to_string())],
            raw,
        },
    }
}
