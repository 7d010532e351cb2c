//! The table helper.
//!
//! A thin typed facade over an [`LwwStore`] bound to a row definition.
//! Writes are trusted (the row type is the latest schema); every read
//! runs the stored value through the union of schema versions and the
//! migration function before it is handed out.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use weft_schema::{Issue, Row, TableDefinition};

use crate::errors::StoreError;
use crate::lww::{LwwBatch, LwwStore, StoreSubscription};

/// Outcome of reading one row.
#[derive(Clone, Debug)]
#[must_use]
pub enum GetResult<T> {
    /// The stored value was accepted and migrated to the latest shape.
    Valid { row: T },
    /// The stored value exists but did not survive validation or
    /// migration. Callers decide whether to delete, repair, or ignore.
    Invalid { report: InvalidRow },
    /// No live row under this id.
    NotFound { id: String },
}

impl<T> GetResult<T> {
    /// The row, if valid.
    pub fn valid(self) -> Option<T> {
        match self {
            Self::Valid { row } => Some(row),
            Self::Invalid { .. } | Self::NotFound { .. } => None,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Diagnostics for a stored row that failed validation or migration.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct InvalidRow {
    pub id: String,
    pub issues: Vec<Issue>,
    pub raw: Value,
}

/// Outcome of a local delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum DeleteResult {
    Deleted,
    /// The row was not known locally. A remote replica may still hold
    /// it; no tombstone is written in that case.
    NotFoundLocally,
}

/// Aggregate outcome of [`Table::delete_many`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct DeleteManyResult {
    pub deleted: Vec<String>,
    pub not_found_locally: Vec<String>,
}

/// Per-transaction table notification.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TableDelta {
    /// Ids whose live value changed in this transaction.
    pub changed: BTreeSet<String>,
}

/// A typed table over one LWW store.
pub struct Table<T: Row> {
    store: Arc<LwwStore>,
    definition: Arc<TableDefinition<T>>,
}

impl<T: Row> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            definition: Arc::clone(&self.definition),
        }
    }
}

impl<T: Row> core::fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.definition.name())
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

impl<T: Row> Table<T> {
    #[must_use]
    pub fn new(store: Arc<LwwStore>, definition: Arc<TableDefinition<T>>) -> Self {
        Self { store, definition }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Writes `row`, replacing any prior row with the same id.
    ///
    /// No validation runs here: writers are typed at compile time; the
    /// engine defends against stored data on read instead.
    pub fn set(&self, row: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(row)?;
        self.store.set(row.id(), value)
    }

    /// Writes several rows in one transaction.
    pub fn set_many<'a, I>(&self, rows: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        self.store.batch(|batch| {
            for row in rows {
                let value = serde_json::to_value(row)?;
                batch.set(row.id(), value)?;
            }
            Ok(())
        })
    }

    /// Reads, validates and migrates the row under `id`.
    pub fn get(&self, id: &str) -> GetResult<T> {
        match self.store.get(id) {
            Some(raw) => self.decode(id, raw),
            None => GetResult::NotFound { id: id.to_owned() },
        }
    }

    /// Every live row, valid or not, in store map order.
    pub fn get_all(&self) -> Vec<GetResult<T>> {
        self.store
            .entries()
            .into_iter()
            .filter_map(|(id, entry)| entry.value.map(|raw| self.decode(&id, raw)))
            .collect()
    }

    /// Every valid row, in store map order.
    pub fn get_all_valid(&self) -> Vec<T> {
        self.get_all()
            .into_iter()
            .filter_map(GetResult::valid)
            .collect()
    }

    /// Diagnostics for every invalid row; for repair tooling.
    pub fn get_all_invalid(&self) -> Vec<InvalidRow> {
        self.get_all()
            .into_iter()
            .filter_map(|result| match result {
                GetResult::Invalid { report } => Some(report),
                GetResult::Valid { .. } | GetResult::NotFound { .. } => None,
            })
            .collect()
    }

    /// Valid rows matching `predicate`, in store map order.
    pub fn filter<P>(&self, mut predicate: P) -> Vec<T>
    where
        P: FnMut(&T) -> bool,
    {
        self.get_all_valid()
            .into_iter()
            .filter(|row| predicate(row))
            .collect()
    }

    /// First valid row matching `predicate`.
    pub fn find<P>(&self, mut predicate: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        for (id, entry) in self.store.entries() {
            let Some(raw) = entry.value else { continue };
            if let GetResult::Valid { row } = self.decode(&id, raw) {
                if predicate(&row) {
                    return Some(row);
                }
            }
        }
        None
    }

    /// Deletes the row under `id` if it is known locally.
    pub fn delete(&self, id: &str) -> Result<DeleteResult, StoreError> {
        if !self.store.has(id) {
            return Ok(DeleteResult::NotFoundLocally);
        }

        self.store.delete(id)?;
        Ok(DeleteResult::Deleted)
    }

    /// Deletes several rows in one transaction, partitioning the ids by
    /// local presence.
    pub fn delete_many<I, S>(&self, ids: I) -> Result<DeleteManyResult, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut result = DeleteManyResult::default();

        for id in ids {
            let id = id.into();
            if self.store.has(&id) {
                result.deleted.push(id);
            } else {
                result.not_found_locally.push(id);
            }
        }

        self.store.batch(|batch| {
            for id in &result.deleted {
                batch.delete(id)?;
            }
            Ok(())
        })?;

        Ok(result)
    }

    /// Deletes every locally known row in one transaction.
    pub fn clear(&self) -> Result<(), StoreError> {
        let keys = self.store.keys();
        self.store.batch(|batch| {
            for key in &keys {
                batch.delete(key)?;
            }
            Ok(())
        })
    }

    /// Runs `f` with a typed write surface inside one transaction.
    pub fn batch<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut TableBatch<'_, '_, '_, T>) -> Result<(), StoreError>,
    {
        self.store.batch(|inner| {
            let mut batch = TableBatch {
                inner,
                definition: &self.definition,
            };
            f(&mut batch)
        })
    }

    /// Subscribes to per-transaction change notifications.
    pub fn observe<F>(&self, callback: F) -> StoreSubscription
    where
        F: Fn(&TableDelta) + Send + Sync + 'static,
    {
        self.store.observe(move |delta| {
            let changed: BTreeSet<String> = delta.changes.keys().cloned().collect();
            callback(&TableDelta { changed });
        })
    }

    /// Number of live rows.
    #[must_use]
    pub fn count(&self) -> usize {
        self.store.len()
    }

    /// Whether a live row exists locally under `id`.
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.store.has(id)
    }

    fn decode(&self, id: &str, raw: Value) -> GetResult<T> {
        if let Err(issues) = self.definition.union().validate(&raw) {
            return GetResult::Invalid {
                report: InvalidRow {
                    id: id.to_owned(),
                    issues,
                    raw,
                },
            };
        }

        match self.definition.migrate(raw.clone()) {
            Ok(row) if row.id() == id => GetResult::Valid { row },
            Ok(row) => GetResult::Invalid {
                report: InvalidRow {
                    id: id.to_owned(),
                    issues: vec![Issue::new(format!(
                        "migrated row id {:?} does not match the store key {id:?}",
                        row.id()
                    ))],
                    raw,
                },
            },
            Err(err) => GetResult::Invalid {
                report: InvalidRow {
                    id: id.to_owned(),
                    issues: vec![Issue::new(err.to_string())],
                    raw,
                },
            },
        }
    }
}

/// Typed write surface of an open table transaction.
pub struct TableBatch<'a, 'b, 'doc, T: Row> {
    inner: &'a mut LwwBatch<'b, 'doc>,
    definition: &'a Arc<TableDefinition<T>>,
}

impl<T: Row> TableBatch<'_, '_, '_, T> {
    pub fn set(&mut self, row: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(row)?;
        self.inner.set(row.id(), value)
    }

    pub fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        self.inner.delete(id)
    }
}

impl<T: Row> core::fmt::Debug for TableBatch<'_, '_, '_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TableBatch")
            .field("table", &self.definition.name())
            .finish_non_exhaustive()
    }
}
