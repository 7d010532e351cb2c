//! Table and KV definitions.
//!
//! A definition is the unit a workspace is built from: an ordered list
//! of schema versions, a total migration function onto the latest
//! version, and the display metadata that is mirrored into
//! `definition.json` on disk.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;

use crate::union::UnionSchema;
use crate::validator::Validator;

/// Programmer errors raised while constructing a definition.
///
/// These fail fast at construction time; they are never surfaced from
/// read or write paths.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DefinitionError {
    #[error("a definition requires at least one schema version")]
    NoVersions,

    #[error("definition names must not be empty")]
    EmptyName,
}

/// Failure of a migration function.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MigrationError {
    #[error("migration failed: {0}")]
    Failed(String),

    #[error("migrated value did not deserialize: {0}")]
    Decode(#[from] serde_json::Error),
}

impl MigrationError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A typed table row: any serde-round-trippable value with a stable
/// string `id`.
pub trait Row: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;
}

type MigrateFn<T> = Arc<dyn Fn(Value) -> Result<T, MigrationError> + Send + Sync>;

/// Display metadata of a table, as written to `definition.json`.
///
/// Unknown keys read from disk are preserved in `extra` and written
/// back untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, String>,
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

/// Display metadata of a KV slot, as written to `definition.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KvDescriptor {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub schema: Value,
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

/// A versioned table of rows keyed by their `id`.
///
/// Writers emit the latest shape `T`; readers accept anything the union
/// of versions accepts and migrate it forward. The migration function
/// must be pure and idempotent: feeding it an already-latest row must
/// return that row unchanged, since hot read paths rely on it.
pub struct TableDefinition<T> {
    union: UnionSchema,
    migrate: MigrateFn<T>,
    descriptor: TableDescriptor,
}

impl<T> Clone for TableDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            union: self.union.clone(),
            migrate: Arc::clone(&self.migrate),
            descriptor: self.descriptor.clone(),
        }
    }
}

impl<T: Row> TableDefinition<T> {
    /// Builds a definition from ordered versions (newest first
    /// recommended) and a total migration onto `T`.
    pub fn new<F>(
        name: impl Into<String>,
        versions: Vec<Arc<dyn Validator>>,
        migrate: F,
    ) -> Result<Self, DefinitionError>
    where
        F: Fn(Value) -> Result<T, MigrationError> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(DefinitionError::EmptyName);
        }

        Ok(Self {
            union: UnionSchema::new(versions)?,
            migrate: Arc::new(migrate),
            descriptor: TableDescriptor {
                name,
                ..TableDescriptor::default()
            },
        })
    }

    /// Shorthand for single-version tables: the latest shape is the
    /// only shape, and migration is a serde round-trip.
    pub fn latest_only(
        name: impl Into<String>,
        latest: Arc<dyn Validator>,
    ) -> Result<Self, DefinitionError> {
        Self::new(name, vec![latest], |raw| {
            serde_json::from_value(raw).map_err(MigrationError::from)
        })
    }

    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.descriptor.icon = Some(icon.into());
        self
    }

    #[must_use]
    pub fn with_cover(mut self, cover: impl Into<String>) -> Self {
        self.descriptor.cover = Some(cover.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = Some(description.into());
        self
    }

    /// Declares a field of the latest version for `definition.json`.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        drop(self.descriptor.fields.insert(name.into(), kind.into()));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[must_use]
    pub fn union(&self) -> &UnionSchema {
        &self.union
    }

    #[must_use]
    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    /// Runs the migration function on a union-accepted value.
    pub fn migrate(&self, raw: Value) -> Result<T, MigrationError> {
        (self.migrate)(raw)
    }
}

impl<T> core::fmt::Debug for TableDefinition<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TableDefinition")
            .field("name", &self.descriptor.name)
            .field("versions", &self.union.len())
            .finish_non_exhaustive()
    }
}

/// A versioned single-value slot.
///
/// Same contract as [`TableDefinition`] minus the `id` requirement:
/// each KV key is an independent value with its own version history.
pub struct KvDefinition<T> {
    union: UnionSchema,
    migrate: MigrateFn<T>,
    descriptor: KvDescriptor,
}

impl<T> Clone for KvDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            union: self.union.clone(),
            migrate: Arc::clone(&self.migrate),
            descriptor: self.descriptor.clone(),
        }
    }
}

impl<T> KvDefinition<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<F>(
        key: impl Into<String>,
        versions: Vec<Arc<dyn Validator>>,
        migrate: F,
    ) -> Result<Self, DefinitionError>
    where
        F: Fn(Value) -> Result<T, MigrationError> + Send + Sync + 'static,
    {
        let key = key.into();
        if key.is_empty() {
            return Err(DefinitionError::EmptyName);
        }

        Ok(Self {
            union: UnionSchema::new(versions)?,
            migrate: Arc::new(migrate),
            descriptor: KvDescriptor {
                key,
                ..KvDescriptor::default()
            },
        })
    }

    /// Shorthand for single-version slots.
    pub fn latest_only(
        key: impl Into<String>,
        latest: Arc<dyn Validator>,
    ) -> Result<Self, DefinitionError> {
        Self::new(key, vec![latest], |raw| {
            serde_json::from_value(raw).map_err(MigrationError::from)
        })
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = Some(description.into());
        self
    }

    /// Attaches a free-form schema descriptor for `definition.json`.
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.descriptor.schema = schema;
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    #[must_use]
    pub fn union(&self) -> &UnionSchema {
        &self.union
    }

    #[must_use]
    pub fn descriptor(&self) -> &KvDescriptor {
        &self.descriptor
    }

    pub fn migrate(&self, raw: Value) -> Result<T, MigrationError> {
        (self.migrate)(raw)
    }
}

impl<T> core::fmt::Debug for KvDefinition<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KvDefinition")
            .field("key", &self.descriptor.key)
            .field("versions", &self.union.len())
            .finish_non_exhaustive()
    }
}
