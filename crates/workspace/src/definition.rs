//! Workspace definitions and their on-disk descriptor shape.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use weft_primitives::{Epoch, WorkspaceId};
use weft_schema::{KvDefinition, KvDescriptor, Row, TableDefinition, TableDescriptor};

/// Root name of a table's sequence inside the document.
#[must_use]
pub fn table_root(name: &str) -> String {
    format!("table:{name}")
}

/// Root name of the shared KV sequence.
pub const KV_ROOT: &str = "kv";

/// Type-erased handle to a registered table definition.
pub trait TableDefinitionHandle: Send + Sync {
    fn table_name(&self) -> &str;
    fn table_descriptor(&self) -> &TableDescriptor;
}

impl<T: Row> TableDefinitionHandle for TableDefinition<T> {
    fn table_name(&self) -> &str {
        self.name()
    }

    fn table_descriptor(&self) -> &TableDescriptor {
        self.descriptor()
    }
}

/// Type-erased handle to a registered KV definition.
pub trait KvDefinitionHandle: Send + Sync {
    fn kv_key(&self) -> &str;
    fn kv_descriptor(&self) -> &KvDescriptor;
}

impl<T> KvDefinitionHandle for KvDefinition<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn kv_key(&self) -> &str {
        self.key()
    }

    fn kv_descriptor(&self) -> &KvDescriptor {
        self.descriptor()
    }
}

/// A named bundle of table and KV definitions plus display identity.
///
/// Registering the same table name twice replaces the earlier
/// registration; names are the identity.
pub struct WorkspaceDefinition {
    pub(crate) id: WorkspaceId,
    pub(crate) epoch: Epoch,
    pub(crate) name: Option<String>,
    pub(crate) icon: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) tables: IndexMap<String, Arc<dyn TableDefinitionHandle>>,
    pub(crate) kv: IndexMap<String, Arc<dyn KvDefinitionHandle>>,
}

impl WorkspaceDefinition {
    #[must_use]
    pub fn new(id: WorkspaceId, epoch: Epoch) -> Self {
        Self {
            id,
            epoch,
            name: None,
            icon: None,
            description: None,
            tables: IndexMap::new(),
            kv: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_table<T: Row>(mut self, definition: &Arc<TableDefinition<T>>) -> Self {
        let handle: Arc<dyn TableDefinitionHandle> = Arc::clone(definition) as _;
        let _ = self.tables.insert(definition.name().to_owned(), handle);
        self
    }

    #[must_use]
    pub fn with_kv<T>(mut self, definition: &Arc<KvDefinition<T>>) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let handle: Arc<dyn KvDefinitionHandle> = Arc::clone(definition) as _;
        let _ = self.kv.insert(definition.key().to_owned(), handle);
        self
    }

    #[must_use]
    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// The serializable descriptor mirrored to `definition.json`.
    #[must_use]
    pub fn descriptor(&self) -> WorkspaceDescriptor {
        WorkspaceDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            description: self.description.clone(),
            tables: self
                .tables
                .iter()
                .map(|(name, handle)| (name.clone(), handle.table_descriptor().clone()))
                .collect(),
            kv: self
                .kv
                .iter()
                .map(|(key, handle)| (key.clone(), handle.kv_descriptor().clone()))
                .collect(),
        }
    }
}

impl core::fmt::Debug for WorkspaceDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkspaceDefinition")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("kv", &self.kv.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Serializable projection of a workspace definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct WorkspaceDescriptor {
    pub id: WorkspaceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tables: IndexMap<String, TableDescriptor>,
    #[serde(default)]
    pub kv: IndexMap<String, KvDescriptor>,
}
