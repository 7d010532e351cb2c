//! Workspace lifecycle.
//!
//! A workspace bundles typed tables, KV slots and extensions around one
//! CRDT document. Construction is synchronous: the document exists and
//! every observer is attached before `create` returns. Consumers await
//! [`Workspace::when_synced`] once before reading, then use the typed
//! helpers freely; [`Workspace::destroy`] is the only teardown surface.
//!
//! ## Core Concepts
//!
//! - [`WorkspaceDefinition`]: what the workspace contains
//! - [`Extension`] / [`ExtensionSet`]: factory-composed side-cars
//!   (persistence, revisions, sync transports, ...)
//! - [`Workspace`]: the live client

pub mod definition;
pub mod errors;
pub mod extension;

pub use definition::{
    table_root, KvDefinitionHandle, TableDefinitionHandle, WorkspaceDefinition,
    WorkspaceDescriptor, KV_ROOT,
};
pub use errors::WorkspaceError;
pub use extension::{Extension, ExtensionContext, ExtensionSet, SyncFlag};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{bail, Result as EyreResult};
use futures_util::future::{join_all, try_join_all};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};
use weft_primitives::{Epoch, WorkspaceId};
use weft_schema::{KvDefinition, Row, TableDefinition};
use weft_store::{Clock, KvSlot, KvStore, LwwStore, SystemClock, Table};
use yrs::Doc;

/// A live workspace client.
///
/// Owns the document, the stores and every extension; all of them are
/// released together by [`Workspace::destroy`].
pub struct Workspace {
    id: WorkspaceId,
    epoch: Epoch,
    guid: String,
    doc: Doc,
    clock: Arc<dyn Clock>,
    descriptor: WorkspaceDescriptor,
    stores: HashMap<String, Arc<LwwStore>>,
    kv: KvStore,
    table_names: Vec<String>,
    kv_keys: Vec<String>,
    extensions: IndexMap<String, Box<dyn Extension>>,
    destroyed: AtomicBool,
}

impl Workspace {
    /// Creates a workspace with wall-clock write timestamps.
    pub fn create(definition: WorkspaceDefinition, extensions: ExtensionSet) -> EyreResult<Self> {
        Self::create_with_clock(definition, extensions, Arc::new(SystemClock))
    }

    /// Creates a workspace with an explicit timestamp source.
    ///
    /// The document and all stores exist when this returns; extension
    /// factories have run in registration order. Only their hydration
    /// is still in flight, gated behind [`Workspace::when_synced`].
    pub fn create_with_clock(
        definition: WorkspaceDefinition,
        extensions: ExtensionSet,
        clock: Arc<dyn Clock>,
    ) -> EyreResult<Self> {
        let guid = format!("{}@{}", definition.id(), definition.epoch());
        let doc = Doc::new();
        let descriptor = definition.descriptor();

        let mut stores = HashMap::new();
        for name in definition.tables.keys() {
            let root = table_root(name);
            let store = Arc::new(LwwStore::new(&doc, root.as_str(), Arc::clone(&clock)));
            let _ = stores.insert(root, store);
        }

        let kv_store = Arc::new(LwwStore::new(&doc, KV_ROOT, Arc::clone(&clock)));
        let _ = stores.insert(KV_ROOT.to_owned(), Arc::clone(&kv_store));

        let context = ExtensionContext {
            workspace_id: definition.id().clone(),
            epoch: definition.epoch(),
            guid: guid.clone(),
            doc: doc.clone(),
            descriptor: descriptor.clone(),
            clock: Arc::clone(&clock),
        };

        let mut built: IndexMap<String, Box<dyn Extension>> = IndexMap::new();
        for (name, factory) in extensions.factories {
            if built.contains_key(&name) {
                bail!("duplicate extension name: {name:?}");
            }

            debug!(workspace = %context.guid, extension = %name, "attaching extension");
            let extension = factory(&context)?;
            let _ = built.insert(name, extension);
        }

        Ok(Self {
            id: definition.id().clone(),
            epoch: definition.epoch(),
            guid,
            doc,
            clock,
            descriptor,
            stores,
            kv: KvStore::new(kv_store),
            table_names: definition.tables.keys().cloned().collect(),
            kv_keys: definition.kv.keys().cloned().collect(),
            extensions: built,
            destroyed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Stable identifier of the document: `{workspace_id}@{epoch}`.
    #[must_use]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// The underlying document, shared with extensions.
    #[must_use]
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    #[must_use]
    pub fn descriptor(&self) -> &WorkspaceDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The typed table bound to a registered definition.
    pub fn table<T: Row>(
        &self,
        definition: &Arc<TableDefinition<T>>,
    ) -> Result<Table<T>, WorkspaceError> {
        let name = definition.name();
        if !self.table_names.iter().any(|registered| registered == name) {
            return Err(WorkspaceError::UnknownTable {
                name: name.to_owned(),
            });
        }

        let store = self
            .stores
            .get(&table_root(name))
            .cloned()
            .ok_or_else(|| WorkspaceError::UnknownTable {
                name: name.to_owned(),
            })?;

        Ok(Table::new(store, Arc::clone(definition)))
    }

    /// The flat KV dictionary shared by every slot.
    #[must_use]
    pub fn kv(&self) -> &KvStore {
        &self.kv
    }

    /// The per-key accessor for a registered KV definition.
    pub fn kv_slot<T>(&self, definition: &Arc<KvDefinition<T>>) -> Result<KvSlot<T>, WorkspaceError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let key = definition.key();
        if !self.kv_keys.iter().any(|registered| registered == key) {
            return Err(WorkspaceError::UnknownKv {
                key: key.to_owned(),
            });
        }

        Ok(self.kv.slot(definition))
    }

    /// Typed access to an extension's public surface.
    #[must_use]
    pub fn extension<T: 'static>(&self, name: &str) -> Option<&T> {
        self.extensions.get(name)?.as_any().downcast_ref::<T>()
    }

    /// Resolves after every extension's initial hydration completes.
    ///
    /// Resolves immediately for workspaces without extensions. Rejects
    /// with [`WorkspaceError::Destroyed`] if the workspace is destroyed
    /// before (or while) hydration finishes.
    pub async fn when_synced(&self) -> EyreResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(WorkspaceError::Destroyed.into());
        }

        let _ = try_join_all(
            self.extensions
                .values()
                .map(|extension| extension.when_synced()),
        )
        .await?;

        Ok(())
    }

    /// Tears the workspace down: detaches every store observer, then
    /// runs extension teardown concurrently and awaits it.
    ///
    /// Idempotent; repeated calls are no-ops. Extension teardown
    /// failures are logged and do not propagate.
    pub async fn destroy(&self) -> EyreResult<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for store in self.stores.values() {
            store.detach();
        }

        let names: Vec<&str> = self.extensions.keys().map(String::as_str).collect();
        let outcomes = join_all(
            self.extensions
                .values()
                .map(|extension| extension.destroy()),
        )
        .await;

        for (name, outcome) in names.into_iter().zip(outcomes) {
            if let Err(err) = outcome {
                error!(workspace = %self.guid, extension = %name, "extension teardown failed: {err:#}");
            }
        }

        Ok(())
    }

    /// Whether `destroy` has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl core::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Workspace")
            .field("guid", &self.guid)
            .field("tables", &self.table_names)
            .field("kv", &self.kv_keys)
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
