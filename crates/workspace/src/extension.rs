//! Extension composition.
//!
//! Extensions are factory functions returning plain trait objects; the
//! workspace composes them by name at creation time. Each extension
//! declares its own hydration barrier independently and the workspace
//! conjoins them. Extensions must not depend on one another implicitly;
//! when coupling is needed, the dependent side takes the other's
//! exports as a constructor argument.

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result as EyreResult;
use tokio::sync::watch;
use weft_primitives::{Epoch, WorkspaceId};
use weft_store::Clock;
use yrs::Doc;

use crate::definition::WorkspaceDescriptor;
use crate::errors::WorkspaceError;

/// A side-car attached to a workspace at creation time.
///
/// Beyond the lifecycle pair every extension carries, arbitrary public
/// surface is reached through [`Extension::as_any`] downcasting; see
/// `Workspace::extension`.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Resolves once the extension's initial hydration is complete.
    ///
    /// Rejects with [`WorkspaceError::Destroyed`] (wrapped in the
    /// report) if the workspace is destroyed first.
    async fn when_synced(&self) -> EyreResult<()>;

    /// Releases the extension's resources: timers, file handles,
    /// sockets. Must be idempotent.
    async fn destroy(&self) -> EyreResult<()>;

    /// The extension's public surface, for typed access.
    fn as_any(&self) -> &dyn Any;
}

/// Everything an extension factory gets to see.
#[derive(Clone)]
#[non_exhaustive]
pub struct ExtensionContext {
    pub workspace_id: WorkspaceId,
    pub epoch: Epoch,
    /// Stable identifier of the document: `{workspace_id}@{epoch}`.
    pub guid: String,
    /// Shared handle to the workspace's document.
    pub doc: Doc,
    pub descriptor: WorkspaceDescriptor,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("workspace_id", &self.workspace_id)
            .field("epoch", &self.epoch)
            .field("guid", &self.guid)
            .finish_non_exhaustive()
    }
}

type ExtensionFactory = Box<dyn FnOnce(&ExtensionContext) -> EyreResult<Box<dyn Extension>> + Send>;

/// Ordered, named extension factories for one workspace.
#[derive(Default)]
pub struct ExtensionSet {
    pub(crate) factories: Vec<(String, ExtensionFactory)>,
}

impl ExtensionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named extension factory. Factories run synchronously, in
    /// registration order, during workspace creation.
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce(&ExtensionContext) -> EyreResult<Box<dyn Extension>> + Send + 'static,
    {
        self.factories.push((name.into(), Box::new(factory)));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionSet")
            .field(
                "factories",
                &self
                    .factories
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncState {
    Pending,
    Ready,
    Destroyed,
}

/// A one-shot hydration barrier shared between an extension and its
/// waiters.
///
/// `Destroyed` is sticky and overrides `Ready`: once a workspace is
/// torn down, every pending and future wait rejects.
#[derive(Clone, Debug)]
pub struct SyncFlag {
    tx: Arc<watch::Sender<SyncState>>,
}

impl SyncFlag {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncState::Pending);
        Self { tx: Arc::new(tx) }
    }

    /// Marks hydration complete. No effect after destruction.
    pub fn mark_synced(&self) {
        self.tx.send_modify(|state| {
            if *state == SyncState::Pending {
                *state = SyncState::Ready;
            }
        });
    }

    /// Marks the owner destroyed, waking every waiter with an error.
    pub fn mark_destroyed(&self) {
        self.tx.send_modify(|state| *state = SyncState::Destroyed);
    }

    /// Waits for hydration.
    pub async fn wait(&self) -> Result<(), WorkspaceError> {
        let mut rx = self.tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                SyncState::Ready => return Ok(()),
                SyncState::Destroyed => return Err(WorkspaceError::Destroyed),
                SyncState::Pending => {}
            }

            if rx.changed().await.is_err() {
                return Err(WorkspaceError::Destroyed);
            }
        }
    }
}

impl Default for SyncFlag {
    fn default() -> Self {
        Self::new()
    }
}
