//! Workspace errors.

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkspaceError {
    /// The workspace was destroyed; pending and future `when_synced`
    /// waits reject with this error.
    #[error("workspace has been destroyed")]
    Destroyed,

    #[error("table {name:?} is not part of this workspace")]
    UnknownTable { name: String },

    #[error("kv key {key:?} is not part of this workspace")]
    UnknownKv { key: String },
}
