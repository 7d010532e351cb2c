//! File persistence for workspaces.
//!
//! Two extensions live here:
//!
//! - [`persistence`]: binds a workspace's document to an on-disk layout
//!   partitioned by epoch. Binary state is the source of truth and is
//!   written on every update; a pretty-printed JSON mirror follows on a
//!   debounce for humans and external tooling, strictly one-way.
//! - [`revisions`]: numbered full-state snapshots with list, view,
//!   restore and bounded retention.
//!
//! On-disk layout per workspace:
//!
//! ```text
//! <root>/
//!   <workspace_id>/
//!     head.json              # human-readable mirror of the head document
//!     head.yjs               # binary head state
//!     <epoch>/
//!       workspace.yjs        # binary data (source of truth)
//!       workspace.json       # debounced JSON mirror
//!       definition.json      # pretty-printed table + KV definitions
//!       revisions/<n>.snap   # revision snapshots
//! ```

pub mod layout;
pub mod persistence;
pub mod project;
pub mod revisions;

mod fs_util;

pub use layout::Layout;
pub use persistence::{persistence, PersistenceConfig, PersistenceExtension};
pub use revisions::{revisions, RevisionConfig, RevisionExtension, RevisionRecord};
