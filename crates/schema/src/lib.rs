//! Versioned schemas for tables and KV slots.
//!
//! The core pattern is "store anything, validate on read, migrate
//! forward": a definition bundles an ordered list of per-version
//! validators with a total migration function that maps any accepted
//! version to the latest shape. Replicas running older code can keep
//! writing old shapes; every reader lifts them forward.
//!
//! ## Core Concepts
//!
//! - [`Validator`]: a synchronous validate-or-issues contract
//! - [`UnionSchema`]: first-match-wins over an ordered version list
//! - [`TableDefinition`] / [`KvDefinition`]: versions + migration + the
//!   display metadata that ends up in `definition.json`

pub mod definition;
pub mod issue;
pub mod union;
pub mod validator;

pub use definition::{
    DefinitionError, KvDefinition, KvDescriptor, MigrationError, Row, TableDefinition,
    TableDescriptor,
};
pub use issue::Issue;
pub use union::UnionSchema;
pub use validator::{TypedSchema, Validator};
