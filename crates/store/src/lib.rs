//! Typed keyed storage over a CRDT document.
//!
//! The storage model is a map projected over an ordered CRDT sequence:
//! every write appends a `{ key, val, ts }` record, and for each key the
//! record with the highest timestamp (ties broken by sequence position)
//! is the live value. The projection is kept in an in-memory shadow map
//! that is updated incrementally from the sequence's own change deltas,
//! so merges cost time proportional to the keys that actually changed.
//!
//! ## Core Concepts
//!
//! - [`LwwStore`]: the last-writer-wins keyed store itself
//! - [`Table`]: typed rows with validate-on-read and forward migration
//! - [`KvStore`] / [`KvSlot`]: named single-value slots sharing one store
//!
//! Writes are trusted (writers are typed at compile time); reads defend
//! against stored data, which may have been written by an older replica
//! or corrupted in transit.

pub mod clock;
pub mod entry;
pub mod errors;
pub mod kv;
pub mod lww;
pub mod table;
pub mod value;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::LwwEntry;
pub use errors::StoreError;
pub use kv::{KvEvent, KvGetResult, KvStore, KvSlot};
pub use lww::{sequence_winners, KeyChange, LwwBatch, LwwDelta, LwwStore, StoreSubscription};
pub use table::{
    DeleteManyResult, DeleteResult, GetResult, InvalidRow, Table, TableBatch, TableDelta,
};
