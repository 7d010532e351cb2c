//! Store errors.
//!
//! Reads never fail; the only fallible writes are the fail-fast caller
//! contract violations below. Invalid stored data is not an error: it
//! surfaces as an `invalid` read result one layer up.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Keys (and row ids) must be non-empty strings.
    #[error("store keys must not be empty")]
    EmptyKey,

    /// A row failed to serialize into a document value.
    #[error("failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),
}
