//! Identifier and branding primitives shared across the engine.
//!
//! Identifiers are short, URL-safe and opaque; branded string types keep
//! the different key kinds from being mixed up at compile time while
//! erasing to plain strings on the wire.

pub mod id;
pub mod slug;
pub mod workspace;

pub use id::{generate_id, generate_rich_content_id, RichContentId};
pub use slug::{KebabSlug, SnakeSlug};
pub use workspace::{Epoch, WorkspaceId};

use thiserror::Error;

/// Error raised when parsing a branded identifier from text.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("identifier must not be empty")]
    Empty,

    #[error("invalid character {found:?} in {kind}")]
    InvalidCharacter { kind: &'static str, found: char },

    #[error("expected prefix {expected:?}")]
    MissingPrefix { expected: &'static str },

    #[error("expected {expected} characters after the prefix, found {found}")]
    WrongLength { expected: usize, found: usize },
}
