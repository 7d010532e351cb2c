//! Random identifier generation.
//!
//! Identifiers are 12 characters drawn from a 36-character lowercase
//! URL-safe alphabet, which keeps the collision probability negligible
//! well past 10^8 generated ids.

use core::fmt;
use core::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Alphabet for generated identifiers: lowercase alphanumerics only, so
/// ids survive URLs, filenames and case-insensitive filesystems.
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Number of characters in a generated identifier.
const ID_LEN: usize = 12;

/// Prefix for rich-content identifiers.
const RICH_CONTENT_PREFIX: &str = "rtxt_";

/// Generates a random 12-character lowercase alphanumeric identifier.
#[must_use]
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

/// Generates a fresh [`RichContentId`] (`rtxt_` + 12 alphabet chars).
#[must_use]
pub fn generate_rich_content_id() -> RichContentId {
    RichContentId::generate()
}

/// An identifier for a rich-content payload, rendered as `rtxt_{id}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RichContentId(String);

impl RichContentId {
    /// Generates a fresh rich-content identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{RICH_CONTENT_PREFIX}{}", generate_id()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RichContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RichContentId {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let Some(rest) = input.strip_prefix(RICH_CONTENT_PREFIX) else {
            return Err(ParseError::MissingPrefix {
                expected: RICH_CONTENT_PREFIX,
            });
        };

        if rest.len() != ID_LEN {
            return Err(ParseError::WrongLength {
                expected: ID_LEN,
                found: rest.len(),
            });
        }

        if let Some(found) = rest
            .chars()
            .find(|c| !c.is_ascii() || !ALPHABET.contains(&(*c as u8)))
        {
            return Err(ParseError::InvalidCharacter {
                kind: "rich content id",
                found,
            });
        }

        Ok(Self(input.to_owned()))
    }
}

impl TryFrom<String> for RichContentId {
    type Error = ParseError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        input.parse()
    }
}

impl From<RichContentId> for String {
    fn from(id: RichContentId) -> Self {
        id.0
    }
}
