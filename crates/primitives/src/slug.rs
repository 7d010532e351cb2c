//! Branded slug types.
//!
//! Slugs are plain strings at runtime; the newtypes only exist to stop a
//! snake-case key being passed where a kebab-case key is expected.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

fn validate_slug(
    input: &str,
    kind: &'static str,
    separator: char,
) -> Result<(), ParseError> {
    if input.is_empty() {
        return Err(ParseError::Empty);
    }

    // No leading/trailing separator, no doubled separator.
    let doubled = format!("{separator}{separator}");
    if input.starts_with(separator) || input.ends_with(separator) || input.contains(&doubled) {
        return Err(ParseError::InvalidCharacter {
            kind,
            found: separator,
        });
    }

    if let Some(found) = input
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == separator))
    {
        return Err(ParseError::InvalidCharacter { kind, found });
    }

    Ok(())
}

macro_rules! slug_type {
    ($(#[$doc:meta])* $name:ident, $kind:literal, $separator:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                validate_slug(input, $kind, $separator)?;
                Ok(Self(input.to_owned()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseError;

            fn try_from(input: String) -> Result<Self, Self::Error> {
                validate_slug(&input, $kind, $separator)?;
                Ok(Self(input))
            }
        }

        impl From<$name> for String {
            fn from(slug: $name) -> Self {
                slug.0
            }
        }
    };
}

slug_type!(
    /// A `snake_case` slug: lowercase alphanumeric segments joined by `_`.
    SnakeSlug,
    "snake-case slug",
    '_'
);

slug_type!(
    /// A `kebab-case` slug: lowercase alphanumeric segments joined by `-`.
    KebabSlug,
    "kebab-case slug",
    '-'
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_slugs() {
        assert!("recording_settings".parse::<SnakeSlug>().is_ok());
        assert!("a1".parse::<SnakeSlug>().is_ok());
        assert!("tab-groups".parse::<KebabSlug>().is_ok());
        assert!("v2".parse::<KebabSlug>().is_ok());
    }

    #[test]
    fn rejects_malformed_slugs() {
        assert_eq!("".parse::<SnakeSlug>(), Err(ParseError::Empty));
        assert!("_leading".parse::<SnakeSlug>().is_err());
        assert!("trailing_".parse::<SnakeSlug>().is_err());
        assert!("double__sep".parse::<SnakeSlug>().is_err());
        assert!("Upper".parse::<SnakeSlug>().is_err());
        assert!("kebab-in-snake".parse::<SnakeSlug>().is_err());
        assert!("snake_in_kebab".parse::<KebabSlug>().is_err());
    }
}
