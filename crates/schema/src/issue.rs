//! Validation issues.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A single problem reported by a validator.
///
/// `path` holds the property keys leading to the offending value; an
/// empty path refers to the value as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl Issue {
    /// An issue about the value as a whole.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    /// An issue at a specific property path.
    #[must_use]
    pub fn at(message: impl Into<String>, path: impl IntoIterator<Item = String>) -> Self {
        Self {
            message: message.into(),
            path: path.into_iter().collect(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}
