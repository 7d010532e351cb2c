//! Union of schema versions.

use std::sync::Arc;

use serde_json::Value;

use crate::definition::DefinitionError;
use crate::issue::Issue;
use crate::validator::Validator;

/// Cap on how many per-version issues a failed union reports, after the
/// summary issue.
const MAX_REPORTED_ISSUES: usize = 5;

/// Tries an ordered list of per-version validators; the first match
/// wins.
///
/// Ordering is a cost knob, not a correctness knob: newer versions
/// should come first so fresh rows match on the first try, but any
/// order accepts the same set of values.
#[derive(Clone)]
pub struct UnionSchema {
    versions: Vec<Arc<dyn Validator>>,
}

impl UnionSchema {
    /// Builds a union over a non-empty ordered list of validators.
    pub fn new(versions: Vec<Arc<dyn Validator>>) -> Result<Self, DefinitionError> {
        if versions.is_empty() {
            return Err(DefinitionError::NoVersions);
        }

        Ok(Self { versions })
    }

    /// Number of versions in the union.
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Validates against each version in order.
    ///
    /// On total failure the returned issues start with a summary,
    /// followed by at most [`MAX_REPORTED_ISSUES`] of the collected
    /// per-version issues.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<Issue>> {
        let mut collected = Vec::new();

        for version in &self.versions {
            match version.validate(value) {
                Ok(()) => return Ok(()),
                Err(issues) => collected.extend(issues),
            }
        }

        let summary = Issue::new(format!(
            "value did not match any of the {} schema versions",
            self.versions.len()
        ));

        collected.truncate(MAX_REPORTED_ISSUES);

        let mut issues = Vec::with_capacity(collected.len() + 1);
        issues.push(summary);
        issues.extend(collected);

        Err(issues)
    }
}

impl core::fmt::Debug for UnionSchema {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnionSchema")
            .field("versions", &self.versions.len())
            .finish()
    }
}
