//! The validation adapter.
//!
//! Any synchronous validate-or-issues contract can plug in here; the
//! trait is the seam between the engine and whichever validation
//! library (or hand-rolled check) a deployment prefers. The contract is
//! synchronous by construction, so an async validator cannot be passed
//! where a sync one is required.

use core::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::issue::Issue;

/// A synchronous validator over JSON-shaped values.
///
/// Implementations report either acceptance or a non-empty list of
/// issues. No transformation is applied beyond what the validator
/// itself emits; migration is a separate, later step.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), Vec<Issue>>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<(), Vec<Issue>> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), Vec<Issue>> {
        self(value)
    }
}

/// A validator that accepts exactly the values deserializable into `T`.
///
/// This is the common case: one schema version per Rust type, with
/// serde doing the structural checking.
#[derive(Debug)]
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TypedSchema<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Validator for TypedSchema<T> {
    fn validate(&self, value: &Value) -> Result<(), Vec<Issue>> {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(_) => Ok(()),
            Err(err) => Err(vec![issue_from_serde(&err)]),
        }
    }
}

/// Lifts a serde error into an [`Issue`], recovering the field name from
/// serde's `missing field` / `unknown field` phrasing where possible.
fn issue_from_serde(err: &serde_json::Error) -> Issue {
    let message = err.to_string();

    for marker in ["missing field `", "unknown field `", "invalid type for field `"] {
        if let Some(rest) = message.split(marker).nth(1) {
            if let Some(field) = rest.split('`').next() {
                return Issue::at(message.clone(), [field.to_owned()]);
            }
        }
    }

    Issue::new(message)
}

#[cfg(test)]
mod tests {
    use claims::{assert_err, assert_ok};
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Post {
        id: String,
        title: String,
    }

    #[test]
    fn typed_schema_accepts_matching_values() {
        let schema = TypedSchema::<Post>::new();
        assert_ok!(schema.validate(&json!({"id": "p1", "title": "Hello"})));
    }

    #[test]
    fn typed_schema_reports_missing_fields_with_path() {
        let schema = TypedSchema::<Post>::new();
        let issues = schema.validate(&json!({"id": "p1"})).unwrap_err();

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, vec!["title".to_owned()]);
    }

    #[test]
    fn closures_are_validators() {
        let validator = |value: &Value| {
            if value.get("id").is_some() {
                Ok(())
            } else {
                Err(vec![Issue::new("id is required")])
            }
        };

        assert_ok!(validator.validate(&json!({"id": "x"})));
        assert_err!(validator.validate(&json!({})));
    }
}
