//! LWW sequence records.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use yrs::{Any, Out};

use crate::value::{any_to_json, json_to_any};

const FIELD_KEY: &str = "key";
const FIELD_VAL: &str = "val";
const FIELD_TS: &str = "ts";
const FIELD_DEL: &str = "del";

/// One record of the underlying sequence.
///
/// A record with no value is a tombstone: it marks the key deleted while
/// still competing in LWW resolution, so a delete can beat an older
/// concurrent write after merge.
#[derive(Clone, Debug, PartialEq)]
pub struct LwwEntry {
    pub key: String,
    pub value: Option<Value>,
    pub timestamp: u64,
}

impl LwwEntry {
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            timestamp,
        }
    }

    #[must_use]
    pub fn tombstone(key: impl Into<String>, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: None,
            timestamp,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Encodes the record for insertion into the sequence.
    #[must_use]
    pub(crate) fn to_any(&self) -> Any {
        let mut fields = HashMap::new();
        let _ = fields.insert(FIELD_KEY.to_owned(), Any::String(Arc::from(self.key.as_str())));
        let ts = i64::try_from(self.timestamp).unwrap_or(i64::MAX);
        let _ = fields.insert(FIELD_TS.to_owned(), Any::BigInt(ts));

        match &self.value {
            Some(value) => {
                let _ = fields.insert(FIELD_VAL.to_owned(), json_to_any(value));
            }
            None => {
                let _ = fields.insert(FIELD_DEL.to_owned(), Any::Bool(true));
            }
        }

        Any::Map(Arc::new(fields))
    }

    /// Decodes a sequence element, tolerating foreign shapes.
    ///
    /// Anything that is not a map with a string `key` and a numeric `ts`
    /// is treated as opaque and ignored by the projection.
    #[must_use]
    pub(crate) fn from_out(out: &Out) -> Option<Self> {
        let Out::Any(Any::Map(fields)) = out else {
            return None;
        };

        let key = match fields.get(FIELD_KEY) {
            Some(Any::String(key)) => key.to_string(),
            _ => return None,
        };

        let timestamp = match fields.get(FIELD_TS) {
            Some(Any::BigInt(ts)) => u64::try_from(*ts).ok()?,
            Some(Any::Number(ts)) if ts.is_finite() && *ts >= 0.0 => *ts as u64,
            _ => return None,
        };

        let deleted = matches!(fields.get(FIELD_DEL), Some(Any::Bool(true)));
        let value = if deleted {
            None
        } else {
            Some(fields.get(FIELD_VAL).map_or(Value::Null, any_to_json))
        };

        Some(Self {
            key,
            value,
            timestamp,
        })
    }
}
