//! Result Envelope
//!
//! [`DatabaseResult`] is returned by every `DataStore` operation and is the
//! only channel for *expected* failures (not found, duplicate, validation).
//! Infrastructure failures are reported through `DatabaseError` instead.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Uniform success/data/error/count wrapper.
///
/// Invariant: when `success` is false, `error` is set and `data` must not be
/// treated as authoritative. The constructors uphold this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseResult<T = Value> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl<T> DatabaseResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            count: None,
            metadata: Map::new(),
        }
    }

    pub fn ok_with_count(data: T, count: u64) -> Self {
        Self {
            count: Some(count),
            ..Self::ok(data)
        }
    }

    /// Success without a payload (e.g. `find_one_record` with no match).
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            count: None,
            metadata: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            count: None,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Payload of a successful result; `None` on failure.
    pub fn into_data(self) -> Option<T> {
        if self.success {
            self.data
        } else {
            None
        }
    }

    /// Borrow the payload of a successful result.
    pub fn data_ref(&self) -> Option<&T> {
        if self.success {
            self.data.as_ref()
        } else {
            None
        }
    }

    /// Error message, or an empty string for successes.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DatabaseResult<U> {
        DatabaseResult {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            count: self.count,
            metadata: self.metadata,
        }
    }

    /// Re-type a failure, dropping its (non-authoritative) data.
    pub fn cast_failure<U>(self) -> DatabaseResult<U> {
        DatabaseResult {
            success: false,
            data: None,
            error: Some(self.error.unwrap_or_else(|| "operation failed".to_string())),
            count: self.count,
            metadata: self.metadata,
        }
    }
}
