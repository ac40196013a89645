//! Typed view over a [`PrefsBackend`].

use crate::backend::PrefsBackend;
use crate::error::{StorageError, StorageResult};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Typed accessors over a shared preference backend.
///
/// Cloning a `Prefs` is cheap; clones share the same backend.
#[derive(Clone)]
pub struct Prefs {
    backend: Arc<dyn PrefsBackend>,
}

impl Prefs {
    /// Wraps a backend.
    pub fn new(backend: Arc<dyn PrefsBackend>) -> Self {
        Self { backend }
    }

    /// Convenience constructor over a fresh [`crate::InMemoryPrefs`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::InMemoryPrefs::new()))
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &Arc<dyn PrefsBackend> {
        &self.backend
    }

    /// Returns true if a value is stored under `key`.
    pub fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.backend.get(key)?.is_some())
    }

    /// Reads a string, or `default` when unset.
    ///
    /// Numbers are accepted and rendered to their string form, since older
    /// writers stored some values numerically.
    pub fn get_string(&self, key: &str, default: &str) -> StorageResult<String> {
        match self.backend.get(key)? {
            None | Some(Value::Null) => Ok(default.to_string()),
            Some(Value::String(s)) => Ok(s),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(mismatch(key, "string", &other)),
        }
    }

    /// Reads a floating point number, or `default` when unset.
    ///
    /// String-encoded numbers are parsed; an unparsable string yields `default`.
    pub fn get_f64(&self, key: &str, default: f64) -> StorageResult<f64> {
        match self.backend.get(key)? {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => Ok(n.as_f64().unwrap_or(default)),
            Some(Value::String(s)) => Ok(s.trim().parse().unwrap_or(default)),
            Some(other) => Err(mismatch(key, "number", &other)),
        }
    }

    /// Reads an integer, or `default` when unset.
    ///
    /// String-encoded integers are parsed; an unparsable string yields `default`.
    pub fn get_i64(&self, key: &str, default: i64) -> StorageResult<i64> {
        match self.backend.get(key)? {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => Ok(n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default)),
            Some(Value::String(s)) => Ok(s.trim().parse().unwrap_or(default)),
            Some(other) => Err(mismatch(key, "integer", &other)),
        }
    }

    /// Reads a boolean, or `default` when unset.
    pub fn get_bool(&self, key: &str, default: bool) -> StorageResult<bool> {
        match self.backend.get(key)? {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(b),
            Some(other) => Err(mismatch(key, "boolean", &other)),
        }
    }

    /// Stores a string.
    pub fn set_string(&self, key: &str, value: impl Into<String>) -> StorageResult<()> {
        self.backend.set(key, Value::String(value.into()))
    }

    /// Stores an integer.
    pub fn set_i64(&self, key: &str, value: i64) -> StorageResult<()> {
        self.backend.set(key, Value::from(value))
    }

    /// Stores a boolean.
    pub fn set_bool(&self, key: &str, value: bool) -> StorageResult<()> {
        self.backend.set(key, Value::Bool(value))
    }

    /// Removes a key.
    pub fn reset(&self, key: &str) -> StorageResult<()> {
        self.backend.reset(key)
    }

    /// Flushes the backend.
    pub fn flush(&self) -> StorageResult<()> {
        self.backend.flush()
    }
}

impl fmt::Debug for Prefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefs").finish_non_exhaustive()
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> StorageError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    StorageError::TypeMismatch {
        key: key.to_string(),
        expected,
        found,
    }
}
