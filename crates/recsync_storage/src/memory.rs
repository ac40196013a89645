//! In-memory preference backend for testing.

use crate::backend::PrefsBackend;
use crate::error::StorageResult;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

/// An in-memory preference backend.
///
/// This backend keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Hosts that persist preferences by other means
///
/// # Example
///
/// ```rust
/// use recsync_storage::{PrefsBackend, InMemoryPrefs};
/// use serde_json::json;
///
/// let prefs = InMemoryPrefs::new();
/// prefs.set("client.type", json!("mobile")).unwrap();
/// assert_eq!(prefs.get("client.type").unwrap(), Some(json!("mobile")));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryPrefs {
    values: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryPrefs {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with values.
    #[must_use]
    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            values: RwLock::new(values.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Returns a copy of every stored value.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.read().clone()
    }
}

impl PrefsBackend for InMemoryPrefs {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn reset(&self, key: &str) -> StorageResult<()> {
        self.values.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.values.read().keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}
