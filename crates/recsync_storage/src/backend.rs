//! Preference backend trait definition.

use crate::error::StorageResult;
use serde_json::Value;

/// A durable key-value store for scalar preference values.
///
/// Backends are flat maps from dotted keys to JSON scalars. They do not
/// interpret keys; engines own the naming scheme.
///
/// # Invariants
///
/// - `get` after `set` returns the value that was set
/// - `reset` removes the key; a subsequent `get` returns `None`
/// - `flush` makes all prior writes durable
/// - Backends must be `Send + Sync` so engines can share them
///
/// # Implementors
///
/// - [`super::InMemoryPrefs`] - For testing
/// - [`super::FilePrefs`] - For persistent storage
pub trait PrefsBackend: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Removes `key` from the store. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn reset(&self, key: &str) -> StorageResult<()>;

    /// Returns all keys currently stored, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Flushes pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StorageResult<()>;
}
