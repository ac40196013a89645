//! Local record store abstraction.

use crate::error::SyncResult;
use crate::tracker::MemoryTracker;
use parking_lot::RwLock;
use recsync_protocol::CryptoRecord;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Local persistence for one collection's records.
pub trait Store: Send + Sync {
    /// Returns true if `id` exists locally.
    fn item_exists(&self, id: &str) -> SyncResult<bool>;

    /// Returns every local id.
    fn all_ids(&self) -> SyncResult<Vec<String>>;

    /// Builds the outgoing form of `id`. A missing id yields a tombstone.
    fn create_record(&self, id: &str, collection: &str) -> SyncResult<CryptoRecord>;

    /// Creates, updates or (for tombstones) removes a record from the server.
    fn apply_incoming(&self, record: &CryptoRecord) -> SyncResult<()>;

    /// Renames a local record.
    fn change_item_id(&self, old_id: &str, new_id: &str) -> SyncResult<()>;

    /// Deletes all local records.
    fn wipe(&self) -> SyncResult<()>;

    /// Returns a different local id holding the same logical entity, if any.
    fn find_dupe(&self, _record: &CryptoRecord) -> SyncResult<Option<String>> {
        Ok(None)
    }

    /// Drops local sync metadata when the engine resets. Records are kept.
    fn reset(&self) -> SyncResult<()> {
        Ok(())
    }
}

/// An in-memory store of cleartext payloads keyed by id.
///
/// When attached to a [`MemoryTracker`], every write is reported to it the
/// way a host's store observers would.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<String, Value>>,
    tracker: Option<Arc<MemoryTracker>>,
    dupe_key: Option<String>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports writes to `tracker`.
    pub fn with_tracker(mut self, tracker: Arc<MemoryTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Treats records with equal `field` values as duplicates.
    pub fn with_dupe_key(mut self, field: impl Into<String>) -> Self {
        self.dupe_key = Some(field.into());
        self
    }

    /// Writes a local record, as a user edit would.
    pub fn insert(&self, id: &str, cleartext: Value) {
        self.items.write().insert(id.to_string(), cleartext);
        self.observe(id);
    }

    /// Deletes a local record, as a user edit would.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.items.write().remove(id).is_some();
        if removed {
            self.observe(id);
        }
        removed
    }

    /// Returns a local record's cleartext.
    pub fn get(&self, id: &str) -> Option<Value> {
        self.items.read().get(id).cloned()
    }

    /// Returns the number of local records.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn observe(&self, id: &str) {
        if let Some(tracker) = &self.tracker {
            tracker.observe(id);
        }
    }
}

impl Store for MemoryStore {
    fn item_exists(&self, id: &str) -> SyncResult<bool> {
        Ok(self.items.read().contains_key(id))
    }

    fn all_ids(&self) -> SyncResult<Vec<String>> {
        Ok(self.items.read().keys().cloned().collect())
    }

    fn create_record(&self, id: &str, collection: &str) -> SyncResult<CryptoRecord> {
        Ok(match self.items.read().get(id) {
            Some(cleartext) => CryptoRecord::new(collection, id, cleartext.clone()),
            None => CryptoRecord::tombstone(collection, id),
        })
    }

    fn apply_incoming(&self, record: &CryptoRecord) -> SyncResult<()> {
        if record.is_deleted() {
            self.items.write().remove(&record.id);
        } else {
            self.items
                .write()
                .insert(record.id.clone(), record.cleartext.clone());
        }
        self.observe(&record.id);
        Ok(())
    }

    fn change_item_id(&self, old_id: &str, new_id: &str) -> SyncResult<()> {
        let mut items = self.items.write();
        if let Some(cleartext) = items.remove(old_id) {
            items.insert(new_id.to_string(), cleartext);
        }
        drop(items);
        self.observe(new_id);
        Ok(())
    }

    fn wipe(&self) -> SyncResult<()> {
        self.items.write().clear();
        Ok(())
    }

    fn find_dupe(&self, record: &CryptoRecord) -> SyncResult<Option<String>> {
        let Some(key) = &self.dupe_key else {
            return Ok(None);
        };
        let Some(wanted) = record.field(key) else {
            return Ok(None);
        };
        Ok(self
            .items
            .read()
            .iter()
            .find(|(id, cleartext)| *id != &record.id && cleartext.get(key) == Some(wanted))
            .map(|(id, _)| id.clone()))
    }
}
