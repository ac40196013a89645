//! Server-side record storage.

use parking_lot::{Mutex, RwLock};
use recsync_protocol::{CollectionQuery, PostResult, Record, ServerTime, SortOrder};
use std::collections::{BTreeMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

/// Converts server time to whole hundredths of a second.
fn to_centis(time: ServerTime) -> i64 {
    (time * 100.0).round() as i64
}

fn from_centis(centis: i64) -> ServerTime {
    centis as f64 / 100.0
}

/// Monotonic server clock with two-decimal precision.
///
/// Every write gets a timestamp strictly greater than the previous one.
pub struct ServerClock {
    last: Mutex<i64>,
    offset: Mutex<i64>,
}

impl ServerClock {
    /// Creates a clock following system time.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(0),
            offset: Mutex::new(0),
        }
    }

    fn system_centis(&self) -> i64 {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64 / 10)
            .unwrap_or(0);
        elapsed + *self.offset.lock()
    }

    /// Returns the current time without consuming a tick.
    pub fn now(&self) -> ServerTime {
        let last = *self.last.lock();
        from_centis(self.system_centis().max(last))
    }

    /// Returns a timestamp for a write.
    pub fn tick(&self) -> ServerTime {
        let mut last = self.last.lock();
        let next = self.system_centis().max(*last + 1);
        *last = next;
        from_centis(next)
    }

    /// Moves the clock forward.
    pub fn advance(&self, seconds: f64) {
        *self.offset.lock() += to_centis(seconds);
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}

type CollectionKey = (String, String);

/// Records for every user and collection.
pub struct RecordStorage {
    collections: RwLock<BTreeMap<CollectionKey, BTreeMap<String, Record>>>,
}

impl RecordStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    fn key(user: &str, collection: &str) -> CollectionKey {
        (user.to_string(), collection.to_string())
    }

    fn is_live(record: &Record, now: ServerTime) -> bool {
        match record.ttl {
            Some(ttl) => to_centis(record.modified) + (ttl as i64) * 100 > to_centis(now),
            None => true,
        }
    }

    /// Returns live records matching `query`, sorted and limited.
    pub fn query(
        &self,
        user: &str,
        collection: &str,
        query: &CollectionQuery,
        now: ServerTime,
    ) -> Vec<Record> {
        let collections = self.collections.read();
        let Some(records) = collections.get(&Self::key(user, collection)) else {
            return Vec::new();
        };
        let newer = query.newer.map(to_centis);
        let ids: HashSet<&str> = query.ids.iter().map(String::as_str).collect();

        let mut matching: Vec<Record> = records
            .values()
            .filter(|r| Self::is_live(r, now))
            .filter(|r| newer.map_or(true, |n| to_centis(r.modified) > n))
            .filter(|r| ids.is_empty() || ids.contains(r.id.as_str()))
            .cloned()
            .collect();

        match query.sort.unwrap_or(SortOrder::Oldest) {
            SortOrder::Oldest => matching.sort_by_key(|r| to_centis(r.modified)),
            SortOrder::Newest => matching.sort_by_key(|r| std::cmp::Reverse(to_centis(r.modified))),
            SortOrder::Index => {
                matching.sort_by_key(|r| std::cmp::Reverse(r.sortindex.unwrap_or(0)))
            }
        }
        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }
        matching
    }

    /// Returns one live record.
    pub fn fetch(&self, user: &str, collection: &str, id: &str, now: ServerTime) -> Option<Record> {
        self.collections
            .read()
            .get(&Self::key(user, collection))
            .and_then(|records| records.get(id))
            .filter(|r| Self::is_live(r, now))
            .cloned()
    }

    /// Stores one record at `timestamp`.
    pub fn put(&self, user: &str, collection: &str, mut record: Record, timestamp: ServerTime) {
        record.collection = String::new();
        record.modified = timestamp;
        self.collections
            .write()
            .entry(Self::key(user, collection))
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Stores a batch at `timestamp`. Records whose id is in `rejected`
    /// are reported as failed and not stored.
    pub fn post(
        &self,
        user: &str,
        collection: &str,
        records: Vec<Record>,
        timestamp: ServerTime,
        rejected: &HashSet<String>,
    ) -> PostResult {
        let mut result = PostResult::default();
        let mut collections = self.collections.write();
        let stored = collections.entry(Self::key(user, collection)).or_default();
        for mut record in records {
            if record.id.is_empty() {
                result.failed.insert(String::new(), "missing id".into());
                continue;
            }
            if rejected.contains(&record.id) {
                result.failed.insert(record.id, "rejected".into());
                continue;
            }
            record.collection = String::new();
            record.modified = timestamp;
            result.success.push(record.id.clone());
            stored.insert(record.id.clone(), record);
        }
        result
    }

    /// Deletes the listed ids. Returns how many existed.
    pub fn delete_ids(&self, user: &str, collection: &str, ids: &[String]) -> usize {
        let mut collections = self.collections.write();
        let Some(records) = collections.get_mut(&Self::key(user, collection)) else {
            return 0;
        };
        ids.iter().filter(|id| records.remove(*id).is_some()).count()
    }

    /// Deletes records last written before `older`. Returns how many.
    pub fn delete_older(&self, user: &str, collection: &str, older: ServerTime) -> usize {
        let mut collections = self.collections.write();
        let Some(records) = collections.get_mut(&Self::key(user, collection)) else {
            return 0;
        };
        let before = records.len();
        let cutoff = to_centis(older);
        records.retain(|_, r| to_centis(r.modified) >= cutoff);
        before - records.len()
    }

    /// Deletes a whole collection.
    pub fn wipe(&self, user: &str, collection: &str) -> bool {
        self.collections
            .write()
            .remove(&Self::key(user, collection))
            .is_some()
    }

    /// Returns the number of stored records, live or expired.
    pub fn count(&self, user: &str, collection: &str) -> usize {
        self.collections
            .read()
            .get(&Self::key(user, collection))
            .map_or(0, BTreeMap::len)
    }
}

impl Default for RecordStorage {
    fn default() -> Self {
        Self::new()
    }
}
