//! Remote collection abstraction.

use crate::error::SyncResult;
use recsync_protocol::{
    CollectionQuery, DeleteFilter, GetResponse, MetaGlobal, PostResponse, Record, ServerTime,
    META_COLLECTION, META_GLOBAL_ID,
};

/// Remote storage of records, grouped into named collections.
///
/// Implementations report transport failures and non-success statuses as
/// errors; the engine decides which of those abort a sync.
pub trait CollectionResource: Send + Sync {
    /// Lists or fetches records matching `query`.
    fn get(&self, collection: &str, query: &CollectionQuery) -> SyncResult<GetResponse>;

    /// Uploads a batch of records.
    fn post(&self, collection: &str, records: &[Record]) -> SyncResult<PostResponse>;

    /// Deletes records selected by `filter`.
    fn delete(&self, collection: &str, filter: &DeleteFilter) -> SyncResult<ServerTime>;

    /// Deletes a whole collection.
    fn wipe(&self, collection: &str) -> SyncResult<ServerTime>;

    /// Fetches a single record. A missing record yields `None`.
    fn fetch(&self, collection: &str, id: &str) -> SyncResult<Option<Record>>;

    /// Stores a single record.
    fn put(&self, collection: &str, record: &Record) -> SyncResult<ServerTime>;

    /// Deletes a single record.
    fn delete_record(&self, collection: &str, id: &str) -> SyncResult<ServerTime>;
}

/// Reads the account metadata record. A missing record reads as empty.
pub fn fetch_meta_global(resource: &dyn CollectionResource) -> SyncResult<MetaGlobal> {
    match resource.fetch(META_COLLECTION, META_GLOBAL_ID)? {
        Some(record) => Ok(MetaGlobal::from_payload(&record.payload)?),
        None => Ok(MetaGlobal::default()),
    }
}

/// Writes the account metadata record.
pub fn put_meta_global(resource: &dyn CollectionResource, meta: &MetaGlobal) -> SyncResult<()> {
    let record = Record::new(META_COLLECTION, META_GLOBAL_ID, meta.to_payload()?);
    resource.put(META_COLLECTION, &record)?;
    Ok(())
}
