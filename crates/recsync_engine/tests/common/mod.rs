//! Shared fixtures: devices syncing through an in-process storage server.

#![allow(dead_code)]

use recsync_engine::{
    fetch_meta_global, put_meta_global, Collaborators, Crypto, CollectionResource, EngineConfig,
    HttpCollection, KeyBundle, LoopbackClient, LoopbackServer, ManualClock, MemoryStore,
    MemoryTracker, SyncEngine, SyncKey,
};
use recsync_protocol::{CryptoRecord, EngineMeta, HttpResponse, Method, ServerTime};
use recsync_server::{ServerConfig, StorageServer};
use recsync_storage::Prefs;
use serde_json::Value;
use std::sync::Arc;

/// Account every device signs in to.
pub const USER: &str = "alice";

/// Local wall-clock time devices start at.
pub const START: f64 = 1_000_000.0;

/// Routes loopback requests into a shared server.
pub struct Server(pub Arc<StorageServer>);

impl LoopbackServer for Server {
    fn handle(&self, method: Method, path_and_query: &str, body: &[u8]) -> HttpResponse {
        self.0.handle(method, path_and_query, body)
    }
}

pub fn server() -> Arc<StorageServer> {
    Arc::new(StorageServer::new(ServerConfig::default().with_user(USER)))
}

pub fn resource(server: &Arc<StorageServer>) -> Arc<dyn CollectionResource> {
    let url = StorageServer::storage_url("http://localhost", USER);
    let client = LoopbackClient::new(Server(Arc::clone(server)));
    Arc::new(HttpCollection::new(&url, client).unwrap())
}

pub fn account_key() -> SyncKey {
    SyncKey::derive(b"alice's account key material", b"recsync").unwrap()
}

pub fn account_crypto() -> Arc<KeyBundle> {
    Arc::new(KeyBundle::new(account_key()))
}

/// Records `{version, syncID}` for `collection` in the server's metadata.
pub fn publish_meta(server: &Arc<StorageServer>, collection: &str, version: u32, sync_id: &str) {
    let resource = resource(server);
    let mut meta = fetch_meta_global(&*resource).unwrap();
    meta.set_engine(
        collection,
        EngineMeta {
            version,
            sync_id: sync_id.to_string(),
        },
    );
    put_meta_global(&*resource, &meta).unwrap();
}

pub fn remote_meta(server: &Arc<StorageServer>, collection: &str) -> EngineMeta {
    fetch_meta_global(&*resource(server)).unwrap().engine(collection)
}

/// Stores an encrypted record on the server, as another device would.
pub fn seed(
    server: &Arc<StorageServer>,
    crypto: &dyn Crypto,
    collection: &str,
    id: &str,
    cleartext: Value,
    sortindex: i64,
) -> ServerTime {
    let record = CryptoRecord::new(collection, id, cleartext).with_sortindex(sortindex);
    let encrypted = crypto.encrypt(&record).unwrap();
    server.insert_record(USER, collection, encrypted)
}

/// Decrypts a record straight from the server.
pub fn read_remote(server: &Arc<StorageServer>, collection: &str, id: &str) -> Option<Value> {
    let mut record = server.record(USER, collection, id)?;
    record.collection = collection.to_string();
    Some(account_crypto().decrypt(&record).unwrap().cleartext)
}

/// One install of a content-versioned engine.
pub struct Device {
    pub engine: SyncEngine,
    pub store: Arc<MemoryStore>,
    pub tracker: Arc<MemoryTracker>,
    pub clock: Arc<ManualClock>,
    pub prefs: Prefs,
}

pub struct DeviceBuilder {
    config: EngineConfig,
    crypto: Arc<dyn Crypto>,
    prefs: Prefs,
    dupe_key: Option<String>,
}

impl DeviceBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            crypto: account_crypto(),
            prefs: Prefs::in_memory(),
            dupe_key: None,
        }
    }

    pub fn crypto(mut self, crypto: Arc<dyn Crypto>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn prefs(mut self, prefs: Prefs) -> Self {
        self.prefs = prefs;
        self
    }

    pub fn dupe_key(mut self, field: &str) -> Self {
        self.dupe_key = Some(field.to_string());
        self
    }

    pub fn build(self, server: &Arc<StorageServer>) -> Device {
        let clock = Arc::new(ManualClock::new(START));
        let tracker = Arc::new(MemoryTracker::with_clock(clock.clone()));
        let mut store = MemoryStore::new().with_tracker(tracker.clone());
        if let Some(field) = self.dupe_key {
            store = store.with_dupe_key(field);
        }
        let store = Arc::new(store);
        let parts =
            Collaborators::new(tracker.clone(), self.crypto, resource(server)).with_clock(clock.clone());
        let engine = SyncEngine::new(self.config, self.prefs.clone(), store.clone(), parts);
        Device {
            engine,
            store,
            tracker,
            clock,
            prefs: self.prefs,
        }
    }
}

pub fn device(server: &Arc<StorageServer>, name: &str) -> Device {
    DeviceBuilder::new(EngineConfig::new(name)).build(server)
}
