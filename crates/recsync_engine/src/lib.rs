//! # recsync Engine
//!
//! Record sync engine for recsync.
//!
//! This crate provides:
//! - The engine life cycle (startup → process incoming → upload outgoing →
//!   finish, with cleanup always run afterwards)
//! - Reconciliation of incoming records against pending local edits
//! - Batched, paginated download and chunked upload
//! - The clients engine: device registry, cross-device commands and send-tab
//! - AES-GCM record encryption
//! - HTTP collection transport abstraction
//!
//! ## Architecture
//!
//! A [`SyncEngine`] syncs one collection. It is built from a [`Store`] that
//! holds local records, a [`Tracker`] that notes local edits, a [`Crypto`]
//! that seals payloads and a [`CollectionResource`] that talks to the
//! server. Between runs only a few scalars persist, through
//! `recsync_storage::Prefs`:
//!
//! - `<name>.syncID`: generation marker shared with the server
//! - `<name>.lastSync`: server-clock watermark of the newest record seen
//! - `<name>.lastSyncLocal`: local clock at the last startup, in ms
//!
//! ## Key Invariants
//!
//! - Incoming is processed before outgoing
//! - `lastSync` never decreases except by an explicit reset
//! - Local edits not confirmed by the server go back to the tracker
//! - Applying incoming records never re-marks them as locally changed
//! - Server time and local time are never compared with each other

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changes;
pub mod clients;
mod clock;
mod config;
mod crypto;
mod engine;
mod error;
mod http;
mod reconciler;
mod resource;
mod state;
mod store;
mod timing;
mod tracker;

pub use changes::{DeleteSet, ModifiedSet};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ClientsConfig, EngineConfig, CLIENTS_TTL, CLIENTS_TTL_REFRESH, DEFAULT_TAB_STATE_TTL,
    DELETE_CHUNK_SIZE, MAX_UPLOAD_RECORDS, MOBILE_BATCH_SIZE, SCORE_INCREMENT_XLARGE,
};
pub use crypto::{
    Crypto, CryptoError, CryptoResult, KeyBundle, KeyRecovery, SyncKey, KEY_SIZE, NONCE_SIZE,
};
pub use engine::{Collaborators, Engine, SyncEngine, SyncOutcome};
pub use error::{FailureCode, SyncError, SyncResult};
pub use http::{HttpClient, HttpCollection, LoopbackClient, LoopbackServer};
pub use reconciler::{
    prefer_local_dupe_id, remote_wins, AlwaysApply, CorruptRecord, ReconcileContext, Reconciler,
    Reconciliation, StandardReconciler,
};
pub use resource::{fetch_meta_global, put_meta_global, CollectionResource};
pub use state::{make_guid, EngineState};
pub use store::{MemoryStore, Store};
pub use timing::{PhaseStats, Timed};
pub use tracker::{MemoryTracker, Tracker};
