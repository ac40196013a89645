//! # recsync Protocol
//!
//! Wire records and collection protocol messages for recsync.
//!
//! This crate provides:
//! - [`Record`], the encrypted, transmissible form of a record (a WBO)
//! - [`CryptoRecord`], the decrypted form handed to stores and reconcilers
//! - Collection queries, POST results and DELETE filters
//! - [`MetaGlobal`], the per-account metadata record
//! - Client registry records, commands and send-tab side-channel records
//! - Transport-neutral HTTP request/response values
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clients;
mod collection;
mod error;
mod http;
mod meta;
mod record;

pub use clients::{
    ClientRecord, ClientType, Command, DisplayTabArgs, SendTabRecord, CLIENTS_COLLECTION,
    TAB_STATE_COLLECTION,
};
pub use collection::{
    CollectionQuery, DeleteFilter, GetItems, GetResponse, PostResponse, PostResult, SortOrder,
};
pub use error::{ProtocolError, ProtocolResult};
pub use http::{format_timestamp, HttpRequest, HttpResponse, Method, TIMESTAMP_HEADER};
pub use meta::{EngineMeta, MetaGlobal, META_COLLECTION, META_GLOBAL_ID};
pub use record::{CryptoRecord, Record};

/// Server clock value, in seconds since the epoch with fractional precision.
pub type ServerTime = f64;
