//! # recsync Server
//!
//! Reference storage server for recsync.
//!
//! This crate provides:
//! - Collection endpoints: GET with `newer`/`full`/`limit`/`ids`/`sort`,
//!   batch POST, single-record GET/PUT/DELETE and DELETE by ids, by
//!   `older` or of a whole collection
//! - A monotonic server clock with two-decimal precision
//! - Server-side record expiry by TTL
//! - Fault injection and request logging for client tests
//!
//! # Protocol
//!
//! Every response carries `X-Weave-Timestamp`. Each write is stamped with
//! a timestamp strictly greater than any earlier one, and that timestamp
//! becomes the `modified` of every record it stored.
//!
//! The server keeps everything in memory and is meant to run in process,
//! behind a loopback HTTP client.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod storage;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler, Route, API_VERSION};
pub use server::{LoggedRequest, StorageServer};
pub use storage::{RecordStorage, ServerClock};
