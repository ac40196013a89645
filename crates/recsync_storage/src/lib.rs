//! # recsync Storage
//!
//! Durable key-value preference storage for recsync engines.
//!
//! Engines keep a handful of scalar values between runs: the collection
//! generation marker (`<name>.syncID`), the server-clock watermark
//! (`<name>.lastSync`), the local wall-clock snapshot (`<name>.lastSyncLocal`),
//! and client identity (`client.GUID`, `client.name`, `client.type`).
//! This crate provides the backend trait those values are written through
//! and a typed [`Prefs`] view on top of it.
//!
//! ## Available Backends
//!
//! - [`InMemoryPrefs`] - For testing and ephemeral hosts
//! - [`FilePrefs`] - A JSON document on disk, written atomically
//!
//! ## Example
//!
//! ```rust
//! use recsync_storage::{InMemoryPrefs, Prefs};
//! use std::sync::Arc;
//!
//! let prefs = Prefs::new(Arc::new(InMemoryPrefs::new()));
//! prefs.set_string("bookmarks.lastSync", "1234.56").unwrap();
//! assert_eq!(prefs.get_string("bookmarks.lastSync", "0").unwrap(), "1234.56");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod prefs;

pub use backend::PrefsBackend;
pub use error::{StorageError, StorageResult};
pub use file::FilePrefs;
pub use memory::InMemoryPrefs;
pub use prefs::Prefs;
