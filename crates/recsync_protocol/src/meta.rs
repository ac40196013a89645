//! Per-account metadata record.

use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Collection holding the metadata record.
pub const META_COLLECTION: &str = "meta";
/// ID of the metadata record within [`META_COLLECTION`].
pub const META_GLOBAL_ID: &str = "global";

/// Server-side schema version and generation marker for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMeta {
    /// Schema version. Missing versions read as 0.
    #[serde(default)]
    pub version: u32,
    /// Generation marker. Missing markers read as empty.
    #[serde(default, rename = "syncID")]
    pub sync_id: String,
}

/// The single well-known metadata record for an account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaGlobal {
    /// Account-wide generation marker.
    #[serde(default, rename = "syncID", skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<String>,
    /// Storage format version.
    #[serde(default, rename = "storageVersion", skip_serializing_if = "Option::is_none")]
    pub storage_version: Option<u32>,
    /// Per-collection metadata keyed by collection name.
    #[serde(default)]
    pub engines: BTreeMap<String, EngineMeta>,
}

impl MetaGlobal {
    /// Returns the stored metadata for `collection`, or defaults when absent.
    pub fn engine(&self, collection: &str) -> EngineMeta {
        self.engines.get(collection).cloned().unwrap_or_default()
    }

    /// Replaces the metadata for `collection`.
    pub fn set_engine(&mut self, collection: impl Into<String>, meta: EngineMeta) {
        self.engines.insert(collection.into(), meta);
    }

    /// Encodes to a JSON payload string.
    pub fn to_payload(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from a JSON payload string.
    pub fn from_payload(payload: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
