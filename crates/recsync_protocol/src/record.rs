//! Wire and decrypted record types.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ServerTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An encrypted record as it travels on the wire (a WBO).
///
/// `payload` is an opaque string produced by the crypto wrapper. `modified`
/// is assigned by the server on write and is ignored on upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record ID, unique within its collection.
    pub id: String,
    /// Collection name. Not part of the wire body; filled in by the receiver.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collection: String,
    /// Server timestamp of the last write.
    #[serde(default)]
    pub modified: ServerTime,
    /// Server-side ordering weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortindex: Option<i64>,
    /// Seconds until server-side expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Encrypted payload.
    pub payload: String,
}

impl Record {
    /// Creates a record with the given payload.
    pub fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            modified: 0.0,
            sortindex: None,
            ttl: None,
            payload: payload.into(),
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let record: Self = serde_json::from_slice(bytes)?;
        if record.id.is_empty() {
            return Err(ProtocolError::invalid_record("", "empty id"));
        }
        Ok(record)
    }
}

/// A decrypted record.
///
/// The cleartext is the application payload. A cleartext carrying
/// `"deleted": true` is a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct CryptoRecord {
    /// Record ID.
    pub id: String,
    /// Collection name.
    pub collection: String,
    /// Server timestamp of the last write.
    pub modified: ServerTime,
    /// Server-side ordering weight used on upload.
    pub sortindex: Option<i64>,
    /// Seconds until server-side expiry, used on upload.
    pub ttl: Option<u64>,
    /// Decrypted application payload.
    pub cleartext: Value,
}

impl CryptoRecord {
    /// Creates a record with the given cleartext.
    pub fn new(collection: impl Into<String>, id: impl Into<String>, cleartext: Value) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            modified: 0.0,
            sortindex: None,
            ttl: None,
            cleartext,
        }
    }

    /// Creates a deletion marker for `id`.
    pub fn tombstone(collection: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        let mut body = Map::new();
        body.insert("id".into(), Value::String(id.clone()));
        body.insert("deleted".into(), Value::Bool(true));
        Self::new(collection, id, Value::Object(body))
    }

    /// Sets the TTL.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the sort index.
    pub fn with_sortindex(mut self, sortindex: i64) -> Self {
        self.sortindex = Some(sortindex);
        self
    }

    /// Returns true if this record is a deletion marker.
    pub fn is_deleted(&self) -> bool {
        self.cleartext
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns a cleartext field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.cleartext.get(name)
    }
}
