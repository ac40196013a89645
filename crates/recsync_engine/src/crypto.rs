//! Payload encryption using AES-256-GCM.
//!
//! Each record's cleartext is serialized to JSON and sealed with a fresh
//! random nonce. The record's `collection/id` is bound as associated data,
//! so a payload moved to another record fails verification. The wire
//! payload is a JSON envelope:
//!
//! ```json
//! {"ciphertext": "<base64>", "nonce": "<base64>"}
//! ```

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::RwLock;
use rand::RngCore;
use recsync_protocol::{CryptoRecord, Record};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised while sealing or opening record payloads.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The authentication tag did not verify: wrong key or tampered payload.
    #[error("integrity check failed for record {id}")]
    IntegrityMismatch {
        /// Record ID.
        id: String,
    },

    /// The payload is not a valid envelope or the plaintext is not JSON.
    #[error("malformed payload for record {id}: {reason}")]
    MalformedPayload {
        /// Record ID.
        id: String,
        /// What was wrong.
        reason: String,
    },

    /// Encryption failed.
    #[error("encryption failed for record {0}")]
    EncryptionFailed(String),

    /// Key material has the wrong length.
    #[error("invalid key size: expected {KEY_SIZE}, got {0}")]
    InvalidKeySize(usize),

    /// HKDF expansion failed.
    #[error("key derivation failed")]
    KeyDerivation,
}

impl CryptoError {
    fn malformed(id: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Symmetric key for record payloads. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SyncKey {
    bytes: [u8; KEY_SIZE],
}

impl SyncKey {
    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeySize(bytes.len()));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Derives a key from high-entropy account secret material using HKDF-SHA256.
    pub fn derive(secret: &[u8], salt: &[u8]) -> CryptoResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), secret);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"recsync-record-key-v1", &mut bytes)
            .map_err(|_| CryptoError::KeyDerivation)?;
        Ok(Self { bytes })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(GenericArray::from_slice(&self.bytes))
    }
}

impl std::fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts outgoing records and decrypts incoming ones.
pub trait Crypto: Send + Sync {
    /// Seals a cleartext record into its wire form.
    fn encrypt(&self, record: &CryptoRecord) -> CryptoResult<Record>;

    /// Opens a wire record.
    ///
    /// A failed authentication check is reported as
    /// [`CryptoError::IntegrityMismatch`], distinct from malformed envelopes.
    fn decrypt(&self, record: &Record) -> CryptoResult<CryptoRecord>;
}

/// Host hook invoked when an incoming record fails integrity verification.
pub trait KeyRecovery: Send + Sync {
    /// Attempts to obtain fresh keys for `collection`.
    ///
    /// Returns true if decryption should be retried.
    fn recover_keys(&self, collection: &str) -> bool;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    ciphertext: String,
    nonce: String,
}

/// AES-256-GCM implementation of [`Crypto`] with a replaceable key.
pub struct KeyBundle {
    cipher: RwLock<Aes256Gcm>,
}

impl KeyBundle {
    /// Creates a bundle using `key`.
    pub fn new(key: SyncKey) -> Self {
        Self {
            cipher: RwLock::new(key.cipher()),
        }
    }

    /// Swaps in a new key, e.g. after key recovery.
    pub fn replace_key(&self, key: SyncKey) {
        *self.cipher.write() = key.cipher();
    }

    fn associated_data(collection: &str, id: &str) -> Vec<u8> {
        format!("{}/{}", collection, id).into_bytes()
    }
}

impl Crypto for KeyBundle {
    fn encrypt(&self, record: &CryptoRecord) -> CryptoResult<Record> {
        let plaintext = serde_json::to_vec(&record.cleartext)
            .map_err(|e| CryptoError::malformed(&record.id, e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let aad = Self::associated_data(&record.collection, &record.id);

        let ciphertext = self
            .cipher
            .read()
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed(record.id.clone()))?;

        let envelope = Envelope {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce_bytes),
        };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| CryptoError::malformed(&record.id, e.to_string()))?;

        let mut out = Record::new(record.collection.clone(), record.id.clone(), payload);
        out.modified = record.modified;
        out.sortindex = record.sortindex;
        out.ttl = record.ttl;
        Ok(out)
    }

    fn decrypt(&self, record: &Record) -> CryptoResult<CryptoRecord> {
        let envelope: Envelope = serde_json::from_str(&record.payload)
            .map_err(|e| CryptoError::malformed(&record.id, e.to_string()))?;
        let nonce = BASE64
            .decode(envelope.nonce.as_bytes())
            .map_err(|e| CryptoError::malformed(&record.id, e.to_string()))?;
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::malformed(&record.id, "bad nonce length"));
        }
        let ciphertext = BASE64
            .decode(envelope.ciphertext.as_bytes())
            .map_err(|e| CryptoError::malformed(&record.id, e.to_string()))?;

        let aad = Self::associated_data(&record.collection, &record.id);
        let plaintext = self
            .cipher
            .read()
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::IntegrityMismatch {
                id: record.id.clone(),
            })?;

        let cleartext = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::malformed(&record.id, e.to_string()))?;

        Ok(CryptoRecord {
            id: record.id.clone(),
            collection: record.collection.clone(),
            modified: record.modified,
            sortindex: record.sortindex,
            ttl: record.ttl,
            cleartext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> KeyBundle {
        KeyBundle::new(SyncKey::generate())
    }

    #[test]
    fn encrypt_decrypt_preserves_metadata() {
        let crypto = bundle();
        let record = CryptoRecord::new("bookmarks", "abc", json!({"title": "Rust"}))
            .with_ttl(60)
            .with_sortindex(5);

        let wire = crypto.encrypt(&record).unwrap();
        assert!(!wire.payload.contains("Rust"));
        assert_eq!(wire.ttl, Some(60));

        let back = crypto.decrypt(&wire).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn wrong_key_is_an_integrity_mismatch() {
        let wire = bundle()
            .encrypt(&CryptoRecord::new("tabs", "x", json!({})))
            .unwrap();
        let err = bundle().decrypt(&wire).unwrap_err();
        assert!(matches!(err, CryptoError::IntegrityMismatch { .. }));
    }

    #[test]
    fn moved_payload_fails_verification() {
        let crypto = bundle();
        let mut wire = crypto
            .encrypt(&CryptoRecord::new("tabs", "x", json!({"v": 1})))
            .unwrap();
        wire.id = "y".into();
        assert!(matches!(
            crypto.decrypt(&wire),
            Err(CryptoError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let wire = Record::new("tabs", "x", "not json");
        assert!(matches!(
            bundle().decrypt(&wire),
            Err(CryptoError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn replaced_key_decrypts_again() {
        let key = SyncKey::derive(b"account secret", b"salt").unwrap();
        let sender = KeyBundle::new(key.clone());
        let wire = sender
            .encrypt(&CryptoRecord::new("forms", "f", json!({"name": "q"})))
            .unwrap();

        let receiver = bundle();
        assert!(receiver.decrypt(&wire).is_err());
        receiver.replace_key(key);
        assert!(receiver.decrypt(&wire).is_ok());
    }

    #[test]
    fn key_debug_is_redacted() {
        let shown = format!("{:?}", SyncKey::generate());
        assert!(shown.contains("REDACTED"));
        assert!(SyncKey::from_bytes(&[0u8; 16]).is_err());
    }
}
