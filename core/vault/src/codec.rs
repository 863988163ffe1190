//! JSON object encryption on top of a session.

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::item::{Fields, StorageItem};
use crate::session::VaultSession;
use lots_common::{Error, Result};
use lots_crypto::EncryptedEnvelope;

/// Encrypts and decrypts structured values through an unlocked session.
///
/// Holding a codec borrows the session, so it cannot be locked underneath.
pub struct ObjectCodec<'a> {
    session: &'a VaultSession,
}

impl<'a> ObjectCodec<'a> {
    /// Create a codec for an unlocked session.
    ///
    /// # Errors
    /// - `VaultLocked` if the session holds no key
    pub fn new(session: &'a VaultSession) -> Result<Self> {
        if !session.is_unlocked() {
            return Err(Error::VaultLocked);
        }
        Ok(Self { session })
    }

    /// Serialize `value` to JSON and encrypt it.
    pub fn encrypt_object<T: Serialize + ?Sized>(&self, value: &T) -> Result<EncryptedEnvelope> {
        let json = serde_json::to_string(value)
            .map_err(|e| Error::Serialization(format!("Cannot serialize value: {}", e)))?;
        self.session.encrypt(&json)
    }

    /// Decrypt an envelope and parse the JSON inside.
    ///
    /// # Errors
    /// - `Decryption` if the envelope cannot be decrypted
    /// - `Serialization` if the plaintext is not the expected JSON. With CBC
    ///   this usually means a wrong key that happened to pass the padding check.
    pub fn decrypt_object<T: DeserializeOwned>(&self, envelope: &EncryptedEnvelope) -> Result<T> {
        let json = self.session.decrypt(envelope)?;
        serde_json::from_str(&json).map_err(|e| {
            debug!("Decrypted payload is not valid JSON");
            Error::Serialization(format!("Decrypted data is not valid JSON: {}", e))
        })
    }

    /// Encrypt an item's field map.
    pub fn seal_fields(&self, item: &StorageItem) -> Result<EncryptedEnvelope> {
        self.encrypt_object(&item.fields)
    }

    /// Decrypt a field map produced by [`ObjectCodec::seal_fields`].
    pub fn open_fields(&self, envelope: &EncryptedEnvelope) -> Result<Fields> {
        self.decrypt_object(envelope)
    }
}
