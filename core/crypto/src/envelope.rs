//! Self-describing unit of encrypted data.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::keys::{Iv, Salt};
use lots_common::{Error, Result};

/// Encrypted payload plus everything needed to decrypt it with the right key.
///
/// Serialized as `{ "encryptedData", "salt", "iv", "iterations" }`, the shape
/// consumed by the external storage collaborator. The `salt` is informational:
/// it is freshly generated per envelope but not used to derive the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    /// Base64 AES-256-CBC ciphertext (PKCS#7 padded).
    pub encrypted_data: String,
    /// Hex encoded per-envelope salt.
    pub salt: String,
    /// Hex encoded 128-bit IV.
    pub iv: String,
    /// PBKDF2 iteration count of the key that produced this envelope.
    pub iterations: u32,
}

impl EncryptedEnvelope {
    pub(crate) fn new(ciphertext: &[u8], salt: &Salt, iv: &Iv, iterations: u32) -> Self {
        Self {
            encrypted_data: STANDARD.encode(ciphertext),
            salt: salt.to_hex(),
            iv: iv.to_hex(),
            iterations,
        }
    }

    /// Decode the ciphertext bytes.
    pub fn ciphertext(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.encrypted_data.trim())
            .map_err(|e| Error::Decryption(format!("Malformed ciphertext: {}", e)))
    }

    /// Parse the IV.
    pub fn iv(&self) -> Result<Iv> {
        Iv::from_hex(&self.iv)
    }

    /// Parse the per-envelope salt.
    pub fn salt(&self) -> Result<Salt> {
        Salt::from_hex(&self.salt)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
