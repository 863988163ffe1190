//! Persisted vault configuration.
//!
//! This is the whole durable footprint of the vault: the master salt, the
//! iteration count and an optional password verifier. The derived key is
//! never part of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use lots_common::{Error, Result};
use lots_crypto::{hash_password, verify_password, KdfParams, PasswordHashRecord, Salt};

/// Minimum length of a master password chosen at setup.
pub const MIN_MASTER_PASSWORD_LENGTH: usize = 8;

/// Configuration file name.
pub const CONFIG_FILENAME: &str = "vault.config";

/// Vault format version for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultVersion {
    pub major: u32,
    pub minor: u32,
}

impl VaultVersion {
    /// Current vault format version.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    /// Check if this version is compatible with the current version.
    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for VaultVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Vault configuration as stored by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    /// Vault format version.
    #[serde(default)]
    pub version: VaultVersion,
    /// Hex encoded salt for master key derivation.
    pub master_salt: String,
    /// PBKDF2 iteration count for the master key and the verifier.
    pub master_iterations: u32,
    /// Hex encoded password verifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Hex encoded verifier salt, independent from `master_salt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash_salt: Option<String>,
    /// Vault creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl VaultConfig {
    /// Create a configuration for a new vault.
    ///
    /// # Preconditions
    /// - `password` must be at least [`MIN_MASTER_PASSWORD_LENGTH`] characters
    ///
    /// # Postconditions
    /// - Master salt is freshly generated (128-bit)
    /// - A verifier is recorded with its own, independent salt
    ///
    /// # Errors
    /// - Password too short
    /// - KDF failure
    pub fn new(password: &str, params: KdfParams) -> Result<Self> {
        if password.chars().count() < MIN_MASTER_PASSWORD_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Password must be at least {} characters long",
                MIN_MASTER_PASSWORD_LENGTH
            )));
        }

        let master_salt = Salt::generate();
        let mut verifier_salt = Salt::generate();
        while verifier_salt == master_salt {
            verifier_salt = Salt::generate();
        }
        let verifier = hash_password(password.as_bytes(), Some(&verifier_salt), &params)?;

        Ok(Self {
            version: VaultVersion::CURRENT,
            master_salt: master_salt.to_hex(),
            master_iterations: params.iterations,
            password_hash: Some(verifier.hash),
            password_hash_salt: Some(verifier.salt),
            created_at: Utc::now(),
        })
    }

    /// Configuration without a verifier, from a bare salt and iteration count.
    pub fn from_parts(salt: &Salt, params: KdfParams) -> Self {
        Self {
            version: VaultVersion::CURRENT,
            master_salt: salt.to_hex(),
            master_iterations: params.iterations,
            password_hash: None,
            password_hash_salt: None,
            created_at: Utc::now(),
        }
    }

    /// Parse the master salt.
    pub fn salt(&self) -> Result<Salt> {
        Salt::from_hex(&self.master_salt)
    }

    /// KDF parameters recorded for this vault.
    ///
    /// Low counts are returned as-is without logging; callers that act on
    /// them decide whether to warn.
    pub fn kdf_params(&self) -> Result<KdfParams> {
        if self.master_iterations == 0 {
            return Err(Error::KeyDerivation(
                "Iteration count must be greater than zero".to_string(),
            ));
        }
        Ok(KdfParams {
            iterations: self.master_iterations,
        })
    }

    /// The stored verifier, if both halves are present.
    pub fn verifier(&self) -> Option<PasswordHashRecord> {
        match (&self.password_hash, &self.password_hash_salt) {
            (Some(hash), Some(salt)) => Some(PasswordHashRecord {
                hash: hash.clone(),
                salt: salt.clone(),
            }),
            _ => None,
        }
    }

    /// Whether a password verifier is stored.
    pub fn has_verifier(&self) -> bool {
        self.verifier().is_some()
    }

    /// Check a password against the stored verifier.
    ///
    /// # Returns
    /// - `Ok(Some(true))` if password is correct
    /// - `Ok(Some(false))` if password is incorrect
    /// - `Ok(None)` if no verifier is stored
    pub fn verify_password(&self, password: &[u8]) -> Result<Option<bool>> {
        match self.verifier() {
            Some(record) => {
                verify_password(password, &record, &self.kdf_params()?).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Write this configuration to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
