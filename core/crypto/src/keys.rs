//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use rand::{rngs::OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use lots_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of freshly generated salts in bytes (128-bit).
pub const SALT_LENGTH: usize = 16;

/// Length of AES-CBC initialization vectors in bytes (128-bit).
pub const IV_LENGTH: usize = 16;

/// Master key derived from the user's password.
///
/// Used directly as the AES-256 key for every envelope in the vault.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random key. Only useful for tests and ephemeral data.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Salt for key derivation and password verifiers.
///
/// Newly generated salts are always [`SALT_LENGTH`] bytes. Salts read back
/// from storage may be of any non-empty length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = vec![0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    ///
    /// # Errors
    /// - Returns error if `bytes` is empty
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::KeyDerivation("Salt cannot be empty".to_string()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Parse a hex encoded salt.
    pub fn from_hex(hex_salt: &str) -> Result<Self> {
        let bytes = hex::decode(hex_salt.trim())
            .map_err(|e| Error::KeyDerivation(format!("Malformed salt: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Hex encoding used in persisted records and envelopes.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this salt meets the minimum length required for new vaults.
    pub fn is_full_strength(&self) -> bool {
        self.0.len() >= SALT_LENGTH
    }
}

/// Initialization vector for AES-CBC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; IV_LENGTH]);

impl Iv {
    /// Generate a random IV.
    pub fn generate() -> Self {
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);
        Self(iv)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; IV_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a hex encoded IV.
    pub fn from_hex(hex_iv: &str) -> Result<Self> {
        let mut iv = [0u8; IV_LENGTH];
        hex::decode_to_slice(hex_iv.trim(), &mut iv)
            .map_err(|e| Error::Decryption(format!("Malformed IV: {}", e)))?;
        Ok(Self(iv))
    }

    /// Hex encoding used in envelopes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the IV bytes.
    pub fn as_bytes(&self) -> &[u8; IV_LENGTH] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_debug_redacted() {
        let key = MasterKey::from_bytes([7u8; KEY_LENGTH]);
        assert_eq!(format!("{:?}", key), "MasterKey([REDACTED])");
    }

    #[test]
    fn test_master_key_generate() {
        let key1 = MasterKey::generate();
        let key2 = MasterKey::generate();

        // Random keys should be different
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        assert_eq!(salt1.as_bytes().len(), SALT_LENGTH);
        assert!(salt1.is_full_strength());
        assert_ne!(salt1, salt2);
    }

    #[test]
    fn test_salt_hex() {
        let salt = Salt::from_hex("00ff10").unwrap();
        assert_eq!(salt.as_bytes(), &[0x00, 0xff, 0x10]);
        assert_eq!(salt.to_hex(), "00ff10");
        assert!(!salt.is_full_strength());
    }

    #[test]
    fn test_salt_rejects_malformed() {
        assert!(matches!(Salt::from_hex(""), Err(Error::KeyDerivation(_))));
        assert!(matches!(Salt::from_hex("abc"), Err(Error::KeyDerivation(_))));
        assert!(matches!(Salt::from_hex("zz"), Err(Error::KeyDerivation(_))));
    }

    #[test]
    fn test_iv_hex() {
        let iv = Iv::generate();
        assert_eq!(Iv::from_hex(&iv.to_hex()).unwrap(), iv);
        assert!(Iv::from_hex("0011").is_err());
    }
}
