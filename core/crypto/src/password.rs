//! Secure password generation and password verifiers.
//!
//! A verifier uses the same PBKDF2 construction as [`crate::derive_key`] but
//! with its own salt and its own output type, so it can never be mistaken
//! for the vault encryption key.

use rand::{rngs::OsRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::kdf::{pbkdf2_sha256, KdfParams};
use crate::keys::Salt;
use lots_common::{Error, Result};

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Default generated password length.
pub const DEFAULT_PASSWORD_LENGTH: usize = 16;

/// Shortest length offered by password generator front-ends.
pub const MIN_UI_PASSWORD_LENGTH: usize = 8;

/// Longest length offered by password generator front-ends.
pub const MAX_UI_PASSWORD_LENGTH: usize = 64;

/// Character classes to draw from. All classes are enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharsetOptions {
    pub lowercase: bool,
    pub uppercase: bool,
    pub digits: bool,
    pub symbols: bool,
}

impl Default for CharsetOptions {
    fn default() -> Self {
        Self {
            lowercase: true,
            uppercase: true,
            digits: true,
            symbols: true,
        }
    }
}

impl CharsetOptions {
    pub fn with_lowercase(mut self, include: bool) -> Self {
        self.lowercase = include;
        self
    }

    pub fn with_uppercase(mut self, include: bool) -> Self {
        self.uppercase = include;
        self
    }

    pub fn with_digits(mut self, include: bool) -> Self {
        self.digits = include;
        self
    }

    pub fn with_symbols(mut self, include: bool) -> Self {
        self.symbols = include;
        self
    }

    /// The combined character pool for the enabled classes.
    pub fn pool(&self) -> Vec<u8> {
        let mut pool = Vec::new();
        for (enabled, class) in [
            (self.lowercase, LOWERCASE),
            (self.uppercase, UPPERCASE),
            (self.digits, DIGITS),
            (self.symbols, SYMBOLS),
        ] {
            if enabled {
                pool.extend_from_slice(class);
            }
        }
        pool
    }
}

/// Clamp a requested length to the range front-ends offer.
pub fn clamp_ui_length(length: usize) -> usize {
    length.clamp(MIN_UI_PASSWORD_LENGTH, MAX_UI_PASSWORD_LENGTH)
}

/// Generate a password by drawing uniformly from the enabled classes.
///
/// Any positive length is accepted; callers presenting a UI should pass the
/// value through [`clamp_ui_length`] first.
///
/// # Errors
/// - `InvalidInput` if `length` is zero or no class is enabled
pub fn generate_secure_password(length: usize, options: &CharsetOptions) -> Result<String> {
    if length == 0 {
        return Err(Error::InvalidInput(
            "Password length must be at least 1".to_string(),
        ));
    }

    let pool = options.pool();
    if pool.is_empty() {
        return Err(Error::InvalidInput(
            "At least one character class must be enabled".to_string(),
        ));
    }

    let mut rng = OsRng;
    let password = (0..length)
        .filter_map(|_| pool.choose(&mut rng).map(|&b| b as char))
        .collect();
    Ok(password)
}

/// Password verifier: PBKDF2 output and its salt, both hex encoded.
///
/// Persisted as `passwordHash` / `passwordHashSalt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHashRecord {
    pub hash: String,
    pub salt: String,
}

/// Hash a password for later verification.
///
/// A fresh salt is generated unless one is supplied. Never pass the vault's
/// master salt here.
pub fn hash_password(
    password: &[u8],
    salt: Option<&Salt>,
    params: &KdfParams,
) -> Result<PasswordHashRecord> {
    let salt = salt.cloned().unwrap_or_else(Salt::generate);
    let hash = pbkdf2_sha256(password, &salt, params)?;

    Ok(PasswordHashRecord {
        hash: hex::encode(hash),
        salt: salt.to_hex(),
    })
}

/// Check a password against a stored verifier in constant time.
///
/// # Errors
/// - `KeyDerivation` if the stored salt or hash is not valid hex
pub fn verify_password(
    password: &[u8],
    record: &PasswordHashRecord,
    params: &KdfParams,
) -> Result<bool> {
    if password.is_empty() {
        return Ok(false);
    }

    let salt = Salt::from_hex(&record.salt)?;
    let expected = hex::decode(record.hash.trim())
        .map_err(|e| Error::KeyDerivation(format!("Malformed password hash: {}", e)))?;
    let computed = pbkdf2_sha256(password, &salt, params)?;

    Ok(computed[..].ct_eq(&expected[..]).into())
}
