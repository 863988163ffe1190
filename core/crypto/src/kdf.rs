//! Key derivation using PBKDF2-HMAC-SHA256.
//!
//! The iteration count is stored next to every salt so a key can always be
//! re-derived from `(password, salt, iterations)`, even after the default
//! is raised.

use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use lots_common::{Error, Result};

/// Default PBKDF2 iteration count for new vaults.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Parameters for PBKDF2 key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of PBKDF2 iterations.
    pub iterations: u32,
}

impl KdfParams {
    /// Create parameters with an explicit iteration count.
    ///
    /// Counts below [`DEFAULT_ITERATIONS`] are accepted so historical data
    /// stays readable, but are logged as weakened.
    ///
    /// # Errors
    /// - Returns error if `iterations` is zero
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations == 0 {
            return Err(Error::KeyDerivation(
                "Iteration count must be greater than zero".to_string(),
            ));
        }
        if iterations < DEFAULT_ITERATIONS {
            warn!(
                iterations,
                default = DEFAULT_ITERATIONS,
                "PBKDF2 iteration count below default"
            );
        }
        Ok(Self { iterations })
    }

    /// Return parameters with at least `iterations` rounds. Never lowers the count.
    pub fn upgraded(self, iterations: u32) -> Self {
        Self {
            iterations: self.iterations.max(iterations),
        }
    }

    /// Whether this count is weaker than the current default.
    pub fn is_below_default(&self) -> bool {
        self.iterations < DEFAULT_ITERATIONS
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Raw PBKDF2-HMAC-SHA256 with a 256-bit output.
///
/// Shared by [`derive_key`] and the password verifier; callers keep the two
/// outputs apart through distinct types and independent salts.
pub(crate) fn pbkdf2_sha256(
    password: &[u8],
    salt: &Salt,
    params: &KdfParams,
) -> Result<[u8; KEY_LENGTH]> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    if params.iterations == 0 {
        return Err(Error::KeyDerivation(
            "Iteration count must be greater than zero".to_string(),
        ));
    }

    let mut out = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password, salt.as_bytes(), params.iterations, &mut out);
    Ok(out)
}

/// Derive a master key from a password and salt.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params.iterations` must be greater than zero
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `InvalidInput` if password is empty
/// - `KeyDerivation` if the iteration count is zero
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    pbkdf2_sha256(password, salt, params).map(MasterKey::from_bytes)
}
