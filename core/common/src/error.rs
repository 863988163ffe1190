//! Common error types for LotS.

use thiserror::Error;

/// Top-level error type for LotS vault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A crypto operation was attempted while no key is held.
    #[error("Vault is locked. Unlock it with the master password first")]
    VaultLocked,

    /// Ciphertext could not be decrypted (bad padding, wrong key, corrupt data).
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Salt or iteration input could not be used for key derivation.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// The supplied password does not match the stored verifier.
    #[error("Invalid password")]
    InvalidPassword,

    /// Any other cryptographic failure.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_readable() {
        assert_eq!(
            Error::VaultLocked.to_string(),
            "Vault is locked. Unlock it with the master password first"
        );
        assert_eq!(
            Error::Decryption("bad padding".to_string()).to_string(),
            "Decryption failed: bad padding"
        );
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
