//! Cryptographic primitives for LotS.
//!
//! This module provides:
//! - Key derivation using PBKDF2-HMAC-SHA256
//! - AES-256-CBC encryption into self-describing envelopes
//! - Secure password generation and password verifiers
//! - Time-based one-time codes
//!
//! # Security Notes
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Envelopes are NOT authenticated (CBC without MAC); tampering is only
//!   detected when it breaks the padding

pub mod cipher;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod password;
pub mod totp;

pub use cipher::{decrypt, encrypt};
pub use envelope::EncryptedEnvelope;
pub use kdf::{derive_key, KdfParams, DEFAULT_ITERATIONS};
pub use keys::{Iv, MasterKey, Salt};
pub use password::{
    generate_secure_password, hash_password, verify_password, CharsetOptions, PasswordHashRecord,
};
pub use totp::{TotpAlgorithm, TotpCode, TotpConfig, TotpScheme};
