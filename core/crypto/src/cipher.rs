//! AES-256-CBC encryption with PKCS#7 padding.
//!
//! Each call draws a fresh random IV and a fresh informational salt, so no
//! two envelopes ever share either.
//!
//! # Security
//! CBC carries no authentication tag. A corrupted or tampered envelope is
//! only detected if it breaks the padding or the UTF-8 decoding; otherwise
//! it decrypts to garbage.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::envelope::EncryptedEnvelope;
use crate::kdf::KdfParams;
use crate::keys::{Iv, MasterKey, Salt};
use lots_common::{Error, Result, SensitiveBytes};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

fn encrypt_with_iv(key: &MasterKey, iv: &Iv, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), iv.as_bytes())
        .map_err(|e| Error::Crypto(format!("Cipher init failed: {}", e)))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn decrypt_with_iv(key: &MasterKey, iv: &Iv, ciphertext: &[u8]) -> Result<SensitiveBytes> {
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv.as_bytes())
        .map_err(|e| Error::Crypto(format!("Cipher init failed: {}", e)))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(SensitiveBytes::new)
        .map_err(|_| Error::Decryption("Invalid padding (wrong key or corrupted data)".to_string()))
}

/// Encrypt a UTF-8 plaintext into an envelope.
///
/// `params` is recorded in the envelope so the key can be re-derived later.
///
/// # Errors
/// - `InvalidInput` if plaintext is empty (empty plaintext cannot be
///   told apart from a failed decryption)
pub fn encrypt(key: &MasterKey, params: &KdfParams, plaintext: &str) -> Result<EncryptedEnvelope> {
    if plaintext.is_empty() {
        return Err(Error::InvalidInput("Plaintext cannot be empty".to_string()));
    }

    let iv = Iv::generate();
    let salt = Salt::generate();
    let ciphertext = encrypt_with_iv(key, &iv, plaintext.as_bytes())?;

    Ok(EncryptedEnvelope::new(&ciphertext, &salt, &iv, params.iterations))
}

/// Decrypt an envelope back to its UTF-8 plaintext.
///
/// # Errors
/// - `Decryption` if the envelope is malformed, the padding is invalid,
///   the result is not UTF-8, or the result is empty
pub fn decrypt(key: &MasterKey, envelope: &EncryptedEnvelope) -> Result<String> {
    let iv = envelope.iv()?;
    let ciphertext = envelope.ciphertext()?;

    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::Decryption(format!(
            "Ciphertext length {} is not a positive multiple of {}",
            ciphertext.len(),
            BLOCK_SIZE
        )));
    }

    let plaintext = decrypt_with_iv(key, &iv, &ciphertext)?;
    let text = std::str::from_utf8(plaintext.as_bytes())
        .map_err(|_| Error::Decryption("Malformed UTF-8 data".to_string()))?;

    if text.is_empty() {
        return Err(Error::Decryption(
            "Decryption resulted in empty string".to_string(),
        ));
    }

    Ok(text.to_string())
}
