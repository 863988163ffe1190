//! Time-based one-time codes.
//!
//! Two schemes are available:
//! - [`TotpScheme::Rfc6238`]: standard TOTP (HMAC over the 8-byte big-endian
//!   counter with dynamic truncation), interoperable with authenticator apps.
//!   This is the default.
//! - [`TotpScheme::LegacyDigest`]: the older non-standard scheme,
//!   `SHA-256(secret || decimal counter)` with the first four digest bytes
//!   reduced modulo `10^digits`. Kept only to reproduce codes already shown
//!   to users; it does not match any authenticator app.
//!
//! Both are pure functions of the secret and the clock.

use chrono::Utc;
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::str::FromStr;

use lots_common::{Error, Result};

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Default time step in seconds.
pub const DEFAULT_STEP: u64 = 30;

/// Default number of digits in a code.
pub const DEFAULT_DIGITS: u32 = 6;

/// Bytes of entropy in a generated secret (32 base32 characters).
const SECRET_BYTES: usize = 20;

/// HMAC algorithm for RFC 6238 codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotpAlgorithm {
    Sha1,
    Sha256,
}

impl std::fmt::Display for TotpAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TotpAlgorithm::Sha1 => write!(f, "SHA1"),
            TotpAlgorithm::Sha256 => write!(f, "SHA256"),
        }
    }
}

impl FromStr for TotpAlgorithm {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(TotpAlgorithm::Sha1),
            "sha256" => Ok(TotpAlgorithm::Sha256),
            other => Err(Error::InvalidInput(format!(
                "Unsupported TOTP algorithm '{}'. Use 'sha1' or 'sha256'.",
                other
            ))),
        }
    }
}

/// Code derivation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotpScheme {
    Rfc6238(TotpAlgorithm),
    LegacyDigest,
}

/// TOTP parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpConfig {
    /// Time step in seconds.
    pub step: u64,
    /// Digits per code (6 to 8).
    pub digits: u32,
    pub scheme: TotpScheme,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            step: DEFAULT_STEP,
            digits: DEFAULT_DIGITS,
            scheme: TotpScheme::Rfc6238(TotpAlgorithm::Sha1),
        }
    }
}

impl TotpConfig {
    /// Parameters of the legacy digest scheme.
    pub fn legacy() -> Self {
        Self {
            scheme: TotpScheme::LegacyDigest,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(Error::InvalidInput(
                "TOTP step must be greater than 0".to_string(),
            ));
        }
        if !(6..=8).contains(&self.digits) {
            return Err(Error::InvalidInput(
                "TOTP digits must be between 6 and 8".to_string(),
            ));
        }
        Ok(())
    }
}

/// A code and how long it stays valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpCode {
    pub code: String,
    /// Seconds until the next step, always in `1..=step`.
    pub time_left_seconds: u64,
}

/// Seconds remaining in the current step.
///
/// # Errors
/// - `InvalidInput` if `step` is zero
pub fn time_left(step: u64, unix_seconds: u64) -> Result<u64> {
    if step == 0 {
        return Err(Error::InvalidInput("TOTP step must be greater than zero".to_string()));
    }
    Ok(step - (unix_seconds % step))
}

/// Compute the code for `secret` at a given Unix time.
///
/// # Errors
/// - `InvalidInput` for an empty secret, a secret that is not base32
///   (RFC 6238 only), or invalid parameters
pub fn code_at(secret: &str, config: &TotpConfig, unix_seconds: u64) -> Result<TotpCode> {
    config.validate()?;
    if secret.trim().is_empty() {
        return Err(Error::InvalidInput("TOTP secret cannot be empty".to_string()));
    }

    let counter = unix_seconds / config.step;
    let modulus = 10u32.pow(config.digits);

    let value = match config.scheme {
        TotpScheme::Rfc6238(algorithm) => {
            let key = decode_secret(secret)?;
            rfc6238_value(&key, algorithm, counter)?
        }
        TotpScheme::LegacyDigest => legacy_value(secret, counter),
    };

    Ok(TotpCode {
        code: format!("{:0width$}", value % modulus, width = config.digits as usize),
        time_left_seconds: time_left(config.step, unix_seconds)?,
    })
}

/// Compute the code for `secret` at the current wall-clock time.
pub fn current_code(secret: &str, config: &TotpConfig) -> Result<TotpCode> {
    let now = Utc::now().timestamp().max(0) as u64;
    code_at(secret, config, now)
}

fn rfc6238_value(key: &[u8], algorithm: TotpAlgorithm, counter: u64) -> Result<u32> {
    let counter_bytes = counter.to_be_bytes();
    let digest = match algorithm {
        TotpAlgorithm::Sha1 => {
            let mut mac = HmacSha1::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("Invalid TOTP key: {}", e)))?;
            mac.update(&counter_bytes);
            mac.finalize().into_bytes().to_vec()
        }
        TotpAlgorithm::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("Invalid TOTP key: {}", e)))?;
            mac.update(&counter_bytes);
            mac.finalize().into_bytes().to_vec()
        }
    };

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Ok(binary)
}

fn legacy_value(secret: &str, counter: u64) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(counter.to_string().as_bytes());
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn normalize_secret(secret: &str) -> String {
    secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let normalized = normalize_secret(secret);
    let key = BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| Error::InvalidInput("TOTP secret must be valid base32".to_string()))?;
    if key.is_empty() {
        return Err(Error::InvalidInput("TOTP secret cannot be empty".to_string()));
    }
    Ok(key)
}

/// Generate a new random base32 secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// Build an `otpauth://totp/` provisioning URI, as encoded in setup QR codes.
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> String {
    let issuer_enc = utf8_percent_encode(issuer, NON_ALPHANUMERIC).to_string();
    let account_enc = utf8_percent_encode(account, NON_ALPHANUMERIC).to_string();
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}",
        issuer_enc,
        account_enc,
        normalize_secret(secret),
        issuer_enc
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 Appendix B seeds, base32 encoded.
    const SEED_SHA1: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
    const SEED_SHA256: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZA";

    fn rfc(algorithm: TotpAlgorithm, digits: u32) -> TotpConfig {
        TotpConfig {
            digits,
            scheme: TotpScheme::Rfc6238(algorithm),
            ..TotpConfig::default()
        }
    }

    #[test]
    fn test_rfc_sha1_vectors() {
        let config = rfc(TotpAlgorithm::Sha1, 8);
        assert_eq!(code_at(SEED_SHA1, &config, 59).unwrap().code, "94287082");
        assert_eq!(code_at(SEED_SHA1, &config, 1111111109).unwrap().code, "07081804");
        assert_eq!(code_at(SEED_SHA1, &config, 1234567890).unwrap().code, "89005924");

        let six = TotpConfig::default();
        assert_eq!(code_at(SEED_SHA1, &six, 59).unwrap().code, "287082");
        assert_eq!(code_at(SEED_SHA1, &six, 1111111109).unwrap().code, "081804");
    }

    #[test]
    fn test_rfc_sha256_vectors() {
        let config = rfc(TotpAlgorithm::Sha256, 8);
        assert_eq!(code_at(SEED_SHA256, &config, 59).unwrap().code, "46119246");
        assert_eq!(code_at(SEED_SHA256, &config, 1111111109).unwrap().code, "68084774");
        assert_eq!(code_at(SEED_SHA256, &config, 1234567890).unwrap().code, "91819424");
    }

    #[test]
    fn test_legacy_digest_vectors() {
        let config = TotpConfig::legacy();
        assert_eq!(code_at("JBSWY3DPEHPK3PXP", &config, 59).unwrap().code, "139833");
        assert_eq!(
            code_at("JBSWY3DPEHPK3PXP", &config, 1111111109).unwrap().code,
            "124872"
        );
    }

    #[test]
    fn test_legacy_accepts_non_base32_secret() {
        let config = TotpConfig::legacy();
        let code = code_at("not base32 at all!", &config, 1_000).unwrap();
        assert_eq!(code.code.len(), 6);
        assert!(code.code.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_time_left_range() {
        for t in 0..120u64 {
            let left = code_at(SEED_SHA1, &TotpConfig::default(), t)
                .unwrap()
                .time_left_seconds;
            assert!((1..=30).contains(&left));
        }
        assert_eq!(time_left(30, 0).unwrap(), 30);
        assert_eq!(time_left(30, 29).unwrap(), 1);
        assert_eq!(time_left(30, 30).unwrap(), 30);
    }

    #[test]
    fn test_time_left_rejects_zero_step() {
        assert!(matches!(time_left(0, 0), Err(Error::InvalidInput(_))));
        assert!(matches!(time_left(0, 1_700_000_000), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_same_window_same_code() {
        let config = TotpConfig::default();
        let a = code_at(SEED_SHA1, &config, 60).unwrap();
        let b = code_at(SEED_SHA1, &config, 89).unwrap();
        let c = code_at(SEED_SHA1, &config, 90).unwrap();
        assert_eq!(a.code, b.code);
        assert_ne!(a.time_left_seconds, b.time_left_seconds);
        assert_ne!(a.code, c.code);
    }

    #[test]
    fn test_current_code_consistent() {
        let secret = generate_secret();
        let config = TotpConfig::default();
        let first = current_code(&secret, &config).unwrap();
        let second = current_code(&secret, &config).unwrap();

        assert!((1..=30).contains(&first.time_left_seconds));
        // Equal unless the calls straddled a step boundary.
        if second.time_left_seconds <= first.time_left_seconds {
            assert_eq!(first.code, second.code);
        }
    }

    #[test]
    fn test_secret_normalization() {
        let config = TotpConfig::default();
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(code_at(spaced, &config, 59).unwrap().code, "287082");
    }

    #[test]
    fn test_invalid_inputs() {
        let config = TotpConfig::default();
        assert!(matches!(code_at("", &config, 0), Err(Error::InvalidInput(_))));
        assert!(matches!(code_at("1890!", &config, 0), Err(Error::InvalidInput(_))));

        let zero_step = TotpConfig { step: 0, ..config };
        assert!(code_at(SEED_SHA1, &zero_step, 0).is_err());

        let too_many = TotpConfig { digits: 10, ..config };
        assert!(code_at(SEED_SHA1, &too_many, 0).is_err());
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(decode_secret(&a).is_ok());
    }

    #[test]
    fn test_provisioning_uri() {
        let uri = provisioning_uri("abcd efgh", "alice@example.com", "LotS");
        assert_eq!(
            uri,
            "otpauth://totp/LotS:alice%40example%2Ecom?secret=ABCDEFGH&issuer=LotS"
        );
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("SHA256".parse::<TotpAlgorithm>().unwrap(), TotpAlgorithm::Sha256);
        assert!("md5".parse::<TotpAlgorithm>().is_err());
    }
}
