//! Vault session management.
//!
//! A session is the explicit context object that holds the derived key for
//! one user. It starts Locked, becomes Unlocked through [`VaultSession::setup`]
//! or [`VaultSession::unlock`], and returns to Locked on [`VaultSession::lock`]
//! or drop. Keys are zeroized when released.
//!
//! A session is not shared across users. Wrap it in a mutex if several
//! threads need the same one.

use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::config::VaultConfig;
use lots_common::{Error, Result};
use lots_crypto::{cipher, derive_key, EncryptedEnvelope, KdfParams, MasterKey, Salt};

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Key is held; crypto operations are allowed.
    Unlocked,
    /// No key is held.
    Locked,
}

/// Key plus the parameters it was derived with.
struct MasterKeyMaterial {
    key: MasterKey,
    salt: Salt,
    params: KdfParams,
}

/// Vault session holding the derived master key.
#[derive(Default)]
pub struct VaultSession {
    material: Option<MasterKeyMaterial>,
}

impl VaultSession {
    /// Create a locked session.
    pub fn new() -> Self {
        Self::default()
    }

    /// First-time setup: create a vault configuration and unlock with it.
    ///
    /// The caller persists the returned config and decides whether setup
    /// has already happened (for example by checking for a stored config).
    ///
    /// # Postconditions
    /// - Session is Unlocked
    /// - Returned config holds a fresh salt, the iteration count and a verifier
    ///
    /// # Errors
    /// - Password shorter than the setup minimum
    /// - KDF failure
    pub fn setup(&mut self, password: &str, params: KdfParams) -> Result<VaultConfig> {
        let config = VaultConfig::new(password, params)?;
        let salt = config.salt()?;
        self.unlock_with(password, &salt, params)?;

        info!(iterations = params.iterations, "Vault set up");
        Ok(config)
    }

    /// Unlock using a stored configuration.
    ///
    /// When the config carries a verifier the password is checked first and
    /// a mismatch leaves the session Locked. Without a verifier a wrong
    /// password cannot be detected here; it only shows up later as
    /// envelopes that fail to decrypt.
    ///
    /// # Returns
    /// - `Ok(true)` if the session is now Unlocked
    /// - `Ok(false)` if the verifier rejected the password
    ///
    /// # Errors
    /// - Incompatible vault version
    /// - Malformed salt or iteration count
    pub fn unlock(&mut self, password: &str, config: &VaultConfig) -> Result<bool> {
        if !config.version.is_compatible() {
            return Err(Error::InvalidInput(format!(
                "Incompatible vault version: {}.{}",
                config.version.major, config.version.minor
            )));
        }

        let salt = config.salt()?;
        let params = config.kdf_params()?;
        if params.is_below_default() {
            warn!(iterations = params.iterations, "PBKDF2 iteration count below default");
        }

        match config.verify_password(password.as_bytes())? {
            Some(false) => {
                warn!("Unlock rejected: password does not match verifier");
                self.lock();
                return Ok(false);
            }
            Some(true) => debug!("Password verifier matched"),
            None => debug!("No password verifier stored; unlocking unverified"),
        }

        self.unlock_with(password, &salt, params)?;
        Ok(true)
    }

    /// Unlock by re-deriving the key from `(password, salt, iterations)`.
    ///
    /// This never checks the password. Prefer [`VaultSession::unlock`].
    pub fn unlock_with(&mut self, password: &str, salt: &Salt, params: KdfParams) -> Result<()> {
        let key = derive_key(password.as_bytes(), salt, &params)?;
        self.material = Some(MasterKeyMaterial {
            key,
            salt: salt.clone(),
            params,
        });

        info!("Vault unlocked");
        Ok(())
    }

    /// Discard the key. Idempotent.
    pub fn lock(&mut self) {
        if self.material.take().is_some() {
            info!("Vault locked");
        }
    }

    /// Check if the session holds a key.
    pub fn is_unlocked(&self) -> bool {
        self.material.is_some()
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        if self.is_unlocked() {
            SessionState::Unlocked
        } else {
            SessionState::Locked
        }
    }

    fn material(&self) -> Result<&MasterKeyMaterial> {
        self.material.as_ref().ok_or(Error::VaultLocked)
    }

    /// Get the master key, if session is unlocked.
    pub fn master_key(&self) -> Result<&MasterKey> {
        Ok(&self.material()?.key)
    }

    /// Salt the current key was derived with.
    pub fn salt(&self) -> Result<&Salt> {
        Ok(&self.material()?.salt)
    }

    /// KDF parameters the current key was derived with.
    pub fn kdf_params(&self) -> Result<KdfParams> {
        Ok(self.material()?.params)
    }

    /// Encrypt a plaintext string under the session key.
    ///
    /// # Errors
    /// - `VaultLocked` if no key is held
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedEnvelope> {
        let material = self.material()?;
        let envelope = cipher::encrypt(&material.key, &material.params, plaintext)?;
        debug!(len = plaintext.len(), "Encrypted payload");
        Ok(envelope)
    }

    /// Decrypt an envelope under the session key.
    ///
    /// # Errors
    /// - `VaultLocked` if no key is held
    /// - `Decryption` on malformed data, bad padding or an empty result
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<String> {
        let material = self.material()?;
        if envelope.iterations != material.params.iterations {
            warn!(
                envelope = envelope.iterations,
                session = material.params.iterations,
                "Envelope iteration count differs from session key"
            );
        }
        cipher::decrypt(&material.key, envelope)
    }

    /// Change the master password.
    ///
    /// Verifies `old_password`, creates a new config (fresh salt and verifier,
    /// iteration count never lower than before), and re-encrypts `envelopes`
    /// under the new key. On success the session holds the new key.
    ///
    /// # Errors
    /// - `VaultLocked` if the session is locked
    /// - `InvalidPassword` if `old_password` is rejected by the verifier
    /// - Any decryption error from the supplied envelopes; the session keeps
    ///   the old key in that case
    pub fn change_password(
        &mut self,
        old_password: &str,
        new_password: &str,
        config: &VaultConfig,
        envelopes: &[EncryptedEnvelope],
    ) -> Result<(VaultConfig, Vec<EncryptedEnvelope>)> {
        let current = self.kdf_params()?;

        if config.verify_password(old_password.as_bytes())? == Some(false) {
            return Err(Error::InvalidPassword);
        }
        let old_key = derive_key(old_password.as_bytes(), &config.salt()?, &current)?;
        if !bool::from(old_key.as_bytes()[..].ct_eq(&self.master_key()?.as_bytes()[..])) {
            return Err(Error::InvalidPassword);
        }

        let plaintexts = envelopes
            .iter()
            .map(|envelope| self.decrypt(envelope))
            .collect::<Result<Vec<_>>>()?;

        let params = current.upgraded(config.master_iterations);
        let mut next = VaultSession::new();
        let new_config = next.setup(new_password, params)?;
        let reencrypted = plaintexts
            .iter()
            .map(|plaintext| next.encrypt(plaintext))
            .collect::<Result<Vec<_>>>()?;

        self.material = next.material.take();
        info!(reencrypted = reencrypted.len(), "Master password changed");
        Ok((new_config, reencrypted))
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.lock();
    }
}
