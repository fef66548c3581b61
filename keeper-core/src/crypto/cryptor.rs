//! Per-login key hierarchy and envelope encryption.
//!
//! All keys are derived from the master password with Argon2id. Three salts
//! separate the data domains:
//!
//! - a fresh random salt per call for data that only lives in the local store
//! - `"<login>|secrets"` for payloads sent to the server (cached per instance)
//! - `"<login>|server"` for the value presented to the server as a password

use crate::crypto::cipher::{self, fill_random, KEY_SIZE};
use crate::crypto::kdf::{derive_key, KdfParams};
use crate::crypto::{CryptoError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use zeroize::Zeroizing;

/// Length of the random salt prepended to storage envelopes.
pub const STORAGE_SALT_SIZE: usize = 16;

const SECRETS_SALT_SUFFIX: &str = "|secrets";
const SERVER_SALT_SUFFIX: &str = "|server";

type Key = Zeroizing<[u8; KEY_SIZE]>;

pub struct Cryptor {
    master_password: Zeroizing<String>,
    login: String,
    params: KdfParams,
    cached_keys: Mutex<HashMap<Vec<u8>, Key>>,
}

impl std::fmt::Debug for Cryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cryptor")
            .field("login", &self.login)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Cryptor {
    /// Create a cryptor with the default Argon2id parameters.
    pub fn new(master_password: impl Into<String>, login: impl Into<String>) -> Self {
        Self::with_params(master_password, login, KdfParams::default())
    }

    /// Create a cryptor with explicit key derivation parameters.
    pub fn with_params(
        master_password: impl Into<String>,
        login: impl Into<String>,
        params: KdfParams,
    ) -> Self {
        Self {
            master_password: Zeroizing::new(master_password.into()),
            login: login.into(),
            params,
            cached_keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    fn derive(&self, salt: &[u8]) -> Result<Key> {
        derive_key(self.master_password.as_bytes(), salt, &self.params)
    }

    /// Derive a key for a reusable salt, remembering it for later calls.
    fn derive_cached(&self, salt: &[u8]) -> Result<Key> {
        let mut cache = self
            .cached_keys
            .lock()
            .map_err(|_| CryptoError::KdfFailed("Key cache lock poisoned".to_string()))?;

        if let Some(key) = cache.get(salt) {
            return Ok(key.clone());
        }

        let key = self.derive(salt)?;
        cache.insert(salt.to_vec(), key.clone());
        Ok(key)
    }

    fn secrets_salt(&self) -> Vec<u8> {
        format!("{}{}", self.login, SECRETS_SALT_SUFFIX).into_bytes()
    }

    fn server_salt(&self) -> Vec<u8> {
        format!("{}{}", self.login, SERVER_SALT_SUFFIX).into_bytes()
    }

    /// Encrypt data for the local store.
    ///
    /// Output format: `salt(16) || nonce(24) || ciphertext || tag(16)`.
    /// Every call uses a new salt, so the derived key is never reused.
    pub fn encrypt_storage_data(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut salt = [0u8; STORAGE_SALT_SIZE];
        fill_random(&mut salt)?;

        let key = self.derive(&salt)?;
        let sealed = cipher::seal(&key, plaintext)?;

        let mut result = Vec::with_capacity(STORAGE_SALT_SIZE + sealed.len());
        result.extend_from_slice(&salt);
        result.extend_from_slice(&sealed);
        Ok(result)
    }

    /// Decrypt data produced by [`Cryptor::encrypt_storage_data`].
    pub fn decrypt_storage_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < STORAGE_SALT_SIZE {
            return Err(CryptoError::DecryptionFailed(
                "Storage envelope shorter than salt".to_string(),
            ));
        }

        let (salt, sealed) = data.split_at(STORAGE_SALT_SIZE);
        let key = self.derive(salt)?;
        cipher::open(&key, sealed)
    }

    /// Encrypt a payload destined for the server under the secrets key.
    ///
    /// The key depends only on login and master password, so any device
    /// holding both can decrypt the result.
    pub fn encrypt_secret_data(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.derive_cached(&self.secrets_salt())?;
        cipher::seal(&key, plaintext)
    }

    /// Decrypt a payload produced by [`Cryptor::encrypt_secret_data`].
    pub fn decrypt_secret_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.derive_cached(&self.secrets_salt())?;
        cipher::open(&key, data)
    }

    /// Base64 SHA-256 digest used for change detection. Not a secret.
    pub fn calculate_data_hash(&self, data: &[u8]) -> String {
        STANDARD.encode(Sha256::digest(data))
    }

    /// Value presented to the server in place of the master password.
    ///
    /// Derived under its own salt and never cached, so it reveals nothing
    /// about the secrets key.
    pub fn generate_server_password(&self) -> Result<String> {
        let key = self.derive(&self.server_salt())?;
        Ok(STANDARD.encode(key.as_slice()))
    }
}
