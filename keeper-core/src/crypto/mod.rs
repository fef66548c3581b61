//! Cryptographic primitives for the secret manager.
//!
//! This module provides:
//! - Argon2id key derivation from the master password
//! - XChaCha20-Poly1305 envelopes for local storage and server-bound payloads
//! - The per-login [`Cryptor`] that ties keys to their data domains

pub mod cipher;
pub mod cryptor;
pub mod kdf;

pub use cipher::{open, seal, KEY_SIZE, NONCE_SIZE};
pub use cryptor::{Cryptor, STORAGE_SALT_SIZE};
pub use kdf::{derive_key, KdfParams};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Random number generation failed: {0}")]
    RandomFailed(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
