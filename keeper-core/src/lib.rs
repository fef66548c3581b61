//! Keeper core library
//!
//! Client-side building blocks of a zero-knowledge secret manager:
//! key derivation and envelope encryption, typed secret payloads, the
//! last-write-wins sync rules, a local encrypted store, and the relay client.

pub mod client;
pub mod config;
pub mod crypto;
pub mod models;
pub mod secrets;
pub mod store;
pub mod sync;
pub mod wire;

pub use client::{ApiClient, ApiError, KeeperClient};
pub use config::ClientConfig;
pub use crypto::{CryptoError, Cryptor, KdfParams};
pub use models::{LocalSecret, ModelError, RemoteSecret};
pub use secrets::{CodecError, SecretData, SecretEnvelope, SecretType};
pub use store::{LocalSecretStore, SqliteSecretStore, StoreError};

use thiserror::Error;

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Payload error: {0}")]
    Codec(#[from] CodecError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Relay error: {0}")]
    Api(#[from] ApiError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KeeperError {
    /// True for "absent" errors from either the local store or the relay.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KeeperError::Store(StoreError::NotFound(_)) | KeeperError::Api(ApiError::NotFound(_))
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            KeeperError::Store(StoreError::AlreadyExists(_))
                | KeeperError::Api(ApiError::AlreadyExists(_))
        )
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, KeeperError>;
