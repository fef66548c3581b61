//! Client-side persistence of secrets, keyed by name.

pub mod sqlite;

pub use sqlite::SqliteSecretStore;

use crate::crypto::CryptoError;
use crate::models::LocalSecret;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored secret could not be decrypted: {0}")]
    Crypto(#[from] CryptoError),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store lock poisoned")]
    Lock,

    #[error("store task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Local store contract.
///
/// Implementations must never write `LocalSecret::data` to disk in
/// plaintext. Records are returned exactly as stored, timestamps included.
#[async_trait]
pub trait LocalSecretStore: Send + Sync {
    /// Insert a new secret; fails with `AlreadyExists` on a duplicate name.
    async fn create(&self, secret: &LocalSecret) -> Result<()>;

    async fn get(&self, name: &str) -> Result<LocalSecret>;

    async fn get_all(&self) -> Result<Vec<LocalSecret>>;

    /// Overwrite an existing secret; fails with `NotFound` if absent.
    async fn update(&self, secret: &LocalSecret) -> Result<()>;

    /// Remove a secret; fails with `NotFound` if absent.
    async fn delete(&self, name: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
