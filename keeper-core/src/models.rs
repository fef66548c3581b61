//! Client-local and wire representations of a secret.

use crate::crypto::{CryptoError, Cryptor};
use crate::secrets::{registry, CodecError, SecretData, SecretEnvelope, SecretType, Validate};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors converting between local and wire secrets
#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("secret {0} is deleted")]
    Tombstone(String),

    #[error("envelope name {found} does not match secret {expected}")]
    NameMismatch { expected: String, found: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Current time at the precision every store can hold.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamp to the integer microseconds used by the SQLite stores.
pub fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// A secret as the server sees it: ciphertext plus cleartext sync metadata.
///
/// `data` is `nonce(24) || ciphertext || tag(16)` under the secrets key and
/// is empty for tombstones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSecret {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub hash: String,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

impl RemoteSecret {
    pub fn is_deleted(&self) -> bool {
        self.deleted.unwrap_or(false)
    }

    /// A deletion marker for `name` stamped at `last_modified`.
    pub fn tombstone(name: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            data: Vec::new(),
            hash: String::new(),
            last_modified,
            deleted: Some(true),
        }
    }
}

/// A secret as held by the client.
///
/// `data` is the plaintext variant JSON. Stores must encrypt it before it
/// touches disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSecret {
    pub name: String,
    pub secret_type: SecretType,
    pub data: Vec<u8>,
    pub hash: String,
    pub last_modified: DateTime<Utc>,
    pub metadata: String,
}

impl LocalSecret {
    /// Validate `data` and build a record stamped with the current time.
    pub fn new(
        cryptor: &Cryptor,
        name: impl Into<String>,
        data: &SecretData,
        metadata: impl Into<String>,
    ) -> Result<Self> {
        data.validate()?;

        let mut secret = Self {
            name: name.into(),
            secret_type: data.secret_type(),
            data: Vec::new(),
            hash: String::new(),
            last_modified: now(),
            metadata: metadata.into(),
        };
        secret.set_data(cryptor, data)?;
        Ok(secret)
    }

    /// Replace the payload and recompute the hash over `json || metadata`.
    pub fn set_data(&mut self, cryptor: &Cryptor, data: &SecretData) -> Result<()> {
        let json = data.to_json()?;

        let mut hashed = json.clone();
        hashed.extend_from_slice(self.metadata.as_bytes());

        self.secret_type = data.secret_type();
        self.hash = cryptor.calculate_data_hash(&hashed);
        self.data = json;
        Ok(())
    }

    pub fn parse_data(&self) -> Result<SecretData> {
        Ok(registry::parse_bytes(self.secret_type.as_str(), &self.data)?)
    }

    /// Wrap in an envelope and encrypt under the secrets key.
    pub fn to_remote(&self, cryptor: &Cryptor) -> Result<RemoteSecret> {
        let envelope = SecretEnvelope::new(self.name.clone(), self.parse_data()?);
        let data = cryptor.encrypt_secret_data(&envelope.serialize()?)?;

        Ok(RemoteSecret {
            name: self.name.clone(),
            data,
            hash: self.hash.clone(),
            last_modified: self.last_modified,
            deleted: None,
        })
    }

    /// Decrypt a live wire secret. The wire hash and timestamp are kept as
    /// received; metadata does not travel and comes back empty.
    pub fn from_remote(remote: &RemoteSecret, cryptor: &Cryptor) -> Result<Self> {
        if remote.is_deleted() {
            return Err(ModelError::Tombstone(remote.name.clone()));
        }

        let plaintext = cryptor.decrypt_secret_data(&remote.data)?;
        let envelope = SecretEnvelope::deserialize(&plaintext)?;
        if envelope.name != remote.name {
            return Err(ModelError::NameMismatch {
                expected: remote.name.clone(),
                found: envelope.name,
            });
        }

        Ok(Self {
            name: remote.name.clone(),
            secret_type: envelope.secret_type(),
            data: envelope.data.to_json()?,
            hash: remote.hash.clone(),
            last_modified: remote.last_modified,
            metadata: String::new(),
        })
    }
}

/// Base64 serialization for `Vec<u8>`.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
