//! Typed secret payloads and the envelope they travel in.
//!
//! A payload is one of four variants, each validated on construction and on
//! decode. Variants are looked up by their type tag through a static
//! registry, so adding a variant touches only the registry table.

pub mod envelope;
pub mod payload;
pub mod registry;

pub use envelope::SecretEnvelope;
pub use payload::{CardData, FileData, LoginData, SecretData, TextData, Validate};
pub use registry::SecretType;

use thiserror::Error;

pub const MAX_FILE_SIZE: i64 = 2 * 1024 * 1024;
pub const MAX_TEXT_SIZE: usize = 1024 * 1024;
pub const MAX_CARD_HOLDER_LENGTH: usize = 100;
pub const MAX_USERNAME_LENGTH: usize = 255;
pub const MAX_PASSWORD_LENGTH: usize = 1024;
pub const MAX_URL_LENGTH: usize = 2048;

/// Errors raised while encoding, decoding or validating payloads
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unknown secret type: {0}")]
    UnknownType(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
