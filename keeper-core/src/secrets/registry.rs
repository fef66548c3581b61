//! Type tag registry for secret payload variants.

use crate::secrets::payload::{CardData, FileData, LoginData, SecretData, TextData, Validate};
use crate::secrets::{CodecError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type discriminator carried next to every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretType {
    Password,
    Text,
    Binary,
    Card,
}

impl SecretType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretType::Password => "password",
            SecretType::Text => "text",
            SecretType::Binary => "binary",
            SecretType::Card => "card",
        }
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        lookup(s).map(|entry| entry.secret_type)
    }
}

type ParseFn = fn(serde_json::Value) -> Result<SecretData>;

struct Entry {
    tag: &'static str,
    secret_type: SecretType,
    parse: ParseFn,
}

fn parse_as<T>(value: serde_json::Value, wrap: fn(T) -> SecretData) -> Result<SecretData>
where
    T: DeserializeOwned,
{
    Ok(wrap(serde_json::from_value(value)?))
}

static REGISTRY: &[Entry] = &[
    Entry {
        tag: "password",
        secret_type: SecretType::Password,
        parse: |v| parse_as::<LoginData>(v, SecretData::Login),
    },
    Entry {
        tag: "text",
        secret_type: SecretType::Text,
        parse: |v| parse_as::<TextData>(v, SecretData::Text),
    },
    Entry {
        tag: "binary",
        secret_type: SecretType::Binary,
        parse: |v| parse_as::<FileData>(v, SecretData::File),
    },
    Entry {
        tag: "card",
        secret_type: SecretType::Card,
        parse: |v| parse_as::<CardData>(v, SecretData::Card),
    },
];

fn lookup(tag: &str) -> Result<&'static Entry> {
    REGISTRY
        .iter()
        .find(|entry| entry.tag == tag)
        .ok_or_else(|| CodecError::UnknownType(tag.to_string()))
}

/// Decode and validate the variant object registered under `tag`.
pub fn parse(tag: &str, value: serde_json::Value) -> Result<SecretData> {
    let data = (lookup(tag)?.parse)(value)?;
    data.validate()?;
    Ok(data)
}

/// Like [`parse`], from raw JSON bytes.
pub fn parse_bytes(tag: &str, bytes: &[u8]) -> Result<SecretData> {
    let entry = lookup(tag)?;
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let data = (entry.parse)(value)?;
    data.validate()?;
    Ok(data)
}

/// All registered type tags, in registration order.
pub fn tags() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|entry| entry.tag)
}
