//! `{type, name, secret_data}` envelope encrypted for the server.

use crate::secrets::payload::SecretData;
use crate::secrets::registry::{self, SecretType};
use crate::secrets::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEnvelope {
    pub name: String,
    pub data: SecretData,
}

#[derive(Serialize)]
struct WireOut<'a> {
    #[serde(rename = "type")]
    kind: SecretType,
    name: &'a str,
    secret_data: serde_json::Value,
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    secret_data: serde_json::Value,
}

impl SecretEnvelope {
    pub fn new(name: impl Into<String>, data: SecretData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn secret_type(&self) -> SecretType {
        self.data.secret_type()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let out = WireOut {
            kind: self.data.secret_type(),
            name: &self.name,
            secret_data: self.data.to_value()?,
        };
        Ok(serde_json::to_vec(&out)?)
    }

    /// Reads the type tag first, then hands `secret_data` to the matching
    /// variant parser. Decoded payloads are validated.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let wire: WireIn = serde_json::from_slice(bytes)?;
        let data = registry::parse(&wire.kind, wire.secret_data)?;
        Ok(Self {
            name: wire.name,
            data,
        })
    }
}
