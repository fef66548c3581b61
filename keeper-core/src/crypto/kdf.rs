//! Argon2id key derivation for master password processing.
//!
//! Default parameters:
//! - Memory cost: 64 MiB (65,536 KiB)
//! - Time cost: 3 iterations
//! - Parallelism: 4 lanes
//! - Output length: 32 bytes (256 bits)

use crate::crypto::{CryptoError, Result, KEY_SIZE};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Cost parameters for Argon2id key derivation.
///
/// The salt is not part of the parameters: it is supplied per derivation,
/// either random (storage keys) or fixed per login (secrets and server keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub mem_cost: u32,

    /// Time cost (number of iterations)
    pub time_cost: u32,

    /// Parallelism (number of lanes)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost: 64 * 1024,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Create the default interactive parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify that parameters are within the ranges Argon2 accepts
    pub fn validate(&self) -> Result<()> {
        if self.parallelism < 1 {
            return Err(CryptoError::KdfFailed(
                "Parallelism too low (minimum: 1)".to_string(),
            ));
        }
        if self.time_cost < 1 {
            return Err(CryptoError::KdfFailed(
                "Time cost too low (minimum: 1)".to_string(),
            ));
        }
        if self.mem_cost < 8 * self.parallelism {
            return Err(CryptoError::KdfFailed(format!(
                "Memory cost too low (minimum: {} KiB for {} lanes)",
                8 * self.parallelism,
                self.parallelism
            )));
        }
        Ok(())
    }
}

/// Derive a 32-byte key from a password and salt using Argon2id.
///
/// The same password, salt and parameters always produce the same key.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    params.validate()?;

    let params_obj = Params::new(
        params.mem_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KdfFailed(format!("Invalid parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params_obj);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password, salt, key.as_mut())
        .map_err(|e| CryptoError::KdfFailed(format!("Hashing failed: {}", e)))?;

    Ok(key)
}
