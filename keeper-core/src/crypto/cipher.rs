//! XChaCha20-Poly1305 authenticated encryption.
//!
//! Uses XChaCha20-Poly1305 with:
//! - 256-bit key
//! - 192-bit (24 byte) random nonce
//! - 128-bit authentication tag
//!
//! The envelope format is `nonce(24) || ciphertext || auth_tag(16)`, so a
//! sealed blob can be opened with nothing but the key.

use crate::crypto::{CryptoError, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (128 bits = 16 bytes).
pub const TAG_SIZE: usize = 16;

/// Fill a buffer from the operating system's entropy source.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::RandomFailed(e.to_string()))
}

/// Encrypt `plaintext` under `key`, returning `nonce || ciphertext || tag`.
///
/// A fresh random nonce is drawn for every call.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    fill_random(&mut nonce_bytes)?;
    let nonce = XNonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a `nonce || ciphertext || tag` envelope produced by [`seal`].
///
/// Fails with [`CryptoError::DecryptionFailed`] if the envelope is too short
/// to hold a nonce and tag, and [`CryptoError::AuthenticationFailed`] if the
/// tag does not verify (wrong key or tampered data).
pub fn open(key: &[u8; KEY_SIZE], envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(
            "Ciphertext too short".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}
