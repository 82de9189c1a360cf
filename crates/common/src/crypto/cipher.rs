//! Secret cipher: AES-256-GCM envelopes under a master key.
//!
//! Envelope layout: `v1.` followed by base64url (no padding) of
//! `nonce(12) || ciphertext || tag(16)`. Everything needed to decrypt
//! except the key travels inside the envelope.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use std::fmt;

use crate::errors::{AppError, Result};

const ENVELOPE_VERSION: &str = "v1.";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// 256-bit master key. Passed explicitly into every cipher call.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a configured key, accepted as standard base64 or hex.
    pub fn parse(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let bytes = STANDARD
            .decode(encoded)
            .ok()
            .filter(|b| b.len() == 32)
            .or_else(|| hex::decode(encoded).ok().filter(|b| b.len() == 32))
            .ok_or_else(|| AppError::Configuration {
                message: "master key must be 32 bytes, base64 or hex encoded".to_string(),
            })?;

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Encrypt `plaintext` into a self-describing envelope.
///
/// A fresh random nonce is drawn per call, so encrypting the same
/// plaintext twice never yields the same envelope.
pub fn encrypt(plaintext: &str, key: &MasterKey) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher()
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| AppError::Crypto {
            message: format!("AES-GCM encrypt: {e}"),
        })?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(format!("{ENVELOPE_VERSION}{}", URL_SAFE_NO_PAD.encode(combined)))
}

/// Decrypt an envelope produced by [`encrypt`].
///
/// Any malformed, tampered or foreign-key envelope yields
/// `AppError::DecryptionFailed`; no partial plaintext is ever returned.
pub fn decrypt(envelope: &str, key: &MasterKey) -> Result<String> {
    let body = envelope
        .strip_prefix(ENVELOPE_VERSION)
        .ok_or(AppError::DecryptionFailed)?;

    let combined = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| AppError::DecryptionFailed)?;

    if combined.len() < NONCE_LEN + TAG_LEN {
        return Err(AppError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| AppError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| AppError::DecryptionFailed)
}
