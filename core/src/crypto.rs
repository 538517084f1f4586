//! Token-at-rest encryption for OAuth access/refresh tokens.
//!
//! Grounded on the original service's Fernet-based scheme: a key derived
//! once via PBKDF2-HMAC-SHA256 from `secret_key`, used to AEAD-encrypt
//! every stored token. Re-expressed with the RustCrypto stack (`aes-gcm`,
//! `pbkdf2`, `sha2`) since the teacher carries no crypto dependency of its
//! own. A fixed signature byte prefixes ciphertext so `is_encrypted` can
//! tell already-encrypted rows from legacy plaintext during migration.

use crate::error::Error;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

const PBKDF2_ITERATIONS: u32 = 100_000;
/// Deterministic across runs so the same `secret_key` always derives the
/// same encryption key; the key itself still depends on `secret_key`.
const SALT: &[u8] = b"drivescout-token-crypto-v1";
const SIGNATURE: u8 = 0xDC;
const NONCE_LEN: usize = 12;

fn derive_key(secret_key: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(secret_key.as_bytes(), SALT, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypts `plaintext`, returning a base64 string prefixed with
/// [`SIGNATURE`] so later reads can distinguish it from plaintext.
pub fn encrypt(secret_key: &str, plaintext: &str) -> Result<String, Error> {
    let key = derive_key(secret_key);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::Internal(anyhow::anyhow!("bad key length: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| Error::Internal(anyhow::anyhow!("encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    out.push(SIGNATURE);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

pub fn decrypt(secret_key: &str, encoded: &str) -> Result<String, Error> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|e| Error::Internal(anyhow::anyhow!("invalid base64: {e}")))?;
    if raw.len() < 1 + NONCE_LEN || raw[0] != SIGNATURE {
        return Err(Error::Internal(anyhow::anyhow!(
            "ciphertext missing expected signature"
        )));
    }
    let nonce = Nonce::from_slice(&raw[1..1 + NONCE_LEN]);
    let ciphertext = &raw[1 + NONCE_LEN..];

    let key = derive_key(secret_key);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::Internal(anyhow::anyhow!("bad key length: {e}")))?;
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| Error::Internal(anyhow::anyhow!("decryption failed: {e}")))?;
    String::from_utf8(plaintext).map_err(|e| Error::Internal(anyhow::anyhow!("not utf-8: {e}")))
}

/// Whether `value` looks like ciphertext produced by [`encrypt`], as
/// opposed to a legacy plaintext token that has not been migrated yet.
pub fn is_encrypted(value: &str) -> bool {
    BASE64
        .decode(value)
        .ok()
        .map(|raw| raw.first() == Some(&SIGNATURE) && raw.len() >= 1 + NONCE_LEN)
        .unwrap_or(false)
}

/// Decrypts `value` if it is ciphertext, otherwise returns it unchanged.
/// Lets read paths tolerate rows written before encryption was enabled.
pub fn decrypt_tolerant(secret_key: &str, value: &str) -> Result<String, Error> {
    if is_encrypted(value) {
        decrypt(secret_key, value)
    } else {
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = "test-secret-key";
        let enc = encrypt(key, "ya29.access-token").unwrap();
        assert_eq!(decrypt(key, &enc).unwrap(), "ya29.access-token");
    }

    #[test]
    fn ciphertext_is_detected_plaintext_is_not() {
        let key = "test-secret-key";
        let enc = encrypt(key, "secret").unwrap();
        assert!(is_encrypted(&enc));
        assert!(!is_encrypted("ya29.plain-legacy-token"));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let enc = encrypt("key-a", "secret").unwrap();
        assert!(decrypt("key-b", &enc).is_err());
    }

    #[test]
    fn decrypt_tolerant_passes_through_plaintext() {
        let value = decrypt_tolerant("any-key", "legacy-plaintext").unwrap();
        assert_eq!(value, "legacy-plaintext");
    }
}
