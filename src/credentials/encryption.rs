//! AES-256-GCM encryption for stored OAuth tokens.
//!
//! Each value is sealed with its own random nonce. The nonce is prepended to the
//! ciphertext and the pair is base64-encoded, so a sealed token is a single
//! opaque string that fits in one database column.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// GCM authentication tag length
const TAG_SIZE: usize = 16;

/// Validates that the master key is exactly 32 bytes when base64 decoded.
///
/// # Arguments
/// * `key_base64` - Base64-encoded master key
///
/// # Returns
/// * `Ok(Vec<u8>)` - Decoded key bytes (32 bytes)
/// * `Err` - If key is invalid length or invalid base64
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Generates a fresh random master key, base64-encoded.
pub fn generate_key() -> String {
    let key = Aes256Gcm::generate_key(OsRng);
    BASE64.encode(key)
}

/// Encrypts plaintext using AES-256-GCM with a random nonce.
///
/// Returns `base64(nonce || ciphertext || tag)`.
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<String> {
    let cipher = cipher_for(key)?;

    // Fresh nonce per call, never reused under the same key
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(sealed))
}

/// Decrypts a value produced by [`encrypt`].
///
/// Fails on a wrong key, truncated or tampered data, or invalid base64. Never
/// returns partially decrypted output.
pub fn decrypt(sealed: &str, key: &[u8]) -> Result<String> {
    let cipher = cipher_for(key)?;

    let bytes = BASE64
        .decode(sealed)
        .context("Failed to decode ciphertext")?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(anyhow!(
            "Ciphertext too short: expected at least {} bytes, got {}",
            NONCE_SIZE + TAG_SIZE,
            bytes.len()
        ));
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        let valid_key = BASE64.encode([0u8; 32]);
        assert!(validate_key(&valid_key).is_ok());

        // Too short
        let short_key = BASE64.encode([0u8; 16]);
        assert!(validate_key(&short_key).is_err());

        // Too long
        let long_key = BASE64.encode([0u8; 64]);
        assert!(validate_key(&long_key).is_err());

        // Invalid base64
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_generated_key_is_valid() {
        let key = generate_key();
        let bytes = validate_key(&key).unwrap();
        assert_eq!(bytes.len(), KEY_SIZE);
        assert_ne!(generate_key(), key);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [7u8; 32];

        for plaintext in ["AT", "my-secret-access-token-12345", "", "ünïcødé ✓"] {
            let sealed = encrypt(plaintext, &key).unwrap();
            assert_ne!(sealed, plaintext);
            assert_eq!(decrypt(&sealed, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_same_plaintext_encrypts_differently() {
        let key = [0u8; 32];

        let first = encrypt("same-plaintext", &key).unwrap();
        let second = encrypt("same-plaintext", &key).unwrap();

        assert_ne!(first, second);
        assert_eq!(decrypt(&first, &key).unwrap(), "same-plaintext");
        assert_eq!(decrypt(&second, &key).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt("secret", &[0u8; 32]).unwrap();
        assert!(decrypt(&sealed, &[1u8; 32]).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [0u8; 32];
        let sealed = encrypt("secret", &key).unwrap();

        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        assert!(decrypt(&BASE64.encode(&bytes), &key).is_err());
    }

    #[test]
    fn test_truncated_and_garbage_input_fails() {
        let key = [0u8; 32];
        let sealed = encrypt("secret", &key).unwrap();

        assert!(decrypt(&sealed[..8], &key).is_err());
        assert!(decrypt("not-a-valid-encrypted-string", &key).is_err());
        assert!(decrypt("", &key).is_err());
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(encrypt("secret", &[0u8; 16]).is_err());
        assert!(decrypt("AAAA", &[0u8; 31]).is_err());
    }
}
