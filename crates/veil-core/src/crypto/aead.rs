// ============================================
// File: crates/veil-core/src/crypto/aead.rs
// ============================================
//! # Transport Encryption
//!
//! ## Creation Reason
//! Provides authenticated encryption for packets using the
//! ChaCha20-Poly1305 AEAD cipher, with the packet header bound as
//! associated data.
//!
//! ## Main Functionality
//! - `seal` / `open`: attached-tag AEAD operations
//! - `make_nonce`: nonce construction from base and counter
//!
//! ## Nonce Construction
//! ```text
//! nonce (12 bytes) = base, with counter (8 bytes, little-endian)
//!                    XOR'd into the last 8 positions
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Counter MUST be unique per packet per session key
//! - Never reuse a (key, nonce) pair - catastrophic security failure
//! - Counters reset only across session rotation, which replaces keys
//!
//! ## Last Modified
//! v0.1.0 - Initial transport crypto implementation

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};

use super::keys::{NonceBase, SymmetricKey};
use super::{CHACHA20_NONCE_SIZE, POLY1305_TAG_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// Nonce Construction
// ============================================

/// Constructs a per-packet nonce from a base and a packet counter.
///
/// The counter is XOR'd, little-endian, into the last 8 bytes of the
/// 12-byte base. Strictly increasing counters therefore never repeat a
/// nonce under a given key.
#[must_use]
pub fn make_nonce(base: &NonceBase, counter: u64) -> [u8; CHACHA20_NONCE_SIZE] {
    let mut nonce = *base.as_bytes();
    let counter_bytes = counter.to_le_bytes();
    for (i, byte) in counter_bytes.iter().enumerate() {
        nonce[CHACHA20_NONCE_SIZE - 8 + i] ^= byte;
    }
    nonce
}

// ============================================
// Seal / Open
// ============================================

/// Encrypts `plaintext` and appends the 16-byte Poly1305 tag.
///
/// # Arguments
/// * `key` - 32-byte session key
/// * `nonce` - 12-byte nonce (see [`make_nonce`])
/// * `plaintext` - Data to encrypt
/// * `aad` - Associated data (the 16-byte packet header)
///
/// # Errors
/// - `Encryption`: cipher-internal failure (should not happen with
///   valid inputs)
pub fn seal(
    key: &SymmetricKey,
    nonce: &[u8; CHACHA20_NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CoreError::encryption("failed to create cipher"))?;

    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CoreError::encryption("ChaCha20-Poly1305 encryption failed"))
}

/// Decrypts `ciphertext` (which includes the trailing tag).
///
/// # Errors
/// - `Decryption`: authentication failed (wrong key, wrong nonce,
///   wrong AAD, or tampered ciphertext)
pub fn open(
    key: &SymmetricKey,
    nonce: &[u8; CHACHA20_NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < POLY1305_TAG_SIZE {
        return Err(CoreError::Decryption);
    }

    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CoreError::Decryption)?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CoreError::Decryption)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SymmetricKey {
        SymmetricKey::from_bytes([0x42u8; 32])
    }

    fn test_nonce() -> [u8; CHACHA20_NONCE_SIZE] {
        make_nonce(&NonceBase::from_bytes([0x11u8; 12]), 7)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let nonce = test_nonce();
        let aad = [0x01u8; 16];
        let plaintext = b"Hello, VEIL!";

        let ciphertext = seal(&key, &nonce, plaintext, &aad).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + POLY1305_TAG_SIZE);

        let decrypted = open(&key, &nonce, &ciphertext, &aad).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let nonce = test_nonce();
        let aad = [0x01u8; 16];

        let ciphertext = seal(&test_key(), &nonce, b"secret", &aad).unwrap();
        let wrong = SymmetricKey::from_bytes([0x43u8; 32]);

        let result = open(&wrong, &nonce, &ciphertext, &aad);
        assert!(matches!(result, Err(CoreError::Decryption)));
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let key = test_key();
        let aad = [0x01u8; 16];
        let base = NonceBase::from_bytes([0x11u8; 12]);

        let ciphertext = seal(&key, &make_nonce(&base, 7), b"secret", &aad).unwrap();

        let result = open(&key, &make_nonce(&base, 8), &ciphertext, &aad);
        assert!(matches!(result, Err(CoreError::Decryption)));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key();
        let nonce = test_nonce();

        let ciphertext = seal(&key, &nonce, b"secret", &[0x01u8; 16]).unwrap();

        let result = open(&key, &nonce, &ciphertext, &[0x02u8; 16]);
        assert!(matches!(result, Err(CoreError::Decryption)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let nonce = test_nonce();
        let aad = [0x01u8; 16];

        let mut ciphertext = seal(&key, &nonce, b"secret", &aad).unwrap();
        ciphertext[0] ^= 0xFF;

        let result = open(&key, &nonce, &ciphertext, &aad);
        assert!(matches!(result, Err(CoreError::Decryption)));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = test_key();
        let nonce = test_nonce();

        let result = open(&key, &nonce, &[0u8; 8], &[]);
        assert!(matches!(result, Err(CoreError::Decryption)));
    }

    #[test]
    fn test_make_nonce_xor_layout() {
        let base = NonceBase::from_bytes([0u8; 12]);
        let nonce = make_nonce(&base, 0x0102_0304_0506_0708);

        // First 4 bytes untouched, counter little-endian in the tail
        assert_eq!(&nonce[..4], &[0, 0, 0, 0]);
        assert_eq!(&nonce[4..], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_make_nonce_distinct_counters() {
        let base = NonceBase::from_bytes([0xAAu8; 12]);
        let mut seen = std::collections::HashSet::new();
        for counter in 0..256u64 {
            assert!(seen.insert(make_nonce(&base, counter)));
        }
    }
}
