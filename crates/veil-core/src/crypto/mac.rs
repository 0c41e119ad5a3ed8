// ============================================
// File: crates/veil-core/src/crypto/mac.rs
// ============================================
//! # HMAC-SHA256 and Constant-Time Comparison
//!
//! Used by the handshake engine for envelope authentication and
//! session-id derivation from the transcript.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::HMAC_SHA256_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Computes HMAC-SHA256 over `message` with `key`.
///
/// The key may be any length, including the all-zero 32-byte PSK used
/// when no pre-shared key is configured.
#[must_use]
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; HMAC_SHA256_SIZE] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Constant-time equality of two byte slices.
///
/// Slices of different lengths compare unequal; the length check itself
/// is not constant-time, which is fine because lengths are public here.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let digest = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        let expected =
            hex::decode("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
                .unwrap();
        assert_eq!(digest.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_hmac_key_sensitivity() {
        let a = hmac_sha256(&[0u8; 32], b"message");
        let mut key = [0u8; 32];
        key[31] = 1;
        let b = hmac_sha256(&key, b"message");
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
