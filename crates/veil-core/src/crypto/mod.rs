// ============================================
// File: crates/veil-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes all cryptographic operations for the VEIL transport,
//! using audited RustCrypto and dalek implementations.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: Key types and X25519 key exchange
//! - [`kdf`]: HKDF-SHA256 and directional session-key derivation
//! - [`mac`]: HMAC-SHA256 and constant-time comparison
//! - [`aead`]: ChaCha20-Poly1305 seal/open and nonce construction
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Handshake Phase                          │
//! │  Initiator                                    Responder     │
//! │    │  X25519 Ephemeral Public ──────────────────► │         │
//! │    │ ◄────────────────── X25519 Ephemeral Public  │         │
//! │    │     (every envelope HMAC'd with the PSK)     │         │
//! │    │                                              │         │
//! │    │        X25519 Key Exchange                   │         │
//! │    │              │                               │         │
//! │    │              ▼                               │         │
//! │    │   HKDF-SHA256(salt=session_id)               │         │
//! │    │     ──► send/recv keys + nonce bases         │         │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Transport Phase                          │
//! │                                                             │
//! │  nonce = base XOR counter ─► ChaCha20-Poly1305 ─► packet    │
//! │  AAD   = session id ∥ counter (16-byte header)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//! - **Forward Secrecy**: fresh ephemeral keys per handshake
//! - **Confidentiality**: ChaCha20 stream cipher
//! - **Integrity**: Poly1305 authentication tag over payload + header
//! - **Nonce Uniqueness**: strictly increasing counters XOR'd into the
//!   nonce base; counters reset only when rotation replaces the keys
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL implementations use RustCrypto/dalek (audited)
//! - NEVER roll your own crypto
//! - ALL sensitive key material implements Zeroize
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

use rand::RngCore;

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod mac;

// Re-export primary types at module level
pub use aead::make_nonce;
pub use kdf::derive_session_keys;
pub use keys::{EphemeralKeyPair, NonceBase, SessionKeys, SharedSecret, SymmetricKey};
pub use mac::{constant_time_eq, hmac_sha256};

// ============================================
// Constants
// ============================================

/// Size of an X25519 public key in bytes.
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of an X25519 shared secret in bytes.
pub const X25519_SHARED_SECRET_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 key in bytes.
pub const CHACHA20_KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 nonce in bytes.
pub const CHACHA20_NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag in bytes.
pub const POLY1305_TAG_SIZE: usize = 16;

/// Size of an HMAC-SHA256 digest in bytes.
pub const HMAC_SHA256_SIZE: usize = 32;

/// Size of the derived session identifier in bytes.
pub const SESSION_ID_SIZE: usize = 32;

// ============================================
// CSPRNG
// ============================================

/// Fills `output` with cryptographically secure random bytes.
///
/// Backed by the operating system's random number generator.
pub fn random_bytes(output: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(output);
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_nonzero() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        random_bytes(&mut a);
        random_bytes(&mut b);

        // Two 256-bit draws colliding (or coming back zero) means the
        // RNG is broken, not that we got unlucky.
        assert_ne!(a, [0u8; 32]);
        assert_ne!(a, b);
    }
}
