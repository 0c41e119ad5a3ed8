// ============================================
// File: crates/veil-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Defines key types used throughout the VEIL protocol with proper
//! security properties (Zeroize on drop, constant-time comparison).
//!
//! ## Main Functionality
//! - `EphemeralKeyPair`: Per-handshake X25519 key exchange keys
//! - `SharedSecret`: X25519 Diffie-Hellman output
//! - `SymmetricKey`: 32-byte ChaCha20-Poly1305 key
//! - `NonceBase`: 12-byte per-direction nonce base
//! - `SessionKeys`: full directional key set for one session
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  EphemeralKeyPair (per handshake)                          │
//! │  ├─ Generated fresh for each handshake                     │
//! │  ├─ Secret consumed by the single X25519 exchange          │
//! │  └─ Never leaves this module                               │
//! │                                                            │
//! │  SharedSecret (per peer association)                       │
//! │  ├─ Output of the key exchange                             │
//! │  ├─ Retained for session rotation re-derivation            │
//! │  └─ Zeroed on drop                                         │
//! │                                                            │
//! │  SessionKeys (per session id)                              │
//! │  ├─ Derived via HKDF with the session id as salt           │
//! │  ├─ Replaced wholesale on rotation                         │
//! │  └─ Zeroed on drop                                         │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL key types MUST implement Zeroize
//! - Private keys should NEVER be logged or serialized
//! - Use constant-time comparison for key equality
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{CHACHA20_KEY_SIZE, CHACHA20_NONCE_SIZE, X25519_PUBLIC_KEY_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// EphemeralKeyPair (X25519)
// ============================================

/// Ephemeral X25519 key pair for Diffie-Hellman key exchange.
///
/// # Purpose
/// Generated fresh for each handshake to provide forward secrecy.
/// After key exchange, the private key is consumed and cannot be reused.
///
/// # Example
/// ```
/// use veil_core::crypto::EphemeralKeyPair;
///
/// let alice = EphemeralKeyPair::generate();
/// let bob = EphemeralKeyPair::generate();
///
/// let alice_public = alice.public_key_bytes();
/// let bob_public = bob.public_key_bytes();
///
/// let alice_shared = alice.exchange(&bob_public).unwrap();
/// let bob_shared = bob.exchange(&alice_public).unwrap();
///
/// assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
/// ```
pub struct EphemeralKeyPair {
    secret: Option<EphemeralSecret>,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    /// Generates a new random ephemeral key pair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self {
            secret: Some(secret),
            public,
        }
    }

    /// Returns the public key bytes.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Performs key exchange with a peer's public key.
    ///
    /// # Consumes the Secret
    /// The private key is taken out of the pair, ensuring it cannot be
    /// reused (single-use ephemeral keys).
    ///
    /// # Errors
    /// - `KeyExchange`: the secret was already consumed, or the exchange
    ///   produced the all-zero shared output (weak/low-order peer key)
    pub fn exchange(mut self, peer_public: &[u8; X25519_PUBLIC_KEY_SIZE]) -> Result<SharedSecret> {
        let secret = self
            .secret
            .take()
            .ok_or_else(|| CoreError::key_exchange("ephemeral secret already consumed"))?;

        let peer_key = X25519PublicKey::from(*peer_public);
        let shared = secret.diffie_hellman(&peer_key);

        if !shared.was_contributory() {
            return Err(CoreError::key_exchange("all-zero shared secret (weak key)"));
        }

        Ok(SharedSecret(*shared.as_bytes()))
    }

    /// Checks if the private key has been consumed.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.secret.is_none()
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.public.as_bytes();
        f.debug_struct("EphemeralKeyPair")
            .field(
                "public",
                &format_args!(
                    "{:02x}{:02x}{:02x}{:02x}...",
                    bytes[0], bytes[1], bytes[2], bytes[3]
                ),
            )
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

// ============================================
// SharedSecret
// ============================================

/// X25519 shared secret.
///
/// Retained for the lifetime of the peer association so that session
/// rotation can re-derive fresh `SessionKeys` under a new session id.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Creates a shared secret from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw secret bytes.
    ///
    /// # Security Warning
    /// Handle with care; never log or persist.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

// ============================================
// SymmetricKey
// ============================================

/// Symmetric session key for transport encryption.
///
/// # Security
/// - Zeroed on drop
/// - Never logged or serialized
/// - Constant-time comparison
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; CHACHA20_KEY_SIZE]);

impl SymmetricKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CHACHA20_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    ///
    /// # Security Warning
    /// Do not log or store the key material in unprotected storage.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CHACHA20_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SymmetricKey {}

// ============================================
// NonceBase
// ============================================

/// Per-direction 12-byte nonce base.
///
/// The per-packet nonce is this base XOR'd with the packet counter
/// (see [`crate::crypto::aead::make_nonce`]).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NonceBase([u8; CHACHA20_NONCE_SIZE]);

impl NonceBase {
    /// Creates a nonce base from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CHACHA20_NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw nonce base bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CHACHA20_NONCE_SIZE] {
        &self.0
    }
}

impl Default for NonceBase {
    fn default() -> Self {
        Self([0u8; CHACHA20_NONCE_SIZE])
    }
}

impl fmt::Debug for NonceBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NonceBase([REDACTED])")
    }
}

impl PartialEq for NonceBase {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for NonceBase {}

// ============================================
// SessionKeys
// ============================================

/// Full directional key set for one session.
///
/// # Direction Labels
/// Keys are derived under `i2r` (initiator-to-responder) and `r2i`
/// labels. The initiator binds send↔i2r and recv↔r2i; the responder
/// inverts this, so each side's send key equals the peer's recv key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Key for outbound packets.
    pub send_key: SymmetricKey,
    /// Key for inbound packets.
    pub recv_key: SymmetricKey,
    /// Nonce base for outbound packets.
    pub send_nonce_base: NonceBase,
    /// Nonce base for inbound packets.
    pub recv_nonce_base: NonceBase,
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKeys([REDACTED])")
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_key_exchange() {
        let alice = EphemeralKeyPair::generate();
        let bob = EphemeralKeyPair::generate();

        let alice_pub = alice.public_key_bytes();
        let bob_pub = bob.public_key_bytes();

        let alice_shared = alice.exchange(&bob_pub).unwrap();
        let bob_shared = bob.exchange(&alice_pub).unwrap();

        // Both parties should derive the same shared secret
        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_distinct_keypairs() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        assert_ne!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn test_weak_peer_key_rejected() {
        let alice = EphemeralKeyPair::generate();

        // The identity point: scalar multiplication yields all zeros.
        let weak = [0u8; 32];
        let result = alice.exchange(&weak);
        assert!(matches!(result, Err(CoreError::KeyExchange { .. })));
    }

    #[test]
    fn test_symmetric_key_equality() {
        let a = SymmetricKey::from_bytes([0x42; 32]);
        let b = SymmetricKey::from_bytes([0x42; 32]);
        let c = SymmetricKey::from_bytes([0x43; 32]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let key = SymmetricKey::from_bytes([0x42; 32]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("42"));
    }
}
