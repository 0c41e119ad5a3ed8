// ============================================
// File: crates/veil-core/src/crypto/kdf.rs
// ============================================
//! # Key Derivation Functions
//!
//! ## Creation Reason
//! Derives the directional session key set from the X25519 shared
//! secret, with the session id as HKDF salt for domain separation
//! across rotations.
//!
//! ## Main Functionality
//! - `derive_session_keys`: shared secret → `SessionKeys`
//! - `hkdf_expand`: general HKDF-SHA256 extract-then-expand
//!
//! ## Derivation Scheme
//! ```text
//! PRK = HKDF-Extract(salt = session_id (32 bytes), IKM = shared_secret)
//!
//! send/recv keys:
//!   i2r key    = HKDF-Expand(PRK, "veil_v1_key_i2r",   32)
//!   r2i key    = HKDF-Expand(PRK, "veil_v1_key_r2i",   32)
//! nonce bases:
//!   i2r base   = HKDF-Expand(PRK, "veil_v1_nonce_i2r", 12)
//!   r2i base   = HKDF-Expand(PRK, "veil_v1_nonce_r2i", 12)
//! ```
//! The initiator binds send↔i2r and recv↔r2i; the responder inverts,
//! so the two sides' key sets are cross-equal.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Changing any label or the salt breaks interoperability
//! - Rotation re-invokes this with a fresh session id, never reusing
//!   a (key, nonce) pair across the counter reset
//!
//! ## Last Modified
//! v0.1.0 - Initial KDF implementation

use hkdf::Hkdf;
use sha2::Sha256;

use super::keys::{NonceBase, SessionKeys, SharedSecret, SymmetricKey};
use super::{CHACHA20_KEY_SIZE, CHACHA20_NONCE_SIZE, SESSION_ID_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// Derivation Labels
// ============================================

const INFO_KEY_I2R: &[u8] = b"veil_v1_key_i2r";
const INFO_KEY_R2I: &[u8] = b"veil_v1_key_r2i";
const INFO_NONCE_I2R: &[u8] = b"veil_v1_nonce_i2r";
const INFO_NONCE_R2I: &[u8] = b"veil_v1_nonce_r2i";

// ============================================
// HKDF-SHA256
// ============================================

/// HKDF-SHA256 extract-then-expand.
///
/// # Arguments
/// * `ikm` - Input keying material
/// * `salt` - Domain separation salt
/// * `info` - Context-specific info string
/// * `output_len` - Desired output length (at most 255 * 32 bytes)
///
/// # Errors
/// Returns `KeyDerivation` if `output_len` exceeds the HKDF-SHA256
/// maximum of 255 * 32 bytes.
pub fn hkdf_expand(ikm: &[u8], salt: &[u8], info: &[u8], output_len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut output = vec![0u8; output_len];
    hk.expand(info, &mut output).map_err(|_| {
        CoreError::key_derivation(format!("HKDF expansion failed for {output_len} bytes"))
    })?;

    Ok(output)
}

// ============================================
// Session Key Derivation
// ============================================

/// Derives the full directional key set for a session.
///
/// # Arguments
/// * `shared_secret` - X25519 Diffie-Hellman output
/// * `session_id` - 32-byte session identifier (HKDF salt)
/// * `is_initiator` - Role from the handshake state machine
///
/// # Errors
/// Returns `KeyDerivation` if HKDF expansion fails.
pub fn derive_session_keys(
    shared_secret: &SharedSecret,
    session_id: &[u8; SESSION_ID_SIZE],
    is_initiator: bool,
) -> Result<SessionKeys> {
    let hk = Hkdf::<Sha256>::new(Some(session_id.as_slice()), shared_secret.as_bytes());

    let mut key_i2r = [0u8; CHACHA20_KEY_SIZE];
    let mut key_r2i = [0u8; CHACHA20_KEY_SIZE];
    let mut nonce_i2r = [0u8; CHACHA20_NONCE_SIZE];
    let mut nonce_r2i = [0u8; CHACHA20_NONCE_SIZE];

    hk.expand(INFO_KEY_I2R, &mut key_i2r)
        .and_then(|()| hk.expand(INFO_KEY_R2I, &mut key_r2i))
        .and_then(|()| hk.expand(INFO_NONCE_I2R, &mut nonce_i2r))
        .and_then(|()| hk.expand(INFO_NONCE_R2I, &mut nonce_r2i))
        .map_err(|_| CoreError::key_derivation("HKDF expansion failed"))?;

    let (send_key, recv_key, send_nonce_base, recv_nonce_base) = if is_initiator {
        (key_i2r, key_r2i, nonce_i2r, nonce_r2i)
    } else {
        (key_r2i, key_i2r, nonce_r2i, nonce_i2r)
    };

    Ok(SessionKeys {
        send_key: SymmetricKey::from_bytes(send_key),
        recv_key: SymmetricKey::from_bytes(recv_key),
        send_nonce_base: NonceBase::from_bytes(send_nonce_base),
        recv_nonce_base: NonceBase::from_bytes(recv_nonce_base),
    })
}

// ============================================
// Tests
// ============================================
