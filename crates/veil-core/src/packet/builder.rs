// ============================================
// File: crates/veil-core/src/packet/builder.rs
// ============================================
//! # Packet Builder
//!
//! ## Creation Reason
//! Packs one or more frames into a plaintext buffer sized to the MTU,
//! then seals the buffer under the current session keys with the
//! 16-byte packet header as associated data.
//!
//! ## Main Logical Flow
//! 1. `set_session_id` / `set_keys` configure the cryptographic context
//! 2. `add_frame` appends frames while capacity remains
//! 3. `build(counter)` emits the sealed datagram and the caller resets
//!
//! ## ⚠️ Important Note for Next Developer
//! - The builder never chooses counters; the session owns the strictly
//!   increasing send counter and passes it to `build`
//! - `remaining_capacity` accounts for header and tag overhead, so a
//!   frame that fits is guaranteed to produce a datagram within MTU
//!
//! ## Last Modified
//! v0.1.0 - Initial packet builder

use bytes::{BufMut, BytesMut};

use crate::crypto::{aead, NonceBase, SymmetricKey, POLY1305_TAG_SIZE};
use crate::error::{CoreError, Result};

use super::frame::Frame;
use super::PACKET_HEADER_SIZE;

// ============================================
// PacketBuilder
// ============================================

/// Assembles frames and seals them into wire packets.
pub struct PacketBuilder {
    mtu: usize,
    session_id: u64,
    key: Option<SymmetricKey>,
    nonce_base: NonceBase,
    payload: BytesMut,
}

impl PacketBuilder {
    /// Creates a builder for the given MTU.
    #[must_use]
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            session_id: 0,
            key: None,
            nonce_base: NonceBase::default(),
            payload: BytesMut::with_capacity(mtu.saturating_sub(PACKET_HEADER_SIZE + POLY1305_TAG_SIZE)),
        }
    }

    /// Sets the session id written into (and authenticated by) the header.
    pub fn set_session_id(&mut self, session_id: u64) {
        self.session_id = session_id;
    }

    /// Installs the outbound encryption key and nonce base.
    pub fn set_keys(&mut self, key: SymmetricKey, nonce_base: NonceBase) {
        self.key = Some(key);
        self.nonce_base = nonce_base;
    }

    /// Returns how many more payload bytes fit within the MTU.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        let overhead = PACKET_HEADER_SIZE + POLY1305_TAG_SIZE;
        self.mtu
            .saturating_sub(overhead)
            .saturating_sub(self.payload.len())
    }

    /// Appends a frame to the pending payload.
    ///
    /// # Returns
    /// `Ok(true)` if the frame was added, `Ok(false)` if it does not fit
    /// within the remaining MTU capacity.
    ///
    /// # Errors
    /// Returns `InvalidFrame` for a frame whose body exceeds the 16-bit
    /// length field.
    pub fn add_frame(&mut self, frame: &Frame) -> Result<bool> {
        if frame.encoded_len() > self.remaining_capacity() {
            return Ok(false);
        }
        frame.encode(&mut self.payload)?;
        Ok(true)
    }

    /// Returns `true` if no frames have been added since the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Seals the pending frames into a wire packet.
    ///
    /// # Arguments
    /// * `counter` - The packet counter; must be unique per session
    ///
    /// # Errors
    /// - `Encryption`: no key installed, no frames added, or cipher failure
    pub fn build(&mut self, counter: u64) -> Result<Vec<u8>> {
        if self.payload.is_empty() {
            return Err(CoreError::encryption("no frames to build"));
        }
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| CoreError::encryption("encryption key not set"))?;

        let mut packet = BytesMut::with_capacity(
            PACKET_HEADER_SIZE + self.payload.len() + POLY1305_TAG_SIZE,
        );
        packet.put_u64(self.session_id);
        packet.put_u64(counter);

        let nonce = aead::make_nonce(&self.nonce_base, counter);
        let aad = packet[..PACKET_HEADER_SIZE].to_vec();
        let sealed = aead::seal(key, &nonce, &self.payload, &aad)?;
        packet.put_slice(&sealed);

        self.payload.clear();
        Ok(packet.to_vec())
    }

    /// Discards any pending frames.
    pub fn reset(&mut self) {
        self.payload.clear();
    }
}

impl std::fmt::Debug for PacketBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuilder")
            .field("mtu", &self.mtu)
            .field("session_id", &format_args!("{:016x}", self.session_id))
            .field("pending_bytes", &self.payload.len())
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
