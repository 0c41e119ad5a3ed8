// ============================================
// File: crates/veil-core/src/packet/parser.rs
// ============================================
//! # Packet Parser
//!
//! ## Creation Reason
//! Consumes wire datagrams: validates the minimum size, parses the
//! header, authenticates and decrypts the payload with the header as
//! associated data, and parses the contained frame stream.
//!
//! ## Parsing Strategy
//! 1. Reject anything below the 32-byte minimum (`PacketTooShort`)
//! 2. Read session id and counter (callers check them before decrypting)
//! 3. Decrypt with the nonce derived from the counter (`Decryption`)
//! 4. Parse frames until the plaintext is exhausted (`InvalidFrame`)
//!
//! ## ⚠️ Important Note for Next Developer
//! - `parse_header` is deliberately separate so the session can run
//!   replay and session-id checks before paying for a decryption
//!
//! ## Last Modified
//! v0.1.0 - Initial packet parser

use bytes::Buf;

use crate::crypto::{aead, NonceBase, SymmetricKey};
use crate::error::{CoreError, Result};

use super::frame::{parse_frames, Frame};
use super::{MIN_PACKET_SIZE, PACKET_HEADER_SIZE};

// ============================================
// PacketHeader
// ============================================

/// The authenticated-but-cleartext packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Session identifier (64-bit wire form).
    pub session_id: u64,
    /// Strictly increasing packet counter.
    pub counter: u64,
}

// ============================================
// ParsedPacket
// ============================================

/// A fully decrypted and parsed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    /// Session identifier from the header.
    pub session_id: u64,
    /// Packet counter from the header.
    pub counter: u64,
    /// The decoded frame stream.
    pub frames: Vec<Frame>,
}

// ============================================
// PacketParser
// ============================================

/// Parses and decrypts wire packets.
#[derive(Default)]
pub struct PacketParser {
    key: Option<SymmetricKey>,
    nonce_base: NonceBase,
}

impl PacketParser {
    /// Creates a parser with no keys installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the inbound decryption key and nonce base.
    pub fn set_keys(&mut self, key: SymmetricKey, nonce_base: NonceBase) {
        self.key = Some(key);
        self.nonce_base = nonce_base;
    }

    /// Parses just the cleartext header of a datagram.
    ///
    /// # Errors
    /// - `PacketTooShort`: below the 32-byte minimum
    pub fn parse_header(data: &[u8]) -> Result<PacketHeader> {
        if data.len() < MIN_PACKET_SIZE {
            return Err(CoreError::too_short(MIN_PACKET_SIZE, data.len()));
        }

        let mut buf = &data[..PACKET_HEADER_SIZE];
        Ok(PacketHeader {
            session_id: buf.get_u64(),
            counter: buf.get_u64(),
        })
    }

    /// Decrypts and parses a full datagram.
    ///
    /// # Errors
    /// - `PacketTooShort`: below the 32-byte minimum
    /// - `Decryption`: no key installed or authentication failure
    /// - `InvalidFrame` / `UnknownFrameType`: malformed frame stream
    pub fn parse(&self, data: &[u8]) -> Result<ParsedPacket> {
        let header = Self::parse_header(data)?;

        let key = self.key.as_ref().ok_or(CoreError::Decryption)?;

        let nonce = aead::make_nonce(&self.nonce_base, header.counter);
        let aad = &data[..PACKET_HEADER_SIZE];
        let ciphertext = &data[PACKET_HEADER_SIZE..];

        let plaintext = aead::open(key, &nonce, ciphertext, aad)?;
        let frames = parse_frames(&plaintext)?;

        Ok(ParsedPacket {
            session_id: header.session_id,
            counter: header.counter,
            frames,
        })
    }
}

impl std::fmt::Debug for PacketParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketParser")
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
