// ============================================
// File: crates/veil-core/src/packet/mod.rs
// ============================================
//! # Packet Module
//!
//! ## Creation Reason
//! Groups the wire-format layers: the frame codec and the packet
//! builder/parser that seal frame streams under the session keys.
//!
//! ## Wire Format
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │ Session ID (8 bytes, BE)      │ ← AAD (authenticated) │
//! ├───────────────────────────────┤                       │
//! │ Counter (8 bytes, BE)         │ ← nonce derivation    │
//! ├───────────────────────────────────────────────────────┤
//! │ Encrypted frame stream        │ ← ChaCha20 ciphertext │
//! │ └─ Poly1305 Tag (16 bytes)    │ ← authentication tag  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial packet module

pub mod builder;
pub mod frame;
pub mod parser;

pub use builder::PacketBuilder;
pub use frame::{parse_frames, ControlType, Frame, FrameType, HandshakeStage, FRAME_HEADER_SIZE};
pub use parser::{PacketHeader, PacketParser, ParsedPacket};

use crate::crypto::POLY1305_TAG_SIZE;

// ============================================
// Constants
// ============================================

/// Size of the packet header: session id (8) + counter (8).
pub const PACKET_HEADER_SIZE: usize = 16;

/// Minimum valid packet size: header + tag.
pub const MIN_PACKET_SIZE: usize = PACKET_HEADER_SIZE + POLY1305_TAG_SIZE;
