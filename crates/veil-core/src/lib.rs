// ============================================
// File: crates/veil-core/src/lib.rs
// ============================================
//! # VEIL Core - Protocol & Cryptography Library
//!
//! ## Creation Reason
//! Provides the foundational protocol definitions and cryptographic
//! operations for the VEIL encrypted datagram transport. This crate is
//! the security backbone of the entire system.
//!
//! ## Main Functionality
//!
//! ### Crypto Module ([`crypto`])
//! - Key types (`EphemeralKeyPair`, `SymmetricKey`, `SessionKeys`)
//! - Key derivation (HKDF-SHA256 with directional labels)
//! - Transport encryption (ChaCha20-Poly1305 with header AAD)
//! - HMAC-SHA256 and constant-time comparison
//!
//! ### Handshake Module ([`handshake`])
//! - Three-message authenticated ephemeral key exchange
//! - PSK-HMAC envelope authentication and transcript binding
//!
//! ### Packet Module ([`packet`])
//! - Six-variant frame codec (data, ack, control, fragment,
//!   handshake, session-rotate)
//! - Packet builder/parser binding the header as associated data
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              veil-transport                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │    veil-core  ◄──        veil-mux                   │
//! │    You are here               │                     │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │              veil-common                            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Guarantees
//! - **Confidentiality**: ChaCha20-Poly1305 authenticated encryption
//! - **Integrity**: Poly1305 MAC binding the packet header as AAD
//! - **Authenticity**: PSK-HMAC on every handshake envelope
//! - **Forward Secrecy**: X25519 ephemeral key exchange per session
//! - **Replay Protection**: Monotonic counters drive nonce derivation
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses audited RustCrypto/dalek implementations
//! - NEVER implement custom crypto primitives
//! - ALL key material MUST implement Zeroize for secure cleanup
//! - Wire format changes break interoperability; version carefully
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod handshake;
pub mod packet;

// Re-export commonly used items
pub use crypto::{EphemeralKeyPair, NonceBase, SessionKeys, SharedSecret, SymmetricKey};
pub use error::{CoreError, Result};
pub use handshake::{Handshake, HandshakeConfig, HandshakeError, HandshakeState, PreSharedKey};
pub use packet::{Frame, PacketBuilder, PacketHeader, PacketParser, ParsedPacket};
