// ============================================
// File: crates/veil-core/src/handshake.rs
// ============================================
//! # Handshake Engine
//!
//! ## Creation Reason
//! Implements the three-message mutually authenticated ephemeral key
//! exchange with pre-shared-key binding that establishes a session.
//!
//! ## Handshake Flow
//! ```text
//! Initiator                                      Responder
//!   │                                               │
//!   │  Init (ephemeral X25519 public key)           │
//!   │  ─────────────────────────────────────────►   │
//!   │                                               │
//!   │                    verify envelope, exchange  │
//!   │                                               │
//!   │           Response (ephemeral X25519 public)  │
//!   │  ◄─────────────────────────────────────────   │
//!   │                                               │
//!   │  verify envelope, exchange                    │
//!   │                                               │
//!   │  Finish (empty payload)                       │
//!   │  ─────────────────────────────────────────►   │
//!   │                                               │
//!   │  session id = HMAC(PSK, transcript)           │
//!   │  keys = HKDF(shared, session id, role)        │
//! ```
//!
//! ## Envelope Format
//! ```text
//! type (1) ∥ timestamp (8, BE, Unix secs) ∥ payload_len (2, BE) ∥
//! payload ∥ HMAC-SHA256 (32, keyed by PSK, over preceding bytes)
//! ```
//!
//! ## Anti-Probing
//! Invalid envelopes, out-of-range timestamps, and HMAC failures are
//! silent drops: no response is generated, so peers without the PSK
//! observe nothing. Only a failed key exchange transitions to `Failed`.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The transcript contains every sent and accepted envelope in full,
//!   HMAC included; both sides see the identical byte sequence
//! - Role is pinned by the state-machine entry path (`initiate` vs.
//!   accepting an Init), never inferred from key comparison
//! - Validation order on ingress is length → timestamp → HMAC; the
//!   envelope joins the transcript only after all three pass
//!
//! ## Last Modified
//! v0.1.0 - Initial handshake implementation

use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{
    derive_session_keys, hmac_sha256, mac::constant_time_eq, EphemeralKeyPair, SessionKeys,
    SharedSecret, HMAC_SHA256_SIZE, SESSION_ID_SIZE, X25519_PUBLIC_KEY_SIZE,
};

// ============================================
// Wire Constants
// ============================================

const MSG_INIT: u8 = 0x01;
const MSG_RESPONSE: u8 = 0x02;
const MSG_FINISH: u8 = 0x03;

/// type (1) + timestamp (8) + payload_len (2).
const MSG_HEADER_SIZE: usize = 11;

/// Minimum envelope: header + HMAC.
const MSG_MIN_SIZE: usize = MSG_HEADER_SIZE + HMAC_SHA256_SIZE;

// ============================================
// PreSharedKey
// ============================================

/// Size of the pre-shared key in bytes.
pub const PSK_SIZE: usize = 32;

/// The 32-byte pre-shared key.
///
/// All zeros is permitted and means "no PSK": the envelope HMAC is
/// then informational only and provides no admission control.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PreSharedKey([u8; PSK_SIZE]);

impl PreSharedKey {
    /// Creates a PSK from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PSK_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PSK_SIZE] {
        &self.0
    }

    /// Returns `true` if the PSK is all zeros (unset).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl Default for PreSharedKey {
    fn default() -> Self {
        Self([0u8; PSK_SIZE])
    }
}

impl fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PreSharedKey([REDACTED])")
    }
}

// ============================================
// Configuration
// ============================================

/// Handshake configuration.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Pre-shared key (all zeros = no PSK).
    pub psk: PreSharedKey,
    /// Maximum allowed clock skew on envelope timestamps, in seconds.
    pub timestamp_tolerance_secs: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            psk: PreSharedKey::default(),
            timestamp_tolerance_secs: 60,
        }
    }
}

// ============================================
// States, Roles, Errors
// ============================================

/// Handshake state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No handshake activity yet.
    Idle,
    /// Initiator: Init sent, awaiting Response.
    InitSent,
    /// Responder: Init accepted, preparing Response.
    InitReceived,
    /// Responder: Response sent, awaiting Finish.
    ResponseSent,
    /// Handshake completed successfully.
    Complete,
    /// Handshake failed terminally (key exchange failure).
    Failed,
}

/// Which side of the exchange this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The side that sent Init.
    Initiator,
    /// The side that accepted Init.
    Responder,
}

/// Handshake failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Malformed envelope or message invalid in the current state.
    #[error("invalid handshake message")]
    InvalidMessage,
    /// Envelope timestamp outside the configured tolerance.
    #[error("handshake timestamp out of range")]
    TimestampOutOfRange,
    /// Envelope HMAC did not verify under the PSK.
    #[error("handshake HMAC verification failed")]
    HmacFailed,
    /// X25519 exchange produced a weak shared secret.
    #[error("handshake key exchange failed")]
    KeyExchangeFailed,
    /// Operation invalid for the current state.
    #[error("handshake internal state violation")]
    Internal,
}

impl HandshakeError {
    /// Returns `true` for failures that must be silent drops
    /// (anti-probing): no response, no state transition.
    #[must_use]
    pub const fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            Self::InvalidMessage | Self::TimestampOutOfRange | Self::HmacFailed
        )
    }
}

// ============================================
// Progress & Output
// ============================================

/// The result of feeding one message to the handshake.
#[derive(Debug)]
pub struct HandshakeProgress {
    /// An envelope to transmit to the peer, if the protocol calls for one.
    pub reply: Option<Vec<u8>>,
    /// `true` once this side has reached `Complete`.
    pub complete: bool,
}

/// The established cryptographic material, available after `Complete`.
pub struct HandshakeOutput {
    /// The 32-byte session id derived from the transcript.
    pub session_id: [u8; SESSION_ID_SIZE],
    /// Directional session keys.
    pub keys: SessionKeys,
    /// The retained shared secret, for rotation re-derivation.
    pub shared_secret: SharedSecret,
    /// `true` if this side initiated.
    pub is_initiator: bool,
}

impl fmt::Debug for HandshakeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeOutput")
            .field("session_id", &format_args!("{:02x}{:02x}..", self.session_id[0], self.session_id[1]))
            .field("is_initiator", &self.is_initiator)
            .finish_non_exhaustive()
    }
}

// ============================================
// Handshake
// ============================================

/// The handshake protocol state machine.
pub struct Handshake {
    config: HandshakeConfig,
    state: HandshakeState,
    last_error: Option<HandshakeError>,
    role: Option<Role>,

    keypair: Option<EphemeralKeyPair>,
    public_bytes: [u8; X25519_PUBLIC_KEY_SIZE],
    peer_public: Option<[u8; X25519_PUBLIC_KEY_SIZE]>,
    shared: Option<SharedSecret>,
    session_id: Option<[u8; SESSION_ID_SIZE]>,

    transcript: Vec<u8>,
}

impl Handshake {
    /// Creates a handshake in the `Idle` state with a fresh ephemeral
    /// key pair.
    #[must_use]
    pub fn new(config: HandshakeConfig) -> Self {
        let keypair = EphemeralKeyPair::generate();
        let public_bytes = keypair.public_key_bytes();
        Self {
            config,
            state: HandshakeState::Idle,
            last_error: None,
            role: None,
            keypair: Some(keypair),
            public_bytes,
            peer_public: None,
            shared: None,
            session_id: None,
            transcript: Vec::new(),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Returns the most recent error, if any.
    #[must_use]
    pub const fn last_error(&self) -> Option<HandshakeError> {
        self.last_error
    }

    /// Returns `true` once the handshake has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == HandshakeState::Complete
    }

    /// Starts the handshake as initiator.
    ///
    /// # Arguments
    /// * `now_unix` - Current Unix time in seconds (stamped into the envelope)
    ///
    /// # Returns
    /// The Init envelope to transmit.
    ///
    /// # Errors
    /// - `Internal`: not in the `Idle` state
    pub fn initiate(&mut self, now_unix: u64) -> Result<Vec<u8>, HandshakeError> {
        if self.state != HandshakeState::Idle {
            return Err(self.fail(HandshakeError::Internal));
        }

        self.role = Some(Role::Initiator);
        let public = self.public_bytes;
        let msg = self.build_message(MSG_INIT, &public, now_unix);
        self.state = HandshakeState::InitSent;

        debug!(len = msg.len(), "handshake init emitted");
        Ok(msg)
    }

    /// Processes an incoming handshake envelope.
    ///
    /// # Arguments
    /// * `message` - The raw envelope bytes
    /// * `now_unix` - Current Unix time in seconds
    ///
    /// # Errors
    /// Silent-drop classes (`InvalidMessage`, `TimestampOutOfRange`,
    /// `HmacFailed`) leave the state unchanged; `KeyExchangeFailed`
    /// transitions to `Failed`.
    pub fn process_message(
        &mut self,
        message: &[u8],
        now_unix: u64,
    ) -> Result<HandshakeProgress, HandshakeError> {
        if message.len() < MSG_MIN_SIZE {
            return Err(self.fail(HandshakeError::InvalidMessage));
        }

        let msg_type = message[0];
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&message[1..9]);
        let timestamp = u64::from_be_bytes(ts_bytes);
        let payload_len = usize::from(u16::from_be_bytes([message[9], message[10]]));

        if message.len() != MSG_HEADER_SIZE + payload_len + HMAC_SHA256_SIZE {
            return Err(self.fail(HandshakeError::InvalidMessage));
        }

        if timestamp.abs_diff(now_unix) > self.config.timestamp_tolerance_secs {
            trace!(timestamp, now_unix, "handshake timestamp rejected");
            return Err(self.fail(HandshakeError::TimestampOutOfRange));
        }

        let hmac_offset = MSG_HEADER_SIZE + payload_len;
        let expected = hmac_sha256(self.config.psk.as_bytes(), &message[..hmac_offset]);
        if !constant_time_eq(&expected, &message[hmac_offset..]) {
            trace!("handshake HMAC rejected");
            return Err(self.fail(HandshakeError::HmacFailed));
        }

        // Accepted: the envelope joins the transcript before dispatch.
        self.transcript.extend_from_slice(message);

        let payload = message[MSG_HEADER_SIZE..hmac_offset].to_vec();

        match msg_type {
            MSG_INIT => self.handle_init(&payload, now_unix),
            MSG_RESPONSE => self.handle_response(&payload, now_unix),
            MSG_FINISH => self.handle_finish(&payload),
            _ => Err(self.fail(HandshakeError::InvalidMessage)),
        }
    }

    /// Returns the established material once `Complete`.
    #[must_use]
    pub fn output(&self) -> Option<HandshakeOutput> {
        if self.state != HandshakeState::Complete {
            return None;
        }

        let session_id = self.session_id?;
        let shared = self.shared.clone()?;
        let is_initiator = matches!(self.role?, Role::Initiator);

        let keys = derive_session_keys(&shared, &session_id, is_initiator).ok()?;

        Some(HandshakeOutput {
            session_id,
            keys,
            shared_secret: shared,
            is_initiator,
        })
    }

    /// Resets to `Idle` with a fresh ephemeral key pair.
    pub fn reset(&mut self) {
        let keypair = EphemeralKeyPair::generate();
        self.public_bytes = keypair.public_key_bytes();
        self.keypair = Some(keypair);
        self.state = HandshakeState::Idle;
        self.last_error = None;
        self.role = None;
        self.peer_public = None;
        self.shared = None;
        self.session_id = None;
        self.transcript.zeroize();
    }

    // ========================================
    // Message Handlers
    // ========================================

    fn handle_init(
        &mut self,
        payload: &[u8],
        now_unix: u64,
    ) -> Result<HandshakeProgress, HandshakeError> {
        if self.state != HandshakeState::Idle {
            return Err(self.fail(HandshakeError::InvalidMessage));
        }
        let peer = Self::payload_public_key(payload)
            .ok_or_else(|| self.fail(HandshakeError::InvalidMessage))?;

        self.role = Some(Role::Responder);
        self.peer_public = Some(peer);
        self.state = HandshakeState::InitReceived;

        self.perform_exchange(&peer)?;

        let public = self.public_bytes;
        let reply = self.build_message(MSG_RESPONSE, &public, now_unix);
        self.state = HandshakeState::ResponseSent;

        debug!("handshake init accepted, response emitted");
        Ok(HandshakeProgress {
            reply: Some(reply),
            complete: false,
        })
    }

    fn handle_response(
        &mut self,
        payload: &[u8],
        now_unix: u64,
    ) -> Result<HandshakeProgress, HandshakeError> {
        if self.state != HandshakeState::InitSent {
            return Err(self.fail(HandshakeError::InvalidMessage));
        }
        let peer = Self::payload_public_key(payload)
            .ok_or_else(|| self.fail(HandshakeError::InvalidMessage))?;

        self.peer_public = Some(peer);
        self.perform_exchange(&peer)?;

        // Finish joins the transcript before the session id is derived,
        // so both sides hash Init ∥ Response ∥ Finish.
        let reply = self.build_message(MSG_FINISH, &[], now_unix);
        self.derive_session_id();
        self.state = HandshakeState::Complete;

        debug!("handshake complete (initiator)");
        Ok(HandshakeProgress {
            reply: Some(reply),
            complete: true,
        })
    }

    fn handle_finish(&mut self, _payload: &[u8]) -> Result<HandshakeProgress, HandshakeError> {
        if self.state != HandshakeState::ResponseSent {
            return Err(self.fail(HandshakeError::InvalidMessage));
        }

        self.derive_session_id();
        self.state = HandshakeState::Complete;

        debug!("handshake complete (responder)");
        Ok(HandshakeProgress {
            reply: None,
            complete: true,
        })
    }

    // ========================================
    // Internals
    // ========================================

    fn payload_public_key(payload: &[u8]) -> Option<[u8; X25519_PUBLIC_KEY_SIZE]> {
        payload.try_into().ok()
    }

    fn perform_exchange(
        &mut self,
        peer: &[u8; X25519_PUBLIC_KEY_SIZE],
    ) -> Result<(), HandshakeError> {
        let keypair = self
            .keypair
            .take()
            .ok_or_else(|| self.fail(HandshakeError::Internal))?;

        match keypair.exchange(peer) {
            Ok(shared) => {
                self.shared = Some(shared);
                Ok(())
            }
            Err(_) => Err(self.fail(HandshakeError::KeyExchangeFailed)),
        }
    }

    fn build_message(&mut self, msg_type: u8, payload: &[u8], now_unix: u64) -> Vec<u8> {
        let mut msg = Vec::with_capacity(MSG_HEADER_SIZE + payload.len() + HMAC_SHA256_SIZE);
        msg.push(msg_type);
        msg.extend_from_slice(&now_unix.to_be_bytes());
        msg.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        msg.extend_from_slice(payload);

        let hmac = hmac_sha256(self.config.psk.as_bytes(), &msg);
        msg.extend_from_slice(&hmac);

        self.transcript.extend_from_slice(&msg);
        msg
    }

    fn derive_session_id(&mut self) {
        let digest = hmac_sha256(self.config.psk.as_bytes(), &self.transcript);
        self.session_id = Some(digest);
    }

    fn fail(&mut self, error: HandshakeError) -> HandshakeError {
        self.last_error = Some(error);
        if error == HandshakeError::KeyExchangeFailed {
            self.state = HandshakeState::Failed;
        }
        error
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("state", &self.state)
            .field("role", &self.role)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
