// ============================================
// File: crates/veil-mux/src/rotate.rs
// ============================================
//! # Session Rotator
//!
//! ## Creation Reason
//! Tracks per-session traffic budgets (packets, bytes, seconds) and
//! generates fresh session identifiers when any budget is exhausted,
//! bounding the material encrypted under one key set.
//!
//! ## Main Logical Flow
//! 1. `on_packet_sent` / `on_packet_received` advance the counters
//! 2. `should_rotate` compares against the configured budgets
//! 3. `rotate` draws a fresh 32-byte id from the CSPRNG and resets
//!    all counters and the session start time
//!
//! ## ⚠️ Important Note for Next Developer
//! - The wire session id is the first 8 bytes of the 32-byte id,
//!   big-endian; the full id is the HKDF salt for the new key set
//!
//! ## Last Modified
//! v0.1.0 - Initial session rotator

use tracing::debug;

use veil_core::crypto::{random_bytes, SESSION_ID_SIZE};

// ============================================
// Configuration
// ============================================

/// Session rotation budgets.
#[derive(Debug, Clone)]
pub struct SessionRotatorConfig {
    /// Rotate after this many packets (sent + received).
    pub packets_per_session: u64,
    /// Rotate after this many bytes (sent + received).
    pub bytes_per_session: u64,
    /// Rotate after this many seconds.
    pub seconds_per_session: u64,
}

impl Default for SessionRotatorConfig {
    fn default() -> Self {
        Self {
            packets_per_session: 1_000_000,
            bytes_per_session: 1 << 30,
            seconds_per_session: 3_600,
        }
    }
}

// ============================================
// SessionRotator
// ============================================

/// Generates session ids and decides when to rotate them.
#[derive(Debug)]
pub struct SessionRotator {
    config: SessionRotatorConfig,
    session_id: [u8; SESSION_ID_SIZE],

    packets_sent: u64,
    packets_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    session_start_secs: u64,
    rotations: u64,
}

impl SessionRotator {
    /// Creates a rotator with a freshly drawn random session id.
    ///
    /// # Arguments
    /// * `now_secs` - Current time in seconds (monotonic basis)
    #[must_use]
    pub fn new(config: SessionRotatorConfig, now_secs: u64) -> Self {
        let mut session_id = [0u8; SESSION_ID_SIZE];
        random_bytes(&mut session_id);
        Self {
            config,
            session_id,
            packets_sent: 0,
            packets_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            session_start_secs: now_secs,
            rotations: 0,
        }
    }

    /// Returns the current 32-byte session id.
    #[must_use]
    pub const fn session_id(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.session_id
    }

    /// Returns the 64-bit wire form: the id's first 8 bytes, big-endian.
    #[must_use]
    pub fn wire_id(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.session_id[..8]);
        u64::from_be_bytes(bytes)
    }

    /// Returns how many rotations have occurred.
    #[must_use]
    pub const fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Records an outbound packet.
    pub fn on_packet_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Records an inbound packet.
    pub fn on_packet_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Returns `true` when any budget (packets, bytes, seconds) is
    /// exhausted.
    #[must_use]
    pub fn should_rotate(&self, now_secs: u64) -> bool {
        let total_packets = self.packets_sent + self.packets_received;
        if total_packets >= self.config.packets_per_session {
            return true;
        }

        let total_bytes = self.bytes_sent + self.bytes_received;
        if total_bytes >= self.config.bytes_per_session {
            return true;
        }

        now_secs.saturating_sub(self.session_start_secs) >= self.config.seconds_per_session
    }

    /// Draws a fresh session id and resets all budget counters.
    ///
    /// # Returns
    /// The new 32-byte session id.
    pub fn rotate(&mut self, now_secs: u64) -> [u8; SESSION_ID_SIZE] {
        random_bytes(&mut self.session_id);
        self.packets_sent = 0;
        self.packets_received = 0;
        self.bytes_sent = 0;
        self.bytes_received = 0;
        self.session_start_secs = now_secs;
        self.rotations += 1;

        debug!(wire_id = format_args!("{:016x}", self.wire_id()), "session rotated");
        self.session_id
    }

    /// Installs an externally derived session id (handshake completion
    /// or a peer's rotation announcement) and resets the counters.
    pub fn install_id(&mut self, session_id: [u8; SESSION_ID_SIZE], now_secs: u64) {
        self.session_id = session_id;
        self.packets_sent = 0;
        self.packets_received = 0;
        self.bytes_sent = 0;
        self.bytes_received = 0;
        self.session_start_secs = now_secs;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rotator() -> SessionRotator {
        SessionRotator::new(
            SessionRotatorConfig {
                packets_per_session: 10,
                bytes_per_session: 1_000,
                seconds_per_session: 60,
            },
            0,
        )
    }

    #[test]
    fn test_initial_id_nonzero() {
        let rotator = rotator();
        assert_ne!(rotator.session_id(), &[0u8; 32]);
        assert_ne!(rotator.wire_id(), 0);
    }

    #[test]
    fn test_wire_id_is_id_prefix() {
        let rotator = rotator();
        let id = rotator.session_id();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&id[..8]);
        assert_eq!(rotator.wire_id(), u64::from_be_bytes(prefix));
    }

    #[test]
    fn test_packet_budget_triggers() {
        let mut rotator = rotator();
        for _ in 0..5 {
            rotator.on_packet_sent(10);
            rotator.on_packet_received(10);
        }
        assert!(rotator.should_rotate(0));
    }

    #[test]
    fn test_byte_budget_triggers() {
        let mut rotator = rotator();
        rotator.on_packet_sent(600);
        assert!(!rotator.should_rotate(0));
        rotator.on_packet_received(400);
        assert!(rotator.should_rotate(0));
    }

    #[test]
    fn test_time_budget_triggers() {
        let rotator = rotator();
        assert!(!rotator.should_rotate(59));
        assert!(rotator.should_rotate(60));
    }

    #[test]
    fn test_rotate_changes_id_and_resets() {
        let mut rotator = rotator();
        for _ in 0..10 {
            rotator.on_packet_sent(10);
        }
        assert!(rotator.should_rotate(0));

        let old_id = *rotator.session_id();
        let new_id = rotator.rotate(30);

        assert_ne!(new_id, old_id);
        assert_eq!(rotator.rotations(), 1);
        assert!(!rotator.should_rotate(30));
        // The time budget is measured from the rotation instant
        assert!(rotator.should_rotate(90));
    }

    #[test]
    fn test_ids_never_repeat_across_rotations() {
        let mut rotator = rotator();
        let mut seen = std::collections::HashSet::new();
        seen.insert(*rotator.session_id());
        for i in 0..100 {
            assert!(seen.insert(rotator.rotate(i)), "session id repeated");
        }
    }

    #[test]
    fn test_install_id_resets_counters() {
        let mut rotator = rotator();
        for _ in 0..10 {
            rotator.on_packet_sent(10);
        }
        rotator.install_id([0x77; 32], 5);

        assert_eq!(rotator.session_id(), &[0x77; 32]);
        assert!(!rotator.should_rotate(5));
    }
}
