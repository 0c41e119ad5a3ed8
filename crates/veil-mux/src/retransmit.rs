// ============================================
// File: crates/veil-mux/src/retransmit.rs
// ============================================
//! # Retransmission Manager
//!
//! ## Creation Reason
//! Provides reliable delivery on top of the datagram channel: retains
//! sent ciphertext until acknowledged, estimates RTT per RFC 6298,
//! retransmits on timeout with exponential backoff, and gives up after
//! a retry budget.
//!
//! ## RTT Estimation (RFC 6298)
//! ```text
//! first sample:  SRTT = R, RTTVAR = R/2
//! later samples: RTTVAR = (1-β)·RTTVAR + β·|SRTT - R|
//!                SRTT   = (1-α)·SRTT   + α·R
//! RTO = clamp(SRTT + 4·RTTVAR, min_rto, max_rto)
//! ```
//! Samples are taken only from packets never retransmitted (Karn's
//! rule). Each retransmission doubles the RTO up to `max_rto`; the
//! backoff persists until the next fresh sample recomputes it.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Admission checks caps BEFORE storing, never after
//! - The stored bytes are the sealed datagram; retransmission resends
//!   them verbatim without re-encrypting
//!
//! ## Last Modified
//! v0.1.0 - Initial retransmission manager

use std::collections::BTreeMap;

use tracing::{debug, trace};

// ============================================
// Configuration
// ============================================

/// Retransmission configuration.
#[derive(Debug, Clone)]
pub struct RetransmissionConfig {
    /// RTO before the first RTT sample, in milliseconds.
    pub initial_rto_ms: u64,
    /// Lower RTO clamp.
    pub min_rto_ms: u64,
    /// Upper RTO clamp.
    pub max_rto_ms: u64,
    /// Retransmissions before a packet is dropped.
    pub max_retries: u32,
    /// Maximum packets awaiting acknowledgment.
    pub max_unacked_packets: usize,
    /// Maximum bytes awaiting acknowledgment.
    pub max_unacked_bytes: usize,
    /// RTT smoothing factor (α).
    pub rtt_alpha: f64,
    /// RTT variance factor (β).
    pub rtt_beta: f64,
}

impl Default for RetransmissionConfig {
    fn default() -> Self {
        Self {
            initial_rto_ms: 200,
            min_rto_ms: 100,
            max_rto_ms: 10_000,
            max_retries: 5,
            max_unacked_packets: 1024,
            max_unacked_bytes: 1_048_576,
            rtt_alpha: 0.125,
            rtt_beta: 0.25,
        }
    }
}

// ============================================
// RetransmissionManager
// ============================================

#[derive(Debug)]
struct UnackedPacket {
    data: Vec<u8>,
    first_sent_ms: u64,
    last_sent_ms: u64,
    retries: u32,
}

/// Sender-side store of unacknowledged packets with RTO-driven
/// recovery.
#[derive(Debug)]
pub struct RetransmissionManager {
    config: RetransmissionConfig,
    unacked: BTreeMap<u64, UnackedPacket>,
    unacked_bytes: usize,

    srtt_ms: f64,
    rttvar_ms: f64,
    rto_ms: u64,
    rtt_initialized: bool,

    total_retransmits: u64,
    total_drops: u64,
}

impl RetransmissionManager {
    /// Creates an empty manager at the initial RTO.
    #[must_use]
    pub fn new(config: RetransmissionConfig) -> Self {
        Self {
            rto_ms: config.initial_rto_ms,
            config,
            unacked: BTreeMap::new(),
            unacked_bytes: 0,
            srtt_ms: 0.0,
            rttvar_ms: 0.0,
            rtt_initialized: false,
            total_retransmits: 0,
            total_drops: 0,
        }
    }

    // ========================================
    // Accessors
    // ========================================

    /// Returns the smoothed RTT estimate in milliseconds.
    #[must_use]
    pub fn srtt_ms(&self) -> u64 {
        self.srtt_ms as u64
    }

    /// Returns the current retransmission timeout in milliseconds.
    #[must_use]
    pub const fn rto_ms(&self) -> u64 {
        self.rto_ms
    }

    /// Returns the number of packets awaiting acknowledgment.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    /// Returns the bytes awaiting acknowledgment.
    #[must_use]
    pub const fn unacked_bytes(&self) -> usize {
        self.unacked_bytes
    }

    /// Returns the total retransmissions performed.
    #[must_use]
    pub const fn total_retransmits(&self) -> u64 {
        self.total_retransmits
    }

    /// Returns the total packets dropped after exhausting retries.
    #[must_use]
    pub const fn total_drops(&self) -> u64 {
        self.total_drops
    }

    // ========================================
    // Registration & Acknowledgment
    // ========================================

    /// Returns `true` if a packet of `bytes` could be registered now.
    #[must_use]
    pub fn can_send(&self, bytes: usize) -> bool {
        self.unacked.len() < self.config.max_unacked_packets
            && self.unacked_bytes + bytes <= self.config.max_unacked_bytes
    }

    /// Retains a sent packet for potential retransmission.
    ///
    /// # Returns
    /// `false` if a cap would be exceeded or the sequence is already
    /// tracked; the packet is then NOT stored.
    pub fn register_packet(&mut self, seq: u64, data: Vec<u8>, now_ms: u64) -> bool {
        if self.unacked.len() >= self.config.max_unacked_packets {
            return false;
        }
        if self.unacked_bytes + data.len() > self.config.max_unacked_bytes {
            return false;
        }
        if self.unacked.contains_key(&seq) {
            return false;
        }

        self.unacked_bytes += data.len();
        self.unacked.insert(
            seq,
            UnackedPacket {
                data,
                first_sent_ms: now_ms,
                last_sent_ms: now_ms,
                retries: 0,
            },
        );
        true
    }

    /// Acknowledges a single sequence.
    ///
    /// Samples RTT only if the packet was never retransmitted
    /// (Karn's rule), then removes it from the store.
    pub fn ack_packet(&mut self, seq: u64, ack_time_ms: u64) {
        let Some(packet) = self.unacked.remove(&seq) else {
            return;
        };

        if packet.retries == 0 {
            let sample = ack_time_ms.saturating_sub(packet.first_sent_ms);
            self.update_rtt(sample);
        }

        self.unacked_bytes -= packet.data.len();
    }

    /// Processes a peer's `(ack, bitmap)` selective acknowledgment:
    /// everything at or below `ack` cumulatively, then each set bit
    /// `i` as `ack + 1 + i`.
    pub fn process_sack(&mut self, ack_number: u64, bitmap: u64, ack_time_ms: u64) {
        // Cumulative range: walk only the tracked sequences
        let cumulative: Vec<u64> = self
            .unacked
            .range(..=ack_number)
            .map(|(&seq, _)| seq)
            .collect();
        for seq in cumulative {
            self.ack_packet(seq, ack_time_ms);
        }

        for offset in 0..64u64 {
            if bitmap & (1u64 << offset) != 0 {
                self.ack_packet(ack_number + 1 + offset, ack_time_ms);
            }
        }
    }

    // ========================================
    // Timeout Recovery
    // ========================================

    /// Retransmits every entry whose RTO has elapsed and drops entries
    /// that exhausted their retry budget.
    ///
    /// # Arguments
    /// * `now_ms` - Current monotonic time
    /// * `on_retransmit` - Invoked with `(seq, stored datagram)` for
    ///   each retransmission
    /// * `on_drop` - Invoked with `seq` for each abandoned packet
    ///
    /// # Returns
    /// The number of retransmissions performed.
    pub fn retransmit_expired(
        &mut self,
        now_ms: u64,
        mut on_retransmit: impl FnMut(u64, &[u8]),
        mut on_drop: impl FnMut(u64),
    ) -> usize {
        let mut retransmitted = 0;
        let mut to_drop = Vec::new();

        for (&seq, packet) in &mut self.unacked {
            if now_ms.saturating_sub(packet.last_sent_ms) < self.rto_ms {
                continue;
            }

            if packet.retries >= self.config.max_retries {
                to_drop.push(seq);
                continue;
            }

            on_retransmit(seq, &packet.data);
            packet.last_sent_ms = now_ms;
            packet.retries += 1;
            self.total_retransmits += 1;
            retransmitted += 1;

            // Exponential backoff, held until the next fresh RTT sample
            self.rto_ms = (self.rto_ms * 2).min(self.config.max_rto_ms);
            trace!(seq, rto_ms = self.rto_ms, "packet retransmitted");
        }

        for seq in to_drop {
            if let Some(packet) = self.unacked.remove(&seq) {
                self.unacked_bytes -= packet.data.len();
                self.total_drops += 1;
                debug!(seq, retries = packet.retries, "packet dropped after max retries");
                on_drop(seq);
            }
        }

        retransmitted
    }

    // ========================================
    // RTT Estimation
    // ========================================

    fn update_rtt(&mut self, sample_ms: u64) {
        let sample = sample_ms as f64;

        if self.rtt_initialized {
            let delta = (self.srtt_ms - sample).abs();
            self.rttvar_ms = (1.0 - self.config.rtt_beta) * self.rttvar_ms
                + self.config.rtt_beta * delta;
            self.srtt_ms = (1.0 - self.config.rtt_alpha) * self.srtt_ms
                + self.config.rtt_alpha * sample;
        } else {
            self.srtt_ms = sample;
            self.rttvar_ms = sample / 2.0;
            self.rtt_initialized = true;
        }

        let rto = (self.srtt_ms + 4.0 * self.rttvar_ms) as u64;
        self.rto_ms = rto.clamp(self.config.min_rto_ms, self.config.max_rto_ms);
    }

    /// Clears all state and restores the initial RTO.
    pub fn reset(&mut self) {
        self.unacked.clear();
        self.unacked_bytes = 0;
        self.srtt_ms = 0.0;
        self.rttvar_ms = 0.0;
        self.rto_ms = self.config.initial_rto_ms;
        self.rtt_initialized = false;
        self.total_retransmits = 0;
        self.total_drops = 0;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RetransmissionManager {
        RetransmissionManager::new(RetransmissionConfig {
            max_retries: 2,
            max_unacked_packets: 8,
            max_unacked_bytes: 1_024,
            ..RetransmissionConfig::default()
        })
    }

    #[test]
    fn test_register_and_ack() {
        let mut manager = manager();
        assert!(manager.register_packet(1, vec![0; 100], 0));
        assert_eq!(manager.unacked_count(), 1);
        assert_eq!(manager.unacked_bytes(), 100);

        manager.ack_packet(1, 50);
        assert_eq!(manager.unacked_count(), 0);
        assert_eq!(manager.unacked_bytes(), 0);
    }

    #[test]
    fn test_duplicate_sequence_rejected() {
        let mut manager = manager();
        assert!(manager.register_packet(1, vec![0; 10], 0));
        assert!(!manager.register_packet(1, vec![0; 10], 0));
    }

    #[test]
    fn test_packet_cap() {
        let mut manager = manager();
        for seq in 1..=8 {
            assert!(manager.register_packet(seq, vec![0; 10], 0));
        }
        assert!(!manager.register_packet(9, vec![0; 10], 0));
        assert!(!manager.can_send(10));
    }

    #[test]
    fn test_byte_cap_frees_on_ack() {
        let mut manager = RetransmissionManager::new(RetransmissionConfig {
            max_unacked_packets: 10_000,
            max_unacked_bytes: 65_536,
            ..RetransmissionConfig::default()
        });

        // 100-byte packets fill the byte cap after 655 registrations
        let mut registered = 0u64;
        for seq in 1..=1000 {
            if manager.register_packet(seq, vec![0; 100], 0) {
                registered += 1;
            }
        }
        assert_eq!(registered, 655);
        assert!(!manager.can_send(100));

        // ACKs free capacity and registration resumes
        manager.ack_packet(1, 10);
        assert!(manager.can_send(100));
        assert!(manager.register_packet(2000, vec![0; 100], 10));
    }

    #[test]
    fn test_first_rtt_sample_initializes_estimator() {
        let mut manager = manager();
        manager.register_packet(1, vec![0; 10], 1_000);
        manager.ack_packet(1, 1_100);

        assert_eq!(manager.srtt_ms(), 100);
        // RTO = SRTT + 4·RTTVAR = 100 + 200 = 300
        assert_eq!(manager.rto_ms(), 300);
    }

    #[test]
    fn test_rtt_smoothing_follows_rfc6298() {
        let mut manager = manager();
        manager.register_packet(1, vec![0; 10], 0);
        manager.ack_packet(1, 100); // srtt = 100, rttvar = 50

        manager.register_packet(2, vec![0; 10], 1_000);
        manager.ack_packet(2, 1_200); // sample = 200

        // rttvar = 0.75·50 + 0.25·|100-200| = 62.5
        // srtt   = 0.875·100 + 0.125·200 = 112.5
        assert_eq!(manager.srtt_ms(), 112);
        // rto = 112.5 + 250 = 362
        assert_eq!(manager.rto_ms(), 362);
    }

    #[test]
    fn test_karn_rule_skips_retransmitted_samples() {
        let mut manager = manager();
        manager.register_packet(1, vec![0; 10], 0);

        // Force a retransmission at the initial 200 ms RTO
        let mut sent = Vec::new();
        manager.retransmit_expired(200, |seq, _| sent.push(seq), |_| {});
        assert_eq!(sent, vec![1]);

        // ACK of the retransmitted packet must not poison the estimator
        manager.ack_packet(1, 10_000);
        assert_eq!(manager.srtt_ms(), 0);
    }

    #[test]
    fn test_retransmit_backoff_doubles_rto() {
        let mut manager = manager();
        manager.register_packet(1, vec![0; 10], 0);
        assert_eq!(manager.rto_ms(), 200);

        manager.retransmit_expired(200, |_, _| {}, |_| {});
        assert_eq!(manager.rto_ms(), 400);

        manager.retransmit_expired(600, |_, _| {}, |_| {});
        assert_eq!(manager.rto_ms(), 800);
    }

    #[test]
    fn test_one_retransmit_per_eligible_entry_per_call() {
        let mut manager = manager();
        manager.register_packet(1, vec![1], 0);
        manager.register_packet(2, vec![2], 0);

        let mut sent = Vec::new();
        let count = manager.retransmit_expired(200, |seq, _| sent.push(seq), |_| {});
        assert_eq!(count, 1);
        assert_eq!(sent, vec![1]);
        // Entry 2 was not eligible: the backoff raised the RTO to 400
        // before it was examined, and it was last sent at t=0.
    }

    #[test]
    fn test_drop_after_max_retries() {
        let mut manager = manager();
        manager.register_packet(1, vec![0; 10], 0);

        let mut dropped = Vec::new();
        let mut now = 0u64;
        // max_retries = 2: two retransmissions, then the drop
        for _ in 0..3 {
            now += manager.rto_ms();
            manager.retransmit_expired(now, |_, _| {}, |seq| dropped.push(seq));
        }

        assert_eq!(dropped, vec![1]);
        assert_eq!(manager.unacked_count(), 0);
        assert_eq!(manager.total_drops(), 1);
        assert_eq!(manager.total_retransmits(), 2);
    }

    #[test]
    fn test_retransmitted_bytes_match_stored() {
        let mut manager = manager();
        let original = vec![0xAB; 42];
        manager.register_packet(7, original.clone(), 0);

        let mut seen = Vec::new();
        manager.retransmit_expired(500, |_, data| seen = data.to_vec(), |_| {});
        assert_eq!(seen, original);
    }

    #[test]
    fn test_process_sack() {
        let mut manager = manager();
        for seq in 1..=8 {
            manager.register_packet(seq, vec![0; 10], 0);
        }

        // ack = 3 cumulative, bitmap acks 5 (offset 1) and 7 (offset 3)
        manager.process_sack(3, 0b1010, 100);

        assert_eq!(manager.unacked_count(), 3);
        // 4, 6, 8 survive
        let mut sent = Vec::new();
        manager.retransmit_expired(10_000, |seq, _| sent.push(seq), |_| {});
        assert_eq!(sent, vec![4, 6, 8]);
    }
}
