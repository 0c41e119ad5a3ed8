// ============================================
// File: crates/veil-mux/src/fragment.rs
// ============================================
//! # Fragment Assembler
//!
//! ## Creation Reason
//! Reassembles application messages that were split into MTU-sized
//! fragments, with strict resource caps and expiry of partial
//! assemblies.
//!
//! ## Rejection Rules
//! A fragment is rejected (counted, not errored) when:
//! - `total == 0` or `index >= total`
//! - `total` exceeds the per-message fragment cap
//! - a new message id arrives while the pending-message cap is full
//! - `total` disagrees with the pending entry for that message id
//! - the index is a duplicate
//! - accepting it would exceed the message size cap
//!
//! ## Last Modified
//! v0.1.0 - Initial fragment assembler

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

// ============================================
// Configuration
// ============================================

/// Fragment assembler limits.
#[derive(Debug, Clone)]
pub struct FragmentAssemblerConfig {
    /// Maximum simultaneously pending messages.
    pub max_pending_messages: usize,
    /// Maximum fragments per message.
    pub max_fragments_per_message: u16,
    /// Maximum reassembled message size in bytes.
    pub max_message_size: usize,
    /// Pending assemblies older than this are expired.
    pub fragment_timeout_ms: u64,
}

impl Default for FragmentAssemblerConfig {
    fn default() -> Self {
        Self {
            max_pending_messages: 256,
            max_fragments_per_message: 1024,
            max_message_size: 1_048_576,
            fragment_timeout_ms: 5_000,
        }
    }
}

// ============================================
// Outcome
// ============================================

/// Result of offering one fragment to the assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Stored; the message is still incomplete.
    Stored,
    /// This fragment completed the message; here are its bytes in
    /// ascending index order.
    Completed(Vec<u8>),
    /// Rejected by a validation or resource rule.
    Rejected,
}

// ============================================
// FragmentAssembler
// ============================================

#[derive(Debug)]
struct PendingMessage {
    total_fragments: u16,
    fragments: BTreeMap<u16, Vec<u8>>,
    first_fragment_ms: u64,
    total_bytes: usize,
}

/// Collects fragments by message id and reassembles complete messages.
#[derive(Debug)]
pub struct FragmentAssembler {
    config: FragmentAssemblerConfig,
    pending: HashMap<u32, PendingMessage>,

    fragments_seen: u64,
    messages_assembled: u64,
    messages_expired: u64,
    fragments_rejected: u64,
}

impl FragmentAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new(config: FragmentAssemblerConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            fragments_seen: 0,
            messages_assembled: 0,
            messages_expired: 0,
            fragments_rejected: 0,
        }
    }

    /// Returns the number of pending (incomplete) messages.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.pending.len()
    }

    /// Returns how many messages have been fully assembled.
    #[must_use]
    pub const fn messages_assembled(&self) -> u64 {
        self.messages_assembled
    }

    /// Returns how many partial assemblies expired.
    #[must_use]
    pub const fn messages_expired(&self) -> u64 {
        self.messages_expired
    }

    /// Returns how many fragments were rejected.
    #[must_use]
    pub const fn fragments_rejected(&self) -> u64 {
        self.fragments_rejected
    }

    /// Offers one fragment.
    pub fn add_fragment(
        &mut self,
        message_id: u32,
        index: u16,
        total: u16,
        payload: &[u8],
        now_ms: u64,
    ) -> FragmentOutcome {
        self.fragments_seen += 1;

        if total == 0 || index >= total || total > self.config.max_fragments_per_message {
            return self.reject(message_id, "invalid fragment parameters");
        }

        if !self.pending.contains_key(&message_id) {
            if self.pending.len() >= self.config.max_pending_messages {
                return self.reject(message_id, "pending message cap reached");
            }
            self.pending.insert(
                message_id,
                PendingMessage {
                    total_fragments: total,
                    fragments: BTreeMap::new(),
                    first_fragment_ms: now_ms,
                    total_bytes: 0,
                },
            );
        }

        // Entry guaranteed present; the map is only mutated above.
        let Some(message) = self.pending.get_mut(&message_id) else {
            return FragmentOutcome::Rejected;
        };

        if message.total_fragments != total {
            self.fragments_rejected += 1;
            trace!(message_id, "fragment total mismatch");
            return FragmentOutcome::Rejected;
        }

        if message.fragments.contains_key(&index) {
            self.fragments_rejected += 1;
            trace!(message_id, index, "duplicate fragment");
            return FragmentOutcome::Rejected;
        }

        if message.total_bytes + payload.len() > self.config.max_message_size {
            self.fragments_rejected += 1;
            trace!(message_id, "message size cap exceeded");
            return FragmentOutcome::Rejected;
        }

        message.total_bytes += payload.len();
        message.fragments.insert(index, payload.to_vec());

        if message.fragments.len() == usize::from(message.total_fragments) {
            let Some(message) = self.pending.remove(&message_id) else {
                return FragmentOutcome::Rejected;
            };
            let mut assembled = Vec::with_capacity(message.total_bytes);
            for (_, chunk) in message.fragments {
                assembled.extend_from_slice(&chunk);
            }
            self.messages_assembled += 1;
            debug!(message_id, bytes = assembled.len(), "message assembled");
            return FragmentOutcome::Completed(assembled);
        }

        FragmentOutcome::Stored
    }

    /// Expires pending assemblies older than the configured timeout.
    ///
    /// # Returns
    /// The number of messages removed.
    pub fn cleanup_expired(&mut self, now_ms: u64) -> usize {
        let timeout = self.config.fragment_timeout_ms;
        let before = self.pending.len();

        self.pending
            .retain(|_, message| now_ms.saturating_sub(message.first_fragment_ms) <= timeout);

        let removed = before - self.pending.len();
        self.messages_expired += removed as u64;
        if removed > 0 {
            debug!(removed, "expired partial fragment assemblies");
        }
        removed
    }

    /// Clears all state.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn reject(&mut self, message_id: u32, reason: &'static str) -> FragmentOutcome {
        self.fragments_rejected += 1;
        trace!(message_id, reason, "fragment rejected");
        FragmentOutcome::Rejected
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> FragmentAssembler {
        FragmentAssembler::new(FragmentAssemblerConfig {
            max_pending_messages: 2,
            max_fragments_per_message: 8,
            max_message_size: 64,
            fragment_timeout_ms: 1_000,
        })
    }

    #[test]
    fn test_out_of_order_assembly() {
        let mut asm = assembler();

        // Indices [2, 0, 1]: completed bytes must be index order
        assert_eq!(asm.add_fragment(1, 2, 3, b"cc", 0), FragmentOutcome::Stored);
        assert_eq!(asm.add_fragment(1, 0, 3, b"aa", 0), FragmentOutcome::Stored);
        match asm.add_fragment(1, 1, 3, b"bb", 0) {
            FragmentOutcome::Completed(bytes) => assert_eq!(bytes, b"aabbcc"),
            other => panic!("expected completion, got {other:?}"),
        }

        assert_eq!(asm.pending_messages(), 0);
        assert_eq!(asm.messages_assembled(), 1);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let mut asm = assembler();
        asm.add_fragment(1, 1, 3, b"bb", 0);
        assert_eq!(
            asm.add_fragment(1, 1, 3, b"bb", 0),
            FragmentOutcome::Rejected
        );
        assert_eq!(asm.fragments_rejected(), 1);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut asm = assembler();

        assert_eq!(asm.add_fragment(1, 0, 0, b"x", 0), FragmentOutcome::Rejected);
        assert_eq!(asm.add_fragment(1, 3, 3, b"x", 0), FragmentOutcome::Rejected);
        // total above the per-message cap
        assert_eq!(asm.add_fragment(1, 0, 9, b"x", 0), FragmentOutcome::Rejected);
    }

    #[test]
    fn test_total_mismatch_rejected() {
        let mut asm = assembler();
        asm.add_fragment(1, 0, 3, b"aa", 0);
        assert_eq!(
            asm.add_fragment(1, 1, 4, b"bb", 0),
            FragmentOutcome::Rejected
        );
    }

    #[test]
    fn test_pending_cap_rejects_new_message() {
        let mut asm = assembler();
        asm.add_fragment(1, 0, 2, b"a", 0);
        asm.add_fragment(2, 0, 2, b"b", 0);

        assert_eq!(asm.add_fragment(3, 0, 2, b"c", 0), FragmentOutcome::Rejected);
        // Existing messages still progress
        assert!(matches!(
            asm.add_fragment(1, 1, 2, b"a", 0),
            FragmentOutcome::Completed(_)
        ));
    }

    #[test]
    fn test_message_size_cap() {
        let mut asm = assembler();
        assert_eq!(
            asm.add_fragment(1, 0, 2, &[0u8; 60], 0),
            FragmentOutcome::Stored
        );
        assert_eq!(
            asm.add_fragment(1, 1, 2, &[0u8; 5], 0),
            FragmentOutcome::Rejected
        );
    }

    #[test]
    fn test_cleanup_expired() {
        let mut asm = assembler();
        asm.add_fragment(1, 0, 2, b"a", 0);
        asm.add_fragment(2, 0, 2, b"b", 900);

        assert_eq!(asm.cleanup_expired(1_001), 1);
        assert_eq!(asm.pending_messages(), 1);
        assert_eq!(asm.messages_expired(), 1);

        // The survivor can still complete
        assert!(matches!(
            asm.add_fragment(2, 1, 2, b"b", 1_001),
            FragmentOutcome::Completed(_)
        ));
    }

    #[test]
    fn test_single_fragment_message() {
        let mut asm = assembler();
        match asm.add_fragment(9, 0, 1, b"whole", 0) {
            FragmentOutcome::Completed(bytes) => assert_eq!(bytes, b"whole"),
            other => panic!("expected completion, got {other:?}"),
        }
    }
}
