// ============================================
// File: crates/veil-mux/src/reorder.rs
// ============================================
//! # Reorder Buffer
//!
//! ## Creation Reason
//! Buffers out-of-order reliable payloads and delivers them to the
//! application in sequence order, with a timeout escape hatch for
//! persistent gaps.
//!
//! ## Main Logical Flow
//! 1. `insert` admits payloads above the delivery cursor, within caps
//! 2. `deliver` drains the contiguous run at the cursor
//! 3. `flush` additionally skips past a gap once the oldest buffered
//!    entry has waited longer than `max_delay_ms`
//!
//! ## ⚠️ Important Note for Next Developer
//! - `next_expected` is monotonically non-decreasing; a flush that
//!   skips a gap is the only way sequences are ever skipped
//! - Delivery closures receive the sequence number so callers can
//!   observe the discontinuity a flush introduces
//!
//! ## Last Modified
//! v0.1.0 - Initial reorder buffer

use std::collections::BTreeMap;

use tracing::warn;

// ============================================
// Configuration
// ============================================

/// Reorder buffer limits.
#[derive(Debug, Clone)]
pub struct ReorderBufferConfig {
    /// Maximum number of buffered out-of-order packets.
    pub max_buffered_packets: usize,
    /// Maximum total bytes buffered.
    pub max_buffered_bytes: usize,
    /// A gap older than this is skipped on flush.
    pub max_delay_ms: u64,
}

impl Default for ReorderBufferConfig {
    fn default() -> Self {
        Self {
            max_buffered_packets: 1024,
            max_buffered_bytes: 1_048_576,
            max_delay_ms: 500,
        }
    }
}

// ============================================
// ReorderBuffer
// ============================================

#[derive(Debug)]
struct BufferedPacket {
    data: Vec<u8>,
    arrival_ms: u64,
}

/// Sequence-ordered buffer delivering reliable payloads in order.
#[derive(Debug)]
pub struct ReorderBuffer {
    config: ReorderBufferConfig,
    buffer: BTreeMap<u64, BufferedPacket>,
    next_expected: u64,
    buffered_bytes: usize,
}

impl ReorderBuffer {
    /// Creates an empty buffer expecting sequence 1 first.
    #[must_use]
    pub fn new(config: ReorderBufferConfig) -> Self {
        Self {
            config,
            buffer: BTreeMap::new(),
            next_expected: 1,
            buffered_bytes: 0,
        }
    }

    /// Returns the next sequence the application has not yet seen.
    #[must_use]
    pub const fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Returns the number of buffered packets.
    #[must_use]
    pub fn buffered_packets(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the number of buffered bytes.
    #[must_use]
    pub const fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Admits a received payload.
    ///
    /// # Returns
    /// `false` for sequences below the delivery cursor, duplicates, or
    /// when a packet/byte cap would be exceeded.
    pub fn insert(&mut self, seq: u64, data: Vec<u8>, now_ms: u64) -> bool {
        if seq < self.next_expected || self.buffer.contains_key(&seq) {
            return false;
        }

        if self.buffer.len() >= self.config.max_buffered_packets {
            return false;
        }

        if self.buffered_bytes + data.len() > self.config.max_buffered_bytes {
            return false;
        }

        self.buffered_bytes += data.len();
        self.buffer.insert(
            seq,
            BufferedPacket {
                data,
                arrival_ms: now_ms,
            },
        );
        true
    }

    /// Delivers the contiguous run starting at the cursor.
    ///
    /// # Returns
    /// The number of payloads delivered.
    pub fn deliver(&mut self, mut on_deliver: impl FnMut(u64, Vec<u8>)) -> usize {
        let mut delivered = 0;

        while let Some(packet) = self.buffer.remove(&self.next_expected) {
            self.buffered_bytes -= packet.data.len();
            on_deliver(self.next_expected, packet.data);
            self.next_expected += 1;
            delivered += 1;
        }

        delivered
    }

    /// Delivers contiguously, then skips past any gap whose oldest
    /// waiter has exceeded `max_delay_ms`.
    ///
    /// # Returns
    /// The number of payloads delivered.
    pub fn flush(&mut self, now_ms: u64, mut on_deliver: impl FnMut(u64, Vec<u8>)) -> usize {
        let mut delivered = self.deliver(&mut on_deliver);

        loop {
            let Some((&seq, entry)) = self.buffer.first_key_value() else {
                break;
            };

            if now_ms.saturating_sub(entry.arrival_ms) < self.config.max_delay_ms {
                break;
            }

            warn!(
                from = self.next_expected,
                to = seq,
                "reorder gap skipped after timeout"
            );

            if let Some(packet) = self.buffer.remove(&seq) {
                self.buffered_bytes -= packet.data.len();
                on_deliver(seq, packet.data);
                self.next_expected = seq + 1;
                delivered += 1;
            }

            delivered += self.deliver(&mut on_deliver);
        }

        delivered
    }

    /// Clears all state and resets the cursor to 1.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.next_expected = 1;
        self.buffered_bytes = 0;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_buffer() -> ReorderBuffer {
        ReorderBuffer::new(ReorderBufferConfig {
            max_buffered_packets: 4,
            max_buffered_bytes: 64,
            max_delay_ms: 100,
        })
    }

    fn collect(buffer: &mut ReorderBuffer) -> Vec<u64> {
        let mut seen = Vec::new();
        buffer.deliver(|seq, _| seen.push(seq));
        seen
    }

    #[test]
    fn test_in_order_delivery() {
        let mut buffer = small_buffer();
        assert!(buffer.insert(1, vec![1], 0));
        assert!(buffer.insert(2, vec![2], 0));

        assert_eq!(collect(&mut buffer), vec![1, 2]);
        assert_eq!(buffer.next_expected(), 3);
        assert_eq!(buffer.buffered_bytes(), 0);
    }

    #[test]
    fn test_out_of_order_held_until_gap_fills() {
        let mut buffer = small_buffer();
        assert!(buffer.insert(2, vec![2], 0));
        assert!(buffer.insert(3, vec![3], 0));

        assert_eq!(collect(&mut buffer), Vec::<u64>::new());

        assert!(buffer.insert(1, vec![1], 0));
        assert_eq!(collect(&mut buffer), vec![1, 2, 3]);
    }

    #[test]
    fn test_below_cursor_and_duplicate_rejected() {
        let mut buffer = small_buffer();
        buffer.insert(1, vec![1], 0);
        collect(&mut buffer);

        assert!(!buffer.insert(1, vec![1], 0)); // below cursor
        assert!(buffer.insert(3, vec![3], 0));
        assert!(!buffer.insert(3, vec![3], 0)); // duplicate
    }

    #[test]
    fn test_packet_cap_enforced() {
        let mut buffer = small_buffer();
        for seq in 2..=5 {
            assert!(buffer.insert(seq, vec![0], 0));
        }
        assert!(!buffer.insert(6, vec![0], 0));
    }

    #[test]
    fn test_byte_cap_enforced() {
        let mut buffer = small_buffer();
        assert!(buffer.insert(2, vec![0; 60], 0));
        assert!(!buffer.insert(3, vec![0; 5], 0));
        assert!(buffer.insert(3, vec![0; 4], 0));
    }

    #[test]
    fn test_flush_skips_stale_gap() {
        let mut buffer = small_buffer();
        buffer.insert(3, vec![3], 0);
        buffer.insert(4, vec![4], 0);

        // Not stale yet
        let mut seen = Vec::new();
        assert_eq!(buffer.flush(99, |seq, _| seen.push(seq)), 0);

        // Stale: skip the 1..=2 gap, then drain the contiguous run
        assert_eq!(buffer.flush(100, |seq, _| seen.push(seq)), 2);
        assert_eq!(seen, vec![3, 4]);
        assert_eq!(buffer.next_expected(), 5);
    }

    #[test]
    fn test_flush_delivers_head_before_skipping() {
        let mut buffer = small_buffer();
        buffer.insert(1, vec![1], 0);
        buffer.insert(5, vec![5], 0);

        let mut seen = Vec::new();
        buffer.flush(200, |seq, _| seen.push(seq));
        assert_eq!(seen, vec![1, 5]);
        assert_eq!(buffer.next_expected(), 6);
    }

    #[test]
    fn test_flush_respects_per_entry_age() {
        let mut buffer = small_buffer();
        buffer.insert(2, vec![2], 0);
        buffer.insert(5, vec![5], 150);

        let mut seen = Vec::new();
        // At t=150 only seq 2 (age 150) is stale; 5 (age 0) is not
        buffer.flush(150, |seq, _| seen.push(seq));
        assert_eq!(seen, vec![2]);
        assert_eq!(buffer.next_expected(), 3);
    }

    #[test]
    fn test_cursor_monotone_after_reset_only() {
        let mut buffer = small_buffer();
        buffer.insert(2, vec![2], 0);
        buffer.flush(500, |_, _| {});
        assert_eq!(buffer.next_expected(), 3);

        buffer.reset();
        assert_eq!(buffer.next_expected(), 1);
    }
}
