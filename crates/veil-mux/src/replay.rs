// ============================================
// File: crates/veil-mux/src/replay.rs
// ============================================
//! # Replay Window
//!
//! ## Creation Reason
//! Tracks which packet counters have already been admitted so that a
//! captured datagram cannot be replayed into the session.
//!
//! ## Admission Rule
//! A 64-slot sliding bitmap below the highest admitted counter:
//! - first observation: accept and initialize
//! - counter above the highest: accept, shift the window
//! - counter equal to the highest: reject (duplicate)
//! - counter at least 64 below the highest: reject (too old)
//! - otherwise: reject iff the bitmap slot is already set
//!
//! ## ⚠️ Important Note for Next Developer
//! - `check` is side-effect free; update state only AFTER the packet
//!   also passes decryption, or an attacker can burn counters with
//!   garbage datagrams
//!
//! ## Last Modified
//! v0.1.0 - Initial replay window

// ============================================
// ReplayWindow
// ============================================

/// Size of the sliding window in packets.
pub const WINDOW_SIZE: u64 = 64;

/// 64-slot sliding-bitmap replay detector over packet counters.
#[derive(Debug, Default, Clone)]
pub struct ReplayWindow {
    highest: u64,
    bitmap: u64,
    initialized: bool,
}

impl ReplayWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the highest admitted counter.
    #[must_use]
    pub const fn highest(&self) -> u64 {
        self.highest
    }

    /// Checks whether `counter` would be admitted, without mutating.
    #[must_use]
    pub fn check(&self, counter: u64) -> bool {
        if !self.initialized {
            return true;
        }

        // Too old: at or below the window's lower edge
        if counter + WINDOW_SIZE <= self.highest {
            return false;
        }

        if counter > self.highest {
            return true;
        }

        if counter == self.highest {
            return false;
        }

        let diff = self.highest - counter - 1;
        (self.bitmap & (1u64 << diff)) == 0
    }

    /// Records `counter` as seen. Call only after `check` admitted it.
    pub fn update(&mut self, counter: u64) {
        if !self.initialized {
            self.highest = counter;
            self.bitmap = 0;
            self.initialized = true;
            return;
        }

        if counter > self.highest {
            let shift = counter - self.highest;
            if shift >= WINDOW_SIZE {
                self.bitmap = 0;
            } else {
                // Shift and mark the old highest in the bitmap
                self.bitmap = (self.bitmap << shift) | (1u64 << (shift - 1));
            }
            self.highest = counter;
        } else if counter < self.highest {
            let diff = self.highest - counter - 1;
            if diff < WINDOW_SIZE {
                self.bitmap |= 1u64 << diff;
            }
        }
    }

    /// Checks and, if admitted, records `counter` in one call.
    pub fn check_and_update(&mut self, counter: u64) -> bool {
        if !self.check(counter) {
            return false;
        }
        self.update(counter);
        true
    }

    /// Clears all state (used across session rotation).
    pub fn reset(&mut self) {
        self.highest = 0;
        self.bitmap = 0;
        self.initialized = false;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_packet_accepted() {
        let mut window = ReplayWindow::new();
        assert!(window.check(1));
        window.update(1);
        assert_eq!(window.highest(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut window = ReplayWindow::new();
        assert!(window.check_and_update(1));
        assert!(!window.check(1));
    }

    #[test]
    fn test_in_order_accepted() {
        let mut window = ReplayWindow::new();
        for counter in 1..=10 {
            assert!(window.check_and_update(counter));
        }
        assert_eq!(window.highest(), 10);
    }

    #[test]
    fn test_out_of_order_within_window() {
        let mut window = ReplayWindow::new();
        window.check_and_update(10);

        for counter in 1..10 {
            assert!(window.check_and_update(counter), "counter {counter}");
        }
        // Each admitted exactly once
        for counter in 1..=10 {
            assert!(!window.check(counter), "counter {counter} replayed");
        }
    }

    #[test]
    fn test_too_old_rejected() {
        let mut window = ReplayWindow::new();
        window.check_and_update(100);

        // 100 - 64 = 36 is the lowest admissible counter
        assert!(!window.check(1));
        assert!(!window.check(36));
        assert!(window.check(37));
    }

    #[test]
    fn test_window_sliding() {
        let mut window = ReplayWindow::new();
        for counter in 1..=100 {
            assert!(window.check_and_update(counter));
        }

        assert!(!window.check(1));
        assert!(!window.check(35));
        assert!(!window.check(99));
        assert!(!window.check(100));
        assert!(window.check(101));
    }

    #[test]
    fn test_large_jump_clears_bitmap() {
        let mut window = ReplayWindow::new();
        window.check_and_update(1);
        window.check_and_update(1000);

        // Everything at or below 1000 - 64 is too old now
        assert!(!window.check(1));
        assert!(!window.check(936));
        // Fresh slots inside the new window admit once
        assert!(window.check_and_update(999));
        assert!(!window.check(999));
    }

    #[test]
    fn test_admitted_at_most_once_randomized_order() {
        let mut window = ReplayWindow::new();
        // Deterministic shuffle of 1..=64
        let counters: Vec<u64> = (1..=64).map(|i| (i * 37) % 64 + 1).collect();
        let mut admitted = std::collections::HashSet::new();

        for &counter in &counters {
            if window.check_and_update(counter) {
                assert!(admitted.insert(counter), "counter {counter} admitted twice");
            }
        }
        // Second pass: everything is a replay
        for &counter in &counters {
            assert!(!window.check(counter));
        }
    }

    #[test]
    fn test_reset() {
        let mut window = ReplayWindow::new();
        window.check_and_update(100);
        window.reset();
        assert!(window.check(1));
    }
}
