// ============================================
// File: crates/veil-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Provides the two clocks the transport needs: Unix wall-clock seconds
//! for handshake timestamp validation, and a monotonic millisecond clock
//! for retransmission timers, token refill, and buffer expiry.
//!
//! ## Main Functionality
//! - `Timestamp`: Unix timestamp in seconds with skew checking
//! - `monotonic_ms`: milliseconds since process start, never goes backwards
//!
//! ## ⚠️ Important Note for Next Developer
//! - Timer-driven components (retransmission, reorder, fragments) take
//!   explicit millisecond arguments so tests can drive time by hand;
//!   `monotonic_ms` is only read at the session edge.
//! - The monotonic clock uses a lazily initialized reference `Instant`
//!   and wraps after ~584 million years of uptime.
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================
// Monotonic Clock
// ============================================

/// Reference instant (lazily initialized at first use).
fn reference() -> Instant {
    static REFERENCE: OnceLock<Instant> = OnceLock::new();
    *REFERENCE.get_or_init(Instant::now)
}

/// Returns milliseconds elapsed since process start.
///
/// Monotonic: unaffected by wall-clock adjustments.
#[must_use]
pub fn monotonic_ms() -> u64 {
    reference().elapsed().as_millis() as u64
}

// ============================================
// Timestamp
// ============================================

/// Unix timestamp in seconds.
///
/// # Purpose
/// Used in handshake envelopes for time-based validation and
/// replay resistance during the unauthenticated phase.
///
/// # Example
/// ```
/// use veil_common::time::Timestamp;
///
/// let now = Timestamp::now();
/// assert!(now.within_skew(Timestamp::now(), 30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a new timestamp from Unix seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Creates a timestamp for the current time.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System time before Unix epoch")
            .as_secs();
        Self(secs)
    }

    /// Returns the Unix timestamp in seconds.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Checks whether this timestamp is within `max_skew_secs` of `other`.
    #[must_use]
    pub const fn within_skew(&self, other: Timestamp, max_skew_secs: u64) -> bool {
        self.0.abs_diff(other.0) <= max_skew_secs
    }
}

impl From<u64> for Timestamp {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_decreases() {
        let a = monotonic_ms();
        let b = monotonic_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_timestamp_now_reasonable() {
        let ts = Timestamp::now();
        // After 2020, before 2100.
        assert!(ts.as_secs() > 1_577_836_800);
        assert!(ts.as_secs() < 4_102_444_800);
    }

    #[test]
    fn test_within_skew() {
        let base = Timestamp::from_secs(1_234_567_890);

        assert!(base.within_skew(Timestamp::from_secs(1_234_567_890), 0));
        assert!(base.within_skew(Timestamp::from_secs(1_234_567_950), 60));
        assert!(!base.within_skew(Timestamp::from_secs(1_234_567_951), 60));
        // Skew is symmetric
        assert!(base.within_skew(Timestamp::from_secs(1_234_567_830), 60));
        assert!(!base.within_skew(Timestamp::from_secs(1_234_567_829), 60));
    }
}
