// ============================================
// File: crates/veil-mux/src/rate.rs
// ============================================
//! # Rate Limiter
//!
//! ## Creation Reason
//! Dual token-bucket admission control over the send path: one bucket
//! counts packets, the other bytes, each with its own burst capacity.
//!
//! ## Refill Law
//! `refill(elapsed_ms)` adds `rate * elapsed_ms / 1000` tokens to each
//! bucket, capped at its burst size. Integer arithmetic: sub-token
//! remainders are dropped, so callers should refill on a coarse tick.
//!
//! ## Last Modified
//! v0.1.0 - Initial token-bucket limiter

// ============================================
// Configuration
// ============================================

/// Token-bucket rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Sustained packet rate.
    pub packets_per_second: u64,
    /// Sustained byte rate.
    pub bytes_per_second: u64,
    /// Maximum packet burst.
    pub burst_packets: u64,
    /// Maximum byte burst.
    pub burst_bytes: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            packets_per_second: 10_000,
            bytes_per_second: 100_000_000,
            burst_packets: 100,
            burst_bytes: 1_000_000,
        }
    }
}

// ============================================
// RateLimiter
// ============================================

/// Dual token bucket (packets + bytes) with burst caps.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    packet_tokens: u64,
    byte_tokens: u64,
    last_refill_ms: Option<u64>,

    packets_dropped: u64,
    bytes_dropped: u64,
}

impl RateLimiter {
    /// Creates a limiter with both buckets full.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            packet_tokens: config.burst_packets,
            byte_tokens: config.burst_bytes,
            config,
            last_refill_ms: None,
            packets_dropped: 0,
            bytes_dropped: 0,
        }
    }

    /// Returns the available packet tokens.
    #[must_use]
    pub const fn packet_tokens(&self) -> u64 {
        self.packet_tokens
    }

    /// Returns the available byte tokens.
    #[must_use]
    pub const fn byte_tokens(&self) -> u64 {
        self.byte_tokens
    }

    /// Returns the count of rejected packets.
    #[must_use]
    pub const fn packets_dropped(&self) -> u64 {
        self.packets_dropped
    }

    /// Returns the bytes of rejected packets.
    #[must_use]
    pub const fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }

    /// Returns `true` if one packet of `bytes` would be admitted.
    #[must_use]
    pub fn check(&self, bytes: usize) -> bool {
        self.packet_tokens >= 1 && self.byte_tokens >= bytes as u64
    }

    /// Attempts to admit one packet of `bytes`.
    ///
    /// On rejection the drop counters are incremented.
    pub fn try_consume(&mut self, bytes: usize) -> bool {
        if !self.check(bytes) {
            self.packets_dropped += 1;
            self.bytes_dropped += bytes as u64;
            return false;
        }
        self.packet_tokens -= 1;
        self.byte_tokens -= bytes as u64;
        true
    }

    /// Adds tokens for `elapsed_ms` of wall time, capped at burst.
    pub fn refill(&mut self, elapsed_ms: u64) {
        if elapsed_ms == 0 {
            return;
        }

        let packet_add = self.config.packets_per_second * elapsed_ms / 1000;
        let byte_add = self.config.bytes_per_second * elapsed_ms / 1000;

        self.packet_tokens = (self.packet_tokens + packet_add).min(self.config.burst_packets);
        self.byte_tokens = (self.byte_tokens + byte_add).min(self.config.burst_bytes);
    }

    /// Refills based on the delta from the previous call's timestamp.
    pub fn refill_at(&mut self, now_ms: u64) {
        if let Some(last) = self.last_refill_ms {
            if now_ms > last {
                self.refill(now_ms - last);
            } else {
                return;
            }
        }
        self.last_refill_ms = Some(now_ms);
    }

    /// Restores both buckets to full and clears statistics.
    pub fn reset(&mut self) {
        self.packet_tokens = self.config.burst_packets;
        self.byte_tokens = self.config.burst_bytes;
        self.packets_dropped = 0;
        self.bytes_dropped = 0;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            packets_per_second: 100,
            bytes_per_second: 10_000,
            burst_packets: 10,
            burst_bytes: 1_000,
        })
    }

    #[test]
    fn test_initial_burst_allowed() {
        let mut limiter = limiter();
        for i in 0..10 {
            assert!(limiter.try_consume(50), "packet {i}");
        }
    }

    #[test]
    fn test_excess_packets_blocked() {
        let mut limiter = limiter();
        for _ in 0..10 {
            limiter.try_consume(50);
        }
        assert!(!limiter.try_consume(50));
        assert_eq!(limiter.packets_dropped(), 1);
        assert_eq!(limiter.bytes_dropped(), 50);
    }

    #[test]
    fn test_refill_restores_exactly_one_packet() {
        let mut limiter = limiter();
        for _ in 0..10 {
            limiter.try_consume(50);
        }
        assert!(!limiter.check(50));

        // 1000 / pps = 10 ms buys exactly one packet token
        limiter.refill(10);
        assert!(limiter.try_consume(50));
        assert!(!limiter.try_consume(50));
    }

    #[test]
    fn test_byte_bucket_blocks_large_packet() {
        let limiter = limiter();
        assert!(limiter.check(500));
        assert!(!limiter.check(2_000)); // exceeds burst_bytes
    }

    #[test]
    fn test_refill_caps_at_burst() {
        let mut limiter = limiter();
        limiter.refill(1_000_000);
        assert_eq!(limiter.packet_tokens(), 10);
        assert_eq!(limiter.byte_tokens(), 1_000);
    }

    #[test]
    fn test_refill_at_uses_delta() {
        let mut limiter = limiter();
        for _ in 0..10 {
            limiter.try_consume(50);
        }

        limiter.refill_at(1_000); // establishes the baseline
        assert_eq!(limiter.packet_tokens(), 0);

        limiter.refill_at(1_010); // 10 ms later: one token
        assert_eq!(limiter.packet_tokens(), 1);

        // Time going backwards adds nothing
        limiter.refill_at(500);
        assert_eq!(limiter.packet_tokens(), 1);
    }

    #[test]
    fn test_reset() {
        let mut limiter = limiter();
        for _ in 0..12 {
            limiter.try_consume(50);
        }
        limiter.reset();
        assert_eq!(limiter.packet_tokens(), 10);
        assert_eq!(limiter.packets_dropped(), 0);
    }
}
