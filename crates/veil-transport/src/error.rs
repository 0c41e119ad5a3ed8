// ============================================
// File: crates/veil-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types for socket setup, configuration validation,
//! and the application-facing send surface.
//!
//! ## Propagation Policy
//! Per-datagram parse and crypto failures are recovered locally
//! (drop + statistic) and never surface here; socket and
//! configuration errors surface at `start`; state-violating sends
//! return a failure to the caller.
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::net::SocketAddr;

use thiserror::Error;

use veil_common::error::CommonError;
use veil_core::error::CoreError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport-level error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Socket Errors
    // ========================================

    /// Address could not be parsed.
    #[error("Invalid address: {addr}")]
    InvalidAddress {
        /// The offending address string
        addr: String,
    },

    /// Socket bind failed.
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// I/O operation failed.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What operation was being performed
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    // ========================================
    // State & Admission Errors
    // ========================================

    /// The session has not been started.
    #[error("Session not started")]
    NotStarted,

    /// The session was already started.
    #[error("Session already started")]
    AlreadyStarted,

    /// Send attempted while not connected.
    #[error("Session not connected")]
    NotConnected,

    /// The rate limiter rejected the packet.
    #[error("Rate limited")]
    RateLimited,

    /// The unacked-packet caps are exhausted.
    #[error("Send window full: too many unacknowledged packets")]
    SendWindowFull,

    /// Payload cannot be fragmented within the configured limits.
    #[error("Payload too large: {actual} bytes exceeds {max}")]
    PayloadTooLarge {
        /// Largest sendable payload
        max: usize,
        /// Offered payload size
        actual: usize,
    },

    /// Handshake failed terminally.
    #[error("Handshake failed: {0}")]
    Handshake(#[from] veil_core::handshake::HandshakeError),

    // ========================================
    // Configuration Errors
    // ========================================

    /// Configuration value rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from the common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::NotConnected;
        assert_eq!(err.to_string(), "Session not connected");

        let err = TransportError::invalid_config("mtu below 576");
        assert!(err.to_string().contains("mtu"));
    }

    #[test]
    fn test_core_error_conversion() {
        let core = CoreError::Decryption;
        let transport: TransportError = core.into();
        assert!(matches!(transport, TransportError::Core(_)));
    }
}
