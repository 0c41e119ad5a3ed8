// ============================================
// File: crates/veil-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types specific to cryptographic operations and the
//! packet/frame wire format in the VEIL core crate.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - Convenience constructors and error classification helpers
//!
//! ## Error Categories
//! 1. **Crypto Errors**: Key exchange, derivation, encryption failures
//! 2. **Wire Errors**: Packet/frame parsing and validation errors
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - `Decryption` deliberately carries no detail: the failure reason
//!   must not be distinguishable to a network observer
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use veil_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for cryptographic and wire-format operations.
///
/// # Security Note
/// Error messages are designed to be informative for debugging
/// without revealing sensitive information like key material.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Key exchange produced a weak or invalid shared secret.
    #[error("Key exchange failed: {reason}")]
    KeyExchange {
        /// Why key exchange failed
        reason: String,
    },

    /// Key derivation failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Why derivation failed
        reason: String,
    },

    /// Encryption operation failed.
    #[error("Encryption failed: {context}")]
    Encryption {
        /// What was being encrypted
        context: String,
    },

    /// Decryption failed (authentication error).
    #[error("Decryption failed: authentication error")]
    Decryption,

    // ========================================
    // Wire Format Errors
    // ========================================

    /// Datagram is shorter than the minimum packet size.
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Unknown or unsupported frame type tag.
    #[error("Unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    /// Frame stream is malformed or truncated.
    #[error("Invalid frame: {reason}")]
    InvalidFrame {
        /// What's wrong with the frame stream
        reason: String,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from the common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `KeyExchange` error.
    pub fn key_exchange(reason: impl Into<String>) -> Self {
        Self::KeyExchange {
            reason: reason.into(),
        }
    }

    /// Creates a `KeyDerivation` error.
    pub fn key_derivation(reason: impl Into<String>) -> Self {
        Self::KeyDerivation {
            reason: reason.into(),
        }
    }

    /// Creates an `Encryption` error.
    pub fn encryption(context: impl Into<String>) -> Self {
        Self::Encryption {
            context: context.into(),
        }
    }

    /// Creates a `PacketTooShort` error.
    #[must_use]
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::PacketTooShort { expected, actual }
    }

    /// Creates an `InvalidFrame` error.
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this is a cryptographic error.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::KeyExchange { .. }
                | Self::KeyDerivation { .. }
                | Self::Encryption { .. }
                | Self::Decryption
        )
    }

    /// Returns `true` if this is a wire-format error.
    #[must_use]
    pub const fn is_wire_error(&self) -> bool {
        matches!(
            self,
            Self::PacketTooShort { .. } | Self::UnknownFrameType(_) | Self::InvalidFrame { .. }
        )
    }

    /// Returns `true` if this error might indicate an attack.
    ///
    /// These errors warrant additional logging/monitoring.
    #[must_use]
    pub const fn is_suspicious(&self) -> bool {
        matches!(self, Self::Decryption | Self::KeyExchange { .. })
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
        let err = CoreError::Decryption;
        assert_eq!(err.to_string(), "Decryption failed: authentication error");

        let err = CoreError::too_short(32, 12);
        assert!(err.to_string().contains("32"));
        assert!(err.to_string().contains("12"));
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::Decryption.is_crypto_error());
        assert!(CoreError::Decryption.is_suspicious());

        assert!(CoreError::UnknownFrameType(0xFF).is_wire_error());
        assert!(!CoreError::UnknownFrameType(0xFF).is_crypto_error());

        assert!(CoreError::too_short(32, 0).is_wire_error());
    }

    #[test]
    fn test_common_error_conversion() {
        let common = CommonError::invalid_input("field", "bad value");
        let core: CoreError = common.into();
        assert!(matches!(core, CoreError::Common(_)));
    }
}
