// ============================================
// File: crates/veil-transport/src/config.rs
// ============================================
//! # Transport Configuration
//!
//! ## Creation Reason
//! Provides the full configuration surface of the transport session,
//! with TOML loading and validation.
//!
//! ## Configuration Sections
//! - `network`: bind address, optional peer address, MTU
//! - `handshake`: PSK (hex) and timestamp tolerance
//! - `rate`: token-bucket rates and bursts
//! - `reorder`: reorder buffer caps and flush delay
//! - `fragment`: reassembly caps and timeout
//! - `retransmission`: RTO bounds, retry budget, unacked caps
//! - `rotation`: per-session packet/byte/time budgets
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! bind_addr = "0.0.0.0:51820"
//! peer_addr = "203.0.113.7:51820"
//! mtu = 1400
//!
//! [handshake]
//! psk = "0000000000000000000000000000000000000000000000000000000000000000"
//!
//! [rate]
//! packets_per_second = 10000
//! bytes_per_second = 100000000
//!
//! [retransmission]
//! initial_rto_ms = 200
//! max_retries = 5
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Validate before `start`; a bad MTU or PSK must fail fast
//! - An absent `peer_addr` makes the session a responder
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use veil_common::error::CommonError;
use veil_core::handshake::{HandshakeConfig, PreSharedKey, PSK_SIZE};
use veil_mux::{
    FragmentAssemblerConfig, RateLimiterConfig, ReorderBufferConfig, RetransmissionConfig,
    SessionRotatorConfig,
};

use crate::error::{Result, TransportError};

// ============================================
// Constants
// ============================================

/// Smallest supported MTU (IPv4 minimum reassembly size).
pub const MIN_MTU: usize = 576;

/// Largest supported MTU (UDP length field ceiling).
pub const MAX_MTU: usize = 65_535;

// ============================================
// TransportConfig
// ============================================

/// Full transport session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkSettings,

    /// Handshake configuration.
    #[serde(default)]
    pub handshake: HandshakeSettings,

    /// Rate limiter configuration.
    #[serde(default)]
    pub rate: RateSettings,

    /// Reorder buffer configuration.
    #[serde(default)]
    pub reorder: ReorderSettings,

    /// Fragment assembler configuration.
    #[serde(default)]
    pub fragment: FragmentSettings,

    /// Retransmission configuration.
    #[serde(default)]
    pub retransmission: RetransmissionSettings,

    /// Session rotation configuration.
    #[serde(default)]
    pub rotation: RotationSettings,
}

impl TransportConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read, `InvalidConfig` if it
    /// cannot be parsed or fails validation.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TransportError::io("reading configuration file", e))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TransportError::invalid_config(format!("TOML parse error: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validates all settings.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.network.mtu < MIN_MTU || self.network.mtu > MAX_MTU {
            return Err(CommonError::out_of_range(self.network.mtu, MIN_MTU, MAX_MTU).into());
        }

        self.handshake.psk()?;

        if self.rate.burst_packets == 0 || self.rate.burst_bytes == 0 {
            return Err(TransportError::invalid_config("rate bursts must be nonzero"));
        }

        if self.retransmission.min_rto_ms > self.retransmission.max_rto_ms {
            return Err(TransportError::invalid_config(
                "min_rto_ms exceeds max_rto_ms",
            ));
        }

        if self.fragment.max_fragments_per_message == 0 {
            return Err(TransportError::invalid_config(
                "max_fragments_per_message must be nonzero",
            ));
        }

        Ok(())
    }
}

// ============================================
// NetworkSettings
// ============================================

/// Socket and path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Local bind address.
    pub bind_addr: SocketAddr,
    /// Peer address; absent means this side is a responder.
    pub peer_addr: Option<SocketAddr>,
    /// Path MTU in bytes.
    pub mtu: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 51820),
            peer_addr: None,
            mtu: 1400,
        }
    }
}

// ============================================
// HandshakeSettings
// ============================================

/// Handshake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeSettings {
    /// 32-byte PSK as 64 hex characters; all zeros means no PSK.
    pub psk: String,
    /// Maximum envelope timestamp skew in seconds.
    pub timestamp_tolerance_secs: u64,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            psk: "0".repeat(PSK_SIZE * 2),
            timestamp_tolerance_secs: 60,
        }
    }
}

impl HandshakeSettings {
    /// Decodes the configured PSK.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the hex string does not decode to
    /// exactly 32 bytes.
    pub fn psk(&self) -> Result<PreSharedKey> {
        let bytes = hex::decode(&self.psk)
            .map_err(|_| TransportError::invalid_config("psk is not valid hex"))?;
        let bytes: [u8; PSK_SIZE] = bytes
            .try_into()
            .map_err(|_| TransportError::invalid_config("psk must be 32 bytes (64 hex chars)"))?;
        Ok(PreSharedKey::from_bytes(bytes))
    }

    /// Builds the core handshake configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the PSK does not decode.
    pub fn to_handshake_config(&self) -> Result<HandshakeConfig> {
        Ok(HandshakeConfig {
            psk: self.psk()?,
            timestamp_tolerance_secs: self.timestamp_tolerance_secs,
        })
    }
}

// ============================================
// Mux Settings Sections
// ============================================

/// Token-bucket rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    /// Sustained packet rate.
    pub packets_per_second: u64,
    /// Sustained byte rate.
    pub bytes_per_second: u64,
    /// Packet burst cap.
    pub burst_packets: u64,
    /// Byte burst cap.
    pub burst_bytes: u64,
}

impl Default for RateSettings {
    fn default() -> Self {
        let defaults = RateLimiterConfig::default();
        Self {
            packets_per_second: defaults.packets_per_second,
            bytes_per_second: defaults.bytes_per_second,
            burst_packets: defaults.burst_packets,
            burst_bytes: defaults.burst_bytes,
        }
    }
}

impl From<&RateSettings> for RateLimiterConfig {
    fn from(settings: &RateSettings) -> Self {
        Self {
            packets_per_second: settings.packets_per_second,
            bytes_per_second: settings.bytes_per_second,
            burst_packets: settings.burst_packets,
            burst_bytes: settings.burst_bytes,
        }
    }
}

/// Reorder buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderSettings {
    /// Maximum buffered out-of-order packets.
    pub max_buffered_packets: usize,
    /// Maximum buffered bytes.
    pub max_buffered_bytes: usize,
    /// Gap-skip delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReorderSettings {
    fn default() -> Self {
        let defaults = ReorderBufferConfig::default();
        Self {
            max_buffered_packets: defaults.max_buffered_packets,
            max_buffered_bytes: defaults.max_buffered_bytes,
            max_delay_ms: defaults.max_delay_ms,
        }
    }
}

impl From<&ReorderSettings> for ReorderBufferConfig {
    fn from(settings: &ReorderSettings) -> Self {
        Self {
            max_buffered_packets: settings.max_buffered_packets,
            max_buffered_bytes: settings.max_buffered_bytes,
            max_delay_ms: settings.max_delay_ms,
        }
    }
}

/// Fragment assembler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentSettings {
    /// Maximum simultaneously pending messages.
    pub max_pending_messages: usize,
    /// Maximum fragments per message.
    pub max_fragments_per_message: u16,
    /// Maximum reassembled message size.
    pub max_message_size: usize,
    /// Partial-assembly timeout in milliseconds.
    pub fragment_timeout_ms: u64,
}

impl Default for FragmentSettings {
    fn default() -> Self {
        let defaults = FragmentAssemblerConfig::default();
        Self {
            max_pending_messages: defaults.max_pending_messages,
            max_fragments_per_message: defaults.max_fragments_per_message,
            max_message_size: defaults.max_message_size,
            fragment_timeout_ms: defaults.fragment_timeout_ms,
        }
    }
}

impl From<&FragmentSettings> for FragmentAssemblerConfig {
    fn from(settings: &FragmentSettings) -> Self {
        Self {
            max_pending_messages: settings.max_pending_messages,
            max_fragments_per_message: settings.max_fragments_per_message,
            max_message_size: settings.max_message_size,
            fragment_timeout_ms: settings.fragment_timeout_ms,
        }
    }
}

/// Retransmission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetransmissionSettings {
    /// RTO before the first RTT sample.
    pub initial_rto_ms: u64,
    /// Lower RTO clamp.
    pub min_rto_ms: u64,
    /// Upper RTO clamp.
    pub max_rto_ms: u64,
    /// Retransmissions before giving up.
    pub max_retries: u32,
    /// Maximum unacknowledged packets.
    pub max_unacked_packets: usize,
    /// Maximum unacknowledged bytes.
    pub max_unacked_bytes: usize,
    /// RTT smoothing factor (α).
    pub rtt_alpha: f64,
    /// RTT variance factor (β).
    pub rtt_beta: f64,
}

impl Default for RetransmissionSettings {
    fn default() -> Self {
        let defaults = RetransmissionConfig::default();
        Self {
            initial_rto_ms: defaults.initial_rto_ms,
            min_rto_ms: defaults.min_rto_ms,
            max_rto_ms: defaults.max_rto_ms,
            max_retries: defaults.max_retries,
            max_unacked_packets: defaults.max_unacked_packets,
            max_unacked_bytes: defaults.max_unacked_bytes,
            rtt_alpha: defaults.rtt_alpha,
            rtt_beta: defaults.rtt_beta,
        }
    }
}

impl From<&RetransmissionSettings> for RetransmissionConfig {
    fn from(settings: &RetransmissionSettings) -> Self {
        Self {
            initial_rto_ms: settings.initial_rto_ms,
            min_rto_ms: settings.min_rto_ms,
            max_rto_ms: settings.max_rto_ms,
            max_retries: settings.max_retries,
            max_unacked_packets: settings.max_unacked_packets,
            max_unacked_bytes: settings.max_unacked_bytes,
            rtt_alpha: settings.rtt_alpha,
            rtt_beta: settings.rtt_beta,
        }
    }
}

/// Session rotation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    /// Packet budget per session.
    pub packets_per_session: u64,
    /// Byte budget per session.
    pub bytes_per_session: u64,
    /// Time budget per session in seconds.
    pub seconds_per_session: u64,
}

impl Default for RotationSettings {
    fn default() -> Self {
        let defaults = SessionRotatorConfig::default();
        Self {
            packets_per_session: defaults.packets_per_session,
            bytes_per_session: defaults.bytes_per_session,
            seconds_per_session: defaults.seconds_per_session,
        }
    }
}

impl From<&RotationSettings> for SessionRotatorConfig {
    fn from(settings: &RotationSettings) -> Self {
        Self {
            packets_per_session: settings.packets_per_session,
            bytes_per_session: settings.bytes_per_session,
            seconds_per_session: settings.seconds_per_session,
        }
    }
}

// ============================================
// Tests
// ============================================
