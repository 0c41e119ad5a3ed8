// ============================================
// File: crates/veil-mux/src/lib.rs
// ============================================
//! # VEIL Mux - Multiplexing Subsystem
//!
//! ## Creation Reason
//! Groups the per-session bookkeeping components that sit between the
//! packet codec and the application: replay defense, acknowledgment
//! tracking, ordering, fragmentation, admission control, loss recovery,
//! and key-rotation budgets.
//!
//! ## Main Functionality
//! - [`replay`]: 64-slot sliding window over packet counters
//! - [`ack`]: highest-contiguous + SACK bitmap bookkeeping
//! - [`reorder`]: out-of-order buffering with in-order delivery
//! - [`fragment`]: reassembly of messages larger than the MTU
//! - [`rate`]: dual token-bucket admission (packets + bytes)
//! - [`retransmit`]: unacked store, RFC 6298 RTT/RTO, Karn's rule
//! - [`rotate`]: session-id generation and rotation budgets
//!
//! ## Design Notes
//! Every component is single-threaded, lock-free, and driven by
//! explicit time arguments; the transport session is the only caller
//! and owns all of them by value. Admission failures are values plus
//! statistics counters, never panics or errors.
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod ack;
pub mod fragment;
pub mod rate;
pub mod reorder;
pub mod replay;
pub mod retransmit;
pub mod rotate;

pub use ack::AckBitmap;
pub use fragment::{FragmentAssembler, FragmentAssemblerConfig, FragmentOutcome};
pub use rate::{RateLimiter, RateLimiterConfig};
pub use reorder::{ReorderBuffer, ReorderBufferConfig};
pub use replay::ReplayWindow;
pub use retransmit::{RetransmissionConfig, RetransmissionManager};
pub use rotate::{SessionRotator, SessionRotatorConfig};
