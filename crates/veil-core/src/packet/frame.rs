// ============================================
// File: crates/veil-core/src/packet/frame.rs
// ============================================
//! # Frame Codec
//!
//! ## Creation Reason
//! Defines the six frame variants carried inside a packet's encrypted
//! payload and their binary serialization.
//!
//! ## Wire Format
//! Every frame is a 4-byte header followed by a variant-specific body.
//! All multi-byte integers are big-endian.
//! ```text
//! ┌──────────┬──────────┬────────────────┬──────────────┐
//! │ type (1) │ flags(1) │ length (2, BE) │ body (length)│
//! └──────────┴──────────┴────────────────┴──────────────┘
//!
//! Data:          sequence (8) ∥ payload
//! Ack:           ack (8) ∥ bitmap (8) ∥ window (4)
//! Control:       subtype (1) ∥ timestamp (8) ∥ data
//! Fragment:      message_id (4) ∥ index (2) ∥ total (2) ∥ payload
//! Handshake:     stage (1) ∥ payload
//! SessionRotate: new_session_id (32) ∥ activation_sequence (8)
//! ```
//!
//! ## Parsing Strategy
//! Frames are parsed sequentially until the plaintext is exhausted.
//! Unknown type tags are rejected by the decoder, never coerced.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always validate buffer lengths before reading
//! - Fixed-size bodies (Ack, SessionRotate) are length-checked exactly;
//!   trailing bytes inside them are malformed input
//!
//! ## Last Modified
//! v0.1.0 - Initial frame codec

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Size of the frame header: type (1) + flags (1) + length (2).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Size of a SessionRotate body: session id (32) + activation (8).
const SESSION_ROTATE_BODY_SIZE: usize = 40;

/// Size of an Ack body: ack (8) + bitmap (8) + window (4).
const ACK_BODY_SIZE: usize = 20;

// ============================================
// Tag Enums
// ============================================

/// Frame type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Application data.
    Data = 0x01,
    /// Acknowledgment with SACK bitmap.
    Ack = 0x02,
    /// Control (ping/pong/close/reset).
    Control = 0x03,
    /// Fragment of a large message.
    Fragment = 0x04,
    /// Handshake envelope carrier.
    Handshake = 0x10,
    /// Session rotation signal.
    SessionRotate = 0x20,
}

impl FrameType {
    /// Parses a frame type from its wire tag.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Ack),
            0x03 => Some(Self::Control),
            0x04 => Some(Self::Fragment),
            0x10 => Some(Self::Handshake),
            0x20 => Some(Self::SessionRotate),
            _ => None,
        }
    }

    /// Returns the wire tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Control frame subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlType {
    /// Liveness probe.
    Ping = 0x01,
    /// Probe response echoing the ping timestamp.
    Pong = 0x02,
    /// Orderly close request.
    Close = 0x03,
    /// Abortive reset.
    Reset = 0x04,
}

impl ControlType {
    /// Parses a control subtype from its wire tag.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Ping),
            0x02 => Some(Self::Pong),
            0x03 => Some(Self::Close),
            0x04 => Some(Self::Reset),
            _ => None,
        }
    }

    /// Returns the wire tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Handshake message stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeStage {
    /// Initiator's opening message.
    Init = 0x01,
    /// Responder's reply.
    Response = 0x02,
    /// Initiator's confirmation.
    Finish = 0x03,
}

impl HandshakeStage {
    /// Parses a handshake stage from its wire tag.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Init),
            0x02 => Some(Self::Response),
            0x03 => Some(Self::Finish),
            _ => None,
        }
    }

    /// Returns the wire tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

// ============================================
// Frame
// ============================================

/// A tagged frame within a packet's encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Reliable application data.
    Data {
        /// Sequence number, contiguous from 1.
        sequence: u64,
        /// Opaque payload bytes.
        payload: Vec<u8>,
    },
    /// Acknowledgment with selective-ACK bitmap.
    Ack {
        /// Highest contiguous acknowledged sequence.
        ack: u64,
        /// Bitmap covering the 64 sequences after `ack`.
        bitmap: u64,
        /// Advertised receive window.
        window: u32,
    },
    /// Control message.
    Control {
        /// Subtype.
        control: ControlType,
        /// Sender timestamp (milliseconds).
        timestamp: u64,
        /// Optional opaque payload.
        data: Vec<u8>,
    },
    /// Fragment of a message larger than the path MTU.
    Fragment {
        /// Identifier of the fragmented message.
        message_id: u32,
        /// Zero-based fragment index.
        index: u16,
        /// Total fragment count.
        total: u16,
        /// Payload chunk.
        payload: Vec<u8>,
    },
    /// Handshake envelope carrier.
    Handshake {
        /// Handshake stage.
        stage: HandshakeStage,
        /// Opaque handshake envelope bytes.
        payload: Vec<u8>,
    },
    /// Session rotation announcement.
    SessionRotate {
        /// The 32-byte id of the next session.
        new_session_id: [u8; 32],
        /// Sequence at which the new session activates.
        activation_sequence: u64,
    },
}

impl Frame {
    /// Returns the frame's type tag.
    #[must_use]
    pub const fn frame_type(&self) -> FrameType {
        match self {
            Self::Data { .. } => FrameType::Data,
            Self::Ack { .. } => FrameType::Ack,
            Self::Control { .. } => FrameType::Control,
            Self::Fragment { .. } => FrameType::Fragment,
            Self::Handshake { .. } => FrameType::Handshake,
            Self::SessionRotate { .. } => FrameType::SessionRotate,
        }
    }

    /// Returns the body length in bytes.
    #[must_use]
    pub fn body_len(&self) -> usize {
        match self {
            Self::Data { payload, .. } => 8 + payload.len(),
            Self::Ack { .. } => ACK_BODY_SIZE,
            Self::Control { data, .. } => 1 + 8 + data.len(),
            Self::Fragment { payload, .. } => 4 + 2 + 2 + payload.len(),
            Self::Handshake { payload, .. } => 1 + payload.len(),
            Self::SessionRotate { .. } => SESSION_ROTATE_BODY_SIZE,
        }
    }

    /// Returns the full encoded length including the frame header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.body_len()
    }

    /// Encodes the frame into `buf`.
    ///
    /// # Errors
    /// Returns `InvalidFrame` if the body exceeds the 16-bit length
    /// field (cannot happen for frames sized by the packet builder).
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let body_len = self.body_len();
        let length = u16::try_from(body_len)
            .map_err(|_| CoreError::invalid_frame("frame body exceeds 65535 bytes"))?;

        buf.reserve(FRAME_HEADER_SIZE + body_len);
        buf.put_u8(self.frame_type().as_byte());
        buf.put_u8(0); // flags, reserved
        buf.put_u16(length);

        match self {
            Self::Data { sequence, payload } => {
                buf.put_u64(*sequence);
                buf.put_slice(payload);
            }
            Self::Ack {
                ack,
                bitmap,
                window,
            } => {
                buf.put_u64(*ack);
                buf.put_u64(*bitmap);
                buf.put_u32(*window);
            }
            Self::Control {
                control,
                timestamp,
                data,
            } => {
                buf.put_u8(control.as_byte());
                buf.put_u64(*timestamp);
                buf.put_slice(data);
            }
            Self::Fragment {
                message_id,
                index,
                total,
                payload,
            } => {
                buf.put_u32(*message_id);
                buf.put_u16(*index);
                buf.put_u16(*total);
                buf.put_slice(payload);
            }
            Self::Handshake { stage, payload } => {
                buf.put_u8(stage.as_byte());
                buf.put_slice(payload);
            }
            Self::SessionRotate {
                new_session_id,
                activation_sequence,
            } => {
                buf.put_slice(new_session_id);
                buf.put_u64(*activation_sequence);
            }
        }

        Ok(())
    }

    /// Decodes one frame from the front of `data`.
    ///
    /// # Returns
    /// The frame and the number of bytes consumed.
    ///
    /// # Errors
    /// - `InvalidFrame`: truncated header, truncated or malformed body
    /// - `UnknownFrameType`: unrecognized type tag
    pub fn decode_one(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(CoreError::invalid_frame("truncated frame header"));
        }

        let frame_type =
            FrameType::from_byte(data[0]).ok_or(CoreError::UnknownFrameType(data[0]))?;
        // data[1] is the flags byte, reserved zero; tolerated on ingress.
        let length = usize::from(u16::from_be_bytes([data[2], data[3]]));

        if data.len() < FRAME_HEADER_SIZE + length {
            return Err(CoreError::invalid_frame("frame body exceeds remaining bytes"));
        }

        let mut body = &data[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + length];
        let consumed = FRAME_HEADER_SIZE + length;

        let frame = match frame_type {
            FrameType::Data => {
                if body.len() < 8 {
                    return Err(CoreError::invalid_frame("data frame shorter than sequence"));
                }
                let sequence = body.get_u64();
                Self::Data {
                    sequence,
                    payload: body.to_vec(),
                }
            }
            FrameType::Ack => {
                if body.len() != ACK_BODY_SIZE {
                    return Err(CoreError::invalid_frame("ack frame body must be 20 bytes"));
                }
                Self::Ack {
                    ack: body.get_u64(),
                    bitmap: body.get_u64(),
                    window: body.get_u32(),
                }
            }
            FrameType::Control => {
                if body.len() < 9 {
                    return Err(CoreError::invalid_frame("control frame shorter than header"));
                }
                let subtype = body.get_u8();
                let control = ControlType::from_byte(subtype)
                    .ok_or_else(|| CoreError::invalid_frame("unknown control subtype"))?;
                let timestamp = body.get_u64();
                Self::Control {
                    control,
                    timestamp,
                    data: body.to_vec(),
                }
            }
            FrameType::Fragment => {
                if body.len() < 8 {
                    return Err(CoreError::invalid_frame("fragment frame shorter than header"));
                }
                let message_id = body.get_u32();
                let index = body.get_u16();
                let total = body.get_u16();
                Self::Fragment {
                    message_id,
                    index,
                    total,
                    payload: body.to_vec(),
                }
            }
            FrameType::Handshake => {
                if body.is_empty() {
                    return Err(CoreError::invalid_frame("handshake frame missing stage"));
                }
                let stage_byte = body.get_u8();
                let stage = HandshakeStage::from_byte(stage_byte)
                    .ok_or_else(|| CoreError::invalid_frame("unknown handshake stage"))?;
                Self::Handshake {
                    stage,
                    payload: body.to_vec(),
                }
            }
            FrameType::SessionRotate => {
                if body.len() != SESSION_ROTATE_BODY_SIZE {
                    return Err(CoreError::invalid_frame(
                        "session-rotate frame body must be 40 bytes",
                    ));
                }
                let mut new_session_id = [0u8; 32];
                body.copy_to_slice(&mut new_session_id);
                Self::SessionRotate {
                    new_session_id,
                    activation_sequence: body.get_u64(),
                }
            }
        };

        Ok((frame, consumed))
    }
}

// ============================================
// Frame Stream Parsing
// ============================================

/// Parses a sequence of frames consuming the entire plaintext.
///
/// # Errors
/// - `InvalidFrame`: empty plaintext, truncated frame, or malformed body
/// - `UnknownFrameType`: unrecognized type tag anywhere in the stream
pub fn parse_frames(plaintext: &[u8]) -> Result<Vec<Frame>> {
    if plaintext.is_empty() {
        return Err(CoreError::invalid_frame("empty frame stream"));
    }

    let mut frames = Vec::new();
    let mut rest = plaintext;

    while !rest.is_empty() {
        let (frame, consumed) = Frame::decode_one(rest)?;
        frames.push(frame);
        rest = &rest[consumed..];
    }

    Ok(frames)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: &Frame) -> Frame {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), frame.encoded_len());

        let (decoded, consumed) = Frame::decode_one(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        decoded
    }

    #[test]
    fn test_data_roundtrip() {
        let frame = Frame::Data {
            sequence: 42,
            payload: b"Hello, World!".to_vec(),
        };
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_data_empty_payload_roundtrip() {
        let frame = Frame::Data {
            sequence: 1,
            payload: Vec::new(),
        };
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_ack_roundtrip() {
        let frame = Frame::Ack {
            ack: 1000,
            bitmap: 0xDEAD_BEEF_CAFE_F00D,
            window: 65536,
        };
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_control_roundtrip() {
        for control in [
            ControlType::Ping,
            ControlType::Pong,
            ControlType::Close,
            ControlType::Reset,
        ] {
            let frame = Frame::Control {
                control,
                timestamp: 123_456_789,
                data: vec![1, 2, 3],
            };
            assert_eq!(roundtrip(&frame), frame);
        }
    }

    #[test]
    fn test_fragment_roundtrip() {
        let frame = Frame::Fragment {
            message_id: 7,
            index: 2,
            total: 5,
            payload: vec![0xAB; 100],
        };
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_handshake_roundtrip() {
        let frame = Frame::Handshake {
            stage: HandshakeStage::Init,
            payload: vec![0x55; 75],
        };
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_session_rotate_roundtrip() {
        let frame = Frame::SessionRotate {
            new_session_id: [0x33; 32],
            activation_sequence: 9999,
        };
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_wire_layout_big_endian() {
        let frame = Frame::Data {
            sequence: 0x0102_0304_0506_0708,
            payload: vec![0xFF],
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();

        assert_eq!(buf[0], 0x01); // type
        assert_eq!(buf[1], 0x00); // flags
        assert_eq!(&buf[2..4], &[0x00, 0x09]); // length = 9
        assert_eq!(
            &buf[4..12],
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
        assert_eq!(buf[12], 0xFF);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = [0xFFu8, 0x00, 0x00, 0x00];
        let result = Frame::decode_one(&raw);
        assert!(matches!(result, Err(CoreError::UnknownFrameType(0xFF))));
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(Frame::decode_one(&[0x01, 0x00]).is_err());
    }

    #[test]
    fn test_truncated_body_rejected() {
        // Claims a 10-byte body but provides 2
        let raw = [0x01u8, 0x00, 0x00, 0x0A, 0xAA, 0xBB];
        assert!(Frame::decode_one(&raw).is_err());
    }

    #[test]
    fn test_ack_trailing_bytes_rejected() {
        let frame = Frame::Ack {
            ack: 1,
            bitmap: 0,
            window: 0,
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();

        // Forge a 21-byte ack body
        let mut raw = buf.to_vec();
        raw[3] = 21;
        raw.push(0x00);
        assert!(Frame::decode_one(&raw).is_err());
    }

    #[test]
    fn test_parse_frames_multiple() {
        let frames = vec![
            Frame::Data {
                sequence: 1,
                payload: b"abc".to_vec(),
            },
            Frame::Ack {
                ack: 5,
                bitmap: 0b101,
                window: 128,
            },
        ];

        let mut buf = BytesMut::new();
        for frame in &frames {
            frame.encode(&mut buf).unwrap();
        }

        let parsed = parse_frames(&buf).unwrap();
        assert_eq!(parsed, frames);
    }

    #[test]
    fn test_parse_frames_empty_rejected() {
        assert!(parse_frames(&[]).is_err());
    }

    #[test]
    fn test_parse_frames_trailing_garbage_rejected() {
        let frame = Frame::Data {
            sequence: 1,
            payload: b"abc".to_vec(),
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        buf.put_slice(&[0x00, 0x01]); // not a valid frame header

        assert!(parse_frames(&buf).is_err());
    }
}
