//! Enertrade Protocol -- wire message, field codec, stream framing.
//!
//! One TCP (or Unix) stream per buyer/seller negotiation session.
//! 4-byte big-endian length prefix + space-delimited ASCII fields.

pub mod codec;
pub mod messages;

pub use codec::MessageCodec;
pub use messages::*;

/// Number of positional fields in every frame.
pub const FIELD_COUNT: usize = 14;

/// Value a malformed numeric field decodes to in lenient mode.
pub const SENTINEL: i64 = -1;

/// Maximum frame payload in bytes. A full frame is well under 200 bytes.
pub const MAX_FRAME_BYTES: usize = 4096;

/// Range message identifiers are drawn from (non-authoritative).
pub const MESSAGE_ID_MIN: i64 = 10_000;
pub const MESSAGE_ID_MAX: i64 = 99_999;

/// Unit identifier of a seller or buyer.
pub type DeviceId = i64;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("wrong field count: expected {expected}, got {got}")]
    FieldCount { expected: usize, got: usize },
    #[error("malformed field {index} ({name}): {value:?}")]
    MalformedField {
        index: usize,
        name: &'static str,
        value: String,
    },
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("frame is not valid text")]
    NotText,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
