//! Length-delimited codec for negotiation streams.
//!
//! Wire format: 4-byte big-endian length prefix + ASCII frame from
//! [`WireMessage::encode`]. TCP may split or coalesce writes; the decoder
//! only yields a message once its whole frame is buffered.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::WireMessage;
use crate::{ProtocolError, MAX_FRAME_BYTES};

/// Length prefix size in bytes.
const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for framing WireMessage values over a byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec {
    strict: bool,
}

impl MessageCodec {
    /// Malformed numeric fields decode to the -1 sentinel.
    pub fn lenient() -> Self {
        Self { strict: false }
    }

    /// Malformed numeric fields are a decode error.
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

impl Decoder for MessageCodec {
    type Item = WireMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the length
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_BYTES,
            });
        }

        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let frame_bytes = src.split_to(length);

        let frame = std::str::from_utf8(&frame_bytes).map_err(|_| ProtocolError::NotText)?;
        let message = if self.strict {
            WireMessage::decode_strict(frame)?
        } else {
            WireMessage::decode(frame)?
        };
        Ok(Some(message))
    }
}

impl Encoder<WireMessage> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = item.encode();

        if frame.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_BYTES,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + frame.len());
        dst.put_u32(frame.len() as u32);
        dst.extend_from_slice(frame.as_bytes());

        Ok(())
    }
}
