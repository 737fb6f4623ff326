//! Length-prefixed framing.
//!
//! Each frame on the wire is a little-endian u32 length followed by that many
//! bytes of an encoded [`Packet`].

use bytes::{Buf, BufMut, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};
use crate::proto::Packet;

/// Default upper bound on a single frame body: 10 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Packet codec with a configurable frame size limit.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Overrides the frame size limit.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Decoder for FrameCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LEN_PREFIX];
        prefix.copy_from_slice(&src[..LEN_PREFIX]);
        let body_len = u32::from_le_bytes(prefix) as usize;

        if body_len == 0 {
            return Err(Error::ZeroLengthFrame);
        }
        if body_len > self.max_frame_len {
            return Err(Error::FrameTooLarge(body_len, self.max_frame_len));
        }

        if src.len() < LEN_PREFIX + body_len {
            src.reserve(LEN_PREFIX + body_len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let body = src.split_to(body_len).freeze();
        Ok(Some(Packet::decode(body)?))
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, pkt: Packet, dst: &mut BytesMut) -> Result<()> {
        let body_len = pkt.encoded_len();
        if body_len > self.max_frame_len {
            return Err(Error::FrameTooLarge(body_len, self.max_frame_len));
        }

        dst.reserve(LEN_PREFIX + body_len);
        dst.put_u32_le(body_len as u32);
        pkt.encode(dst)?;
        Ok(())
    }
}
