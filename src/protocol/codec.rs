//! Stream framing for [`tokio_util::codec::Framed`].

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::packet::{HEADER_LEN, MAX_PACKET_LEN, Packet, decode_header};
use crate::error::{RelayError, Result};

/// Item produced by [`PacketCodec`].
///
/// A bad header is reported in-band so the connection keeps reading; returning `Err` from a
/// decoder would end the framed stream.
#[derive(Debug)]
pub enum Inbound {
    Packet(Packet),
    /// The 8 header bytes were discarded.
    Malformed(RelayError),
}

/// Length-prefixed packet codec.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_len: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self { max_len: MAX_PACKET_LEN }
    }

    /// Codec rejecting packets larger than `max_len` bytes.
    pub fn with_max_len(max_len: usize) -> Self {
        Self { max_len: max_len.max(HEADER_LEN) }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Inbound;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        let Some((size, kind)) = decode_header(src) else {
            return Ok(None);
        };
        let size = size as usize;
        if !(HEADER_LEN..=self.max_len).contains(&size) {
            src.advance(HEADER_LEN);
            return Ok(Some(Inbound::Malformed(RelayError::format_error(
                "packet header",
                format!("declared size {size} outside {HEADER_LEN}..={}", self.max_len),
            ))));
        }
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }
        let mut packet = src.split_to(size);
        packet.advance(HEADER_LEN);
        Ok(Some(Inbound::Packet(Packet { kind, body: packet.freeze() })))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = RelayError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        let total = HEADER_LEN + item.body.len();
        if total > self.max_len {
            return Err(RelayError::format_error(
                "packet encode",
                format!("{total} bytes exceeds limit {}", self.max_len),
            ));
        }
        dst.reserve(total);
        dst.put_u32(total as u32);
        dst.put_u32(item.kind.code());
        dst.extend_from_slice(&item.body);
        Ok(())
    }
}
