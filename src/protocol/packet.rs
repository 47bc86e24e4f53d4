//! Packet envelope and typed message view.

use bytes::{BufMut, Bytes, BytesMut};

use super::dataframe::{decode_frame, encode_frame};
use crate::error::{RelayError, Result};
use crate::types::DataFrame;

/// Size of the `totalSize | type` header.
pub const HEADER_LEN: usize = 8;

/// Largest packet either side accepts.
pub const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

/// Packet type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// 0: ASCII error text.
    Error,
    /// 1: ASCII command or acknowledgement.
    Command,
    /// 2: ASCII parameter XML.
    Parameters,
    /// 3: binary data frame.
    DataFrame,
    /// 4: ASCII no-data notice.
    NoData,
    /// 5: opaque binary payload.
    Blob,
    /// Any other code, kept so it can be routed and reported.
    Unknown(u32),
}

impl PacketType {
    pub const fn code(self) -> u32 {
        match self {
            PacketType::Error => 0,
            PacketType::Command => 1,
            PacketType::Parameters => 2,
            PacketType::DataFrame => 3,
            PacketType::NoData => 4,
            PacketType::Blob => 5,
            PacketType::Unknown(code) => code,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        match code {
            0 => PacketType::Error,
            1 => PacketType::Command,
            2 => PacketType::Parameters,
            3 => PacketType::DataFrame,
            4 => PacketType::NoData,
            5 => PacketType::Blob,
            other => PacketType::Unknown(other),
        }
    }
}

/// One framed packet with its body still undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub body: Bytes,
}

impl Packet {
    pub fn new(kind: PacketType, body: impl Into<Bytes>) -> Self {
        Self { kind, body: body.into() }
    }

    /// Text packet of the given type.
    pub fn text(kind: PacketType, text: &str) -> Self {
        Self::new(kind, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn command(text: &str) -> Self {
        Self::text(PacketType::Command, text)
    }

    pub fn error(text: &str) -> Self {
        Self::text(PacketType::Error, text)
    }

    pub fn no_data(text: &str) -> Self {
        Self::text(PacketType::NoData, text)
    }

    /// Body as text, with trailing NUL padding and line endings removed.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim_end_matches(['\0', '\r', '\n', ' ', '\t']).to_string()
    }

    /// Full wire bytes, header included.
    pub fn to_bytes(&self) -> Bytes {
        encode(&self.body, self.kind).into()
    }
}

/// Decoded packet content.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Error(String),
    Command(String),
    Parameters(String),
    Frame(DataFrame),
    NoData(String),
    Blob(Bytes),
    Unknown { code: u32, body: Bytes },
}

impl Message {
    /// Interpret a packet body according to its type.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        Ok(match packet.kind {
            PacketType::Error => Message::Error(packet.body_text()),
            PacketType::Command => Message::Command(packet.body_text()),
            PacketType::Parameters => Message::Parameters(packet.body_text()),
            PacketType::DataFrame => Message::Frame(decode_frame(&packet.body)?),
            PacketType::NoData => Message::NoData(packet.body_text()),
            PacketType::Blob => Message::Blob(packet.body.clone()),
            PacketType::Unknown(code) => Message::Unknown { code, body: packet.body.clone() },
        })
    }

    pub fn kind(&self) -> PacketType {
        match self {
            Message::Error(_) => PacketType::Error,
            Message::Command(_) => PacketType::Command,
            Message::Parameters(_) => PacketType::Parameters,
            Message::Frame(_) => PacketType::DataFrame,
            Message::NoData(_) => PacketType::NoData,
            Message::Blob(_) => PacketType::Blob,
            Message::Unknown { code, .. } => PacketType::Unknown(*code),
        }
    }

    pub fn to_packet(&self) -> Result<Packet> {
        let body = match self {
            Message::Error(text)
            | Message::Command(text)
            | Message::Parameters(text)
            | Message::NoData(text) => Bytes::copy_from_slice(text.as_bytes()),
            Message::Frame(frame) => encode_frame(frame)?,
            Message::Blob(body) | Message::Unknown { body, .. } => body.clone(),
        };
        Ok(Packet::new(self.kind(), body))
    }
}

/// Wrap a body in the `totalSize | type` header.
pub fn encode(body: &[u8], kind: PacketType) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_u32((HEADER_LEN + body.len()) as u32);
    out.put_u32(kind.code());
    out.put_slice(body);
    out.to_vec()
}

/// Read the header, `None` with fewer than 8 bytes available.
pub fn decode_header(bytes: &[u8]) -> Option<(u32, PacketType)> {
    let header: &[u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let code = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    Some((size, PacketType::from_code(code)))
}

/// Decode one complete packet.
///
/// The declared size must equal the number of bytes given.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let (size, kind) = decode_header(bytes).ok_or_else(|| {
        RelayError::format_error("packet header", format!("{} bytes, need {HEADER_LEN}", bytes.len()))
    })?;
    if size as usize != bytes.len() {
        return Err(RelayError::format_error(
            "packet header",
            format!("declared size {size} but {} bytes present", bytes.len()),
        ));
    }
    let packet = Packet::new(kind, Bytes::copy_from_slice(&bytes[HEADER_LEN..]));
    Message::from_packet(&packet)
}
