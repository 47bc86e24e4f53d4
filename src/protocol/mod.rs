//! Wire protocol shared by the emulator, the stream reader and the relay.
//!
//! Every packet is a big-endian header followed by a body:
//!
//! ```text
//! totalSize: u32   (header included)
//! type:      u32   (0 error, 1 command, 2 parameters, 3 data frame, 4 no data, 5 blob)
//! body:      totalSize - 8 bytes
//! ```
//!
//! Text bodies are ASCII without a terminator. Data-frame bodies are described in
//! [`dataframe`].
//!
//! ```rust
//! use emarelay::protocol::{Message, PacketType, decode, encode};
//!
//! let bytes = encode(b"sendcurrentframe", PacketType::Command);
//! assert_eq!(&bytes[..8], &[0, 0, 0, 0x18, 0, 0, 0, 1]);
//! assert_eq!(decode(&bytes).unwrap(), Message::Command("sendcurrentframe".into()));
//! ```

mod codec;
mod command;
pub mod dataframe;
mod packet;

pub use codec::{Inbound, PacketCodec};
pub use command::{BaseCommand, StreamRequest};
pub use dataframe::{decode_frame, encode_frame};
pub use packet::{HEADER_LEN, MAX_PACKET_LEN, Message, Packet, PacketType, decode, decode_header, encode};
