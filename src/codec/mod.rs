//! Wire codec for the streaming protocol
//!
//! Pure byte-level encoding and decoding of [`Message`](crate::protocol::Message)s.
//! Reading frames off a socket lives in [`crate::network::transport`].

pub mod decoder;
pub mod encoder;

pub use decoder::{decode_header, decode_message, decode_payload, FrameHeader};
pub use encoder::{encode, encode_header, encode_message};

use crate::protocol::MessageType;

/// Header size: type tag (1 byte) + payload length (4 bytes, little-endian)
pub const HEADER_SIZE: usize = 5;

/// Largest SONG_DATA payload
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Largest payload of any other message type
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// SONG_INFO record: channels u16, sample rate u32, bits u16, data length u32
pub const SONG_INFO_SIZE: usize = 12;

/// PLAY_CONTROL record: command u8, seek position f64
pub const CONTROL_SIZE: usize = 9;

/// Largest payload a message of this type may carry
pub fn payload_limit(kind: MessageType) -> usize {
    match kind {
        MessageType::ListRequest | MessageType::SongDataEnd => 0,
        MessageType::SongInfo => SONG_INFO_SIZE,
        MessageType::PlayControl => CONTROL_SIZE,
        MessageType::SongData => MAX_CHUNK_SIZE,
        MessageType::ListResponse | MessageType::SongRequest | MessageType::Error => {
            MAX_PAYLOAD_SIZE
        }
    }
}
