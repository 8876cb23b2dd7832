//! Message encoder
//!
//! Serializes messages into `header ++ payload` frames. Encoding checks the
//! per-type payload limits so a peer never receives a frame it would reject.

use bytes::{BufMut, Bytes, BytesMut};

use super::{payload_limit, HEADER_SIZE};
use crate::error::CodecError;
use crate::protocol::{Message, MessageType};

/// Encode a frame header for a payload of `len` bytes
pub fn encode_header(kind: MessageType, len: usize) -> Result<[u8; HEADER_SIZE], CodecError> {
    let max = payload_limit(kind);
    if len > max {
        return Err(CodecError::PayloadTooLarge { kind, len, max });
    }

    let mut header = [0u8; HEADER_SIZE];
    header[0] = kind as u8;
    header[1..].copy_from_slice(&(len as u32).to_le_bytes());
    Ok(header)
}

/// Append the complete frame for `msg` to `dst`.
///
/// On error `dst` is left as it was.
pub fn encode_message(msg: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
    let start = dst.len();
    dst.put_bytes(0, HEADER_SIZE);

    if let Err(e) = encode_payload(msg, dst) {
        dst.truncate(start);
        return Err(e);
    }

    let len = dst.len() - start - HEADER_SIZE;
    match encode_header(msg.message_type(), len) {
        Ok(header) => {
            dst[start..start + HEADER_SIZE].copy_from_slice(&header);
            Ok(())
        }
        Err(e) => {
            dst.truncate(start);
            Err(e)
        }
    }
}

/// Encode `msg` into a new buffer
pub fn encode(msg: &Message) -> Result<Bytes, CodecError> {
    let mut dst = BytesMut::with_capacity(HEADER_SIZE + estimated_payload_len(msg));
    encode_message(msg, &mut dst)?;
    Ok(dst.freeze())
}

fn encode_payload(msg: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
    match msg {
        Message::ListRequest | Message::SongDataEnd => {}
        Message::ListResponse(names) => {
            dst.put_u32_le(names.len() as u32);
            for name in names {
                dst.put_u32_le(name.len() as u32);
                dst.put_slice(name.as_bytes());
            }
        }
        Message::SongRequest(text) | Message::Error(text) => dst.put_slice(text.as_bytes()),
        Message::SongInfo(info) => {
            dst.put_u16_le(info.format.channels());
            dst.put_u32_le(info.format.sample_rate());
            dst.put_u16_le(info.format.bits_per_sample());
            dst.put_u32_le(info.data_len);
        }
        Message::SongData(chunk) => {
            // Check before copying a chunk that can never be sent
            let max = payload_limit(MessageType::SongData);
            if chunk.len() > max {
                return Err(CodecError::PayloadTooLarge {
                    kind: MessageType::SongData,
                    len: chunk.len(),
                    max,
                });
            }
            dst.put_slice(chunk);
        }
        Message::PlayControl(control) => {
            dst.put_u8(control.command as u8);
            dst.put_f64_le(control.seek_position_seconds);
        }
    }
    Ok(())
}

fn estimated_payload_len(msg: &Message) -> usize {
    match msg {
        Message::ListResponse(names) => 4 + names.iter().map(|n| 4 + n.len()).sum::<usize>(),
        Message::SongRequest(text) | Message::Error(text) => text.len(),
        Message::SongData(chunk) => chunk.len(),
        _ => 16,
    }
}
