//! Message decoder
//!
//! Turns complete frames back into [`Message`]s. Nothing here ever returns a
//! message built from a partial frame.

use bytes::{Buf, Bytes};

use super::{payload_limit, CONTROL_SIZE, HEADER_SIZE, SONG_INFO_SIZE};
use crate::audio::format::FormatDescriptor;
use crate::error::CodecError;
use crate::protocol::{ControlMessage, Message, MessageType, PlayCommand, SongInfo};

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: MessageType,
    pub len: usize,
}

/// Parse and validate a frame header.
///
/// The announced length is checked against the type's limit here, before
/// any payload memory is reserved.
pub fn decode_header(raw: &[u8; HEADER_SIZE]) -> Result<FrameHeader, CodecError> {
    let kind = MessageType::try_from(raw[0])?;
    let len = u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]) as usize;

    let max = payload_limit(kind);
    if len > max {
        return Err(CodecError::PayloadTooLarge { kind, len, max });
    }
    Ok(FrameHeader { kind, len })
}

/// Decode the first frame in `src`.
///
/// Returns `Ok(None)` when `src` does not yet hold a complete frame, and the
/// message plus the number of bytes consumed otherwise.
pub fn decode_message(src: &[u8]) -> Result<Option<(Message, usize)>, CodecError> {
    let Some(raw) = src.first_chunk::<HEADER_SIZE>() else {
        return Ok(None);
    };
    let header = decode_header(raw)?;

    let total = HEADER_SIZE + header.len;
    if src.len() < total {
        return Ok(None);
    }

    let payload = Bytes::copy_from_slice(&src[HEADER_SIZE..total]);
    let message = decode_payload(header.kind, payload)?;
    Ok(Some((message, total)))
}

/// Decode a complete payload of the given type
pub fn decode_payload(kind: MessageType, payload: Bytes) -> Result<Message, CodecError> {
    match kind {
        MessageType::ListRequest => {
            expect_empty(kind, &payload)?;
            Ok(Message::ListRequest)
        }
        MessageType::SongDataEnd => {
            expect_empty(kind, &payload)?;
            Ok(Message::SongDataEnd)
        }
        MessageType::ListResponse => decode_string_list(&payload).map(Message::ListResponse),
        MessageType::SongRequest => decode_text(kind, &payload).map(Message::SongRequest),
        MessageType::Error => decode_text(kind, &payload).map(Message::Error),
        MessageType::SongInfo => decode_song_info(&payload).map(Message::SongInfo),
        MessageType::SongData => Ok(Message::SongData(payload)),
        MessageType::PlayControl => decode_control(&payload).map(Message::PlayControl),
    }
}

fn expect_empty(kind: MessageType, payload: &[u8]) -> Result<(), CodecError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(CodecError::TrailingBytes {
            kind,
            extra: payload.len(),
        })
    }
}

fn expect_exact(kind: MessageType, payload: &[u8], expected: usize) -> Result<(), CodecError> {
    if payload.len() < expected {
        return Err(CodecError::TruncatedPayload {
            kind,
            expected,
            actual: payload.len(),
        });
    }
    if payload.len() > expected {
        return Err(CodecError::TrailingBytes {
            kind,
            extra: payload.len() - expected,
        });
    }
    Ok(())
}

fn decode_text(kind: MessageType, payload: &[u8]) -> Result<String, CodecError> {
    std::str::from_utf8(payload)
        .map(str::to_owned)
        .map_err(|_| CodecError::InvalidUtf8(kind))
}

fn decode_string_list(payload: &[u8]) -> Result<Vec<String>, CodecError> {
    const KIND: MessageType = MessageType::ListResponse;
    let truncated = |expected: usize, actual: usize| CodecError::TruncatedPayload {
        kind: KIND,
        expected,
        actual,
    };

    let mut buf = payload;
    if buf.remaining() < 4 {
        return Err(truncated(4, buf.remaining()));
    }
    let count = buf.get_u32_le() as usize;

    // Every entry needs at least its length prefix
    if count > buf.remaining() / 4 {
        return Err(truncated(4 + count.saturating_mul(4), payload.len()));
    }

    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(truncated(4, buf.remaining()));
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(truncated(len, buf.remaining()));
        }
        names.push(decode_text(KIND, &buf[..len])?);
        buf.advance(len);
    }

    if buf.has_remaining() {
        return Err(CodecError::TrailingBytes {
            kind: KIND,
            extra: buf.remaining(),
        });
    }
    Ok(names)
}

fn decode_song_info(payload: &[u8]) -> Result<SongInfo, CodecError> {
    expect_exact(MessageType::SongInfo, payload, SONG_INFO_SIZE)?;

    let mut buf = payload;
    let channels = buf.get_u16_le();
    let sample_rate = buf.get_u32_le();
    let bits_per_sample = buf.get_u16_le();
    let data_len = buf.get_u32_le();

    let format = FormatDescriptor::new(channels, sample_rate, bits_per_sample)
        .map_err(|e| CodecError::InvalidFormat(e.to_string()))?;

    Ok(SongInfo { format, data_len })
}

fn decode_control(payload: &[u8]) -> Result<ControlMessage, CodecError> {
    expect_exact(MessageType::PlayControl, payload, CONTROL_SIZE)?;

    let mut buf = payload;
    let command = PlayCommand::try_from(buf.get_u8())?;
    let seek_position_seconds = buf.get_f64_le();

    Ok(ControlMessage {
        command,
        seek_position_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, MAX_CHUNK_SIZE};

    fn round_trip(msg: Message) {
        let frame = encode(&msg).unwrap();
        let (decoded, used) = decode_message(&frame).unwrap().unwrap();
        assert_eq!(used, frame.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_round_trip_every_type() {
        round_trip(Message::ListRequest);
        round_trip(Message::ListResponse(vec![]));
        round_trip(Message::ListResponse(vec!["a.wav".into(), "".into(), "ünï.wav".into()]));
        round_trip(Message::SongRequest("a.wav".into()));
        round_trip(Message::SongRequest(String::new()));
        round_trip(Message::SongInfo(SongInfo {
            format: FormatDescriptor::new(1, 8000, 8).unwrap(),
            data_len: 0,
        }));
        round_trip(Message::SongData(Bytes::new()));
        round_trip(Message::SongData(Bytes::from(vec![0xAB; MAX_CHUNK_SIZE])));
        round_trip(Message::SongDataEnd);
        round_trip(Message::PlayControl(ControlMessage::seek(12.5)));
        round_trip(Message::PlayControl(ControlMessage::new(PlayCommand::Pause)));
        round_trip(Message::Error("Song not found: x.wav".into()));
    }

    #[test]
    fn test_partial_frames_are_not_decoded() {
        let frame = encode(&Message::SongRequest("a.wav".into())).unwrap();
        for cut in 0..frame.len() {
            assert!(decode_message(&frame[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn test_decodes_first_of_several_frames() {
        let mut stream = encode(&Message::ListRequest).unwrap().to_vec();
        stream.extend_from_slice(&encode(&Message::SongDataEnd).unwrap());

        let (first, used) = decode_message(&stream).unwrap().unwrap();
        assert_eq!(first, Message::ListRequest);
        let (second, _) = decode_message(&stream[used..]).unwrap().unwrap();
        assert_eq!(second, Message::SongDataEnd);
    }

    #[test]
    fn test_rejects_unknown_type_and_oversized_header() {
        assert!(matches!(
            decode_header(&[9, 0, 0, 0, 0]),
            Err(CodecError::UnknownMessageType(9))
        ));

        let mut raw = [MessageType::SongData as u8, 0, 0, 0, 0];
        raw[1..].copy_from_slice(&((MAX_CHUNK_SIZE + 1) as u32).to_le_bytes());
        assert!(matches!(
            decode_header(&raw),
            Err(CodecError::PayloadTooLarge { .. })
        ));

        // Empty-payload types announce nothing
        assert!(decode_header(&[MessageType::SongDataEnd as u8, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_malformed_payloads() {
        // Count promises more entries than the payload holds
        let mut list = 3u32.to_le_bytes().to_vec();
        list.extend_from_slice(&1u32.to_le_bytes());
        list.push(b'a');
        assert!(matches!(
            decode_payload(MessageType::ListResponse, Bytes::from(list)),
            Err(CodecError::TruncatedPayload { .. })
        ));

        assert!(matches!(
            decode_payload(MessageType::SongRequest, Bytes::from_static(&[0xff, 0xfe])),
            Err(CodecError::InvalidUtf8(MessageType::SongRequest))
        ));

        let mut info = Vec::new();
        info.extend_from_slice(&2u16.to_le_bytes());
        info.extend_from_slice(&44_100u32.to_le_bytes());
        info.extend_from_slice(&24u16.to_le_bytes());
        info.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            decode_payload(MessageType::SongInfo, Bytes::from(info)),
            Err(CodecError::InvalidFormat(_))
        ));

        assert!(matches!(
            decode_payload(MessageType::PlayControl, Bytes::from_static(&[0, 0, 0])),
            Err(CodecError::TruncatedPayload { .. })
        ));
    }
}
