//! Message model shared by server and client
//!
//! Every message on the wire is a 5-byte header (`type: u8`, `length: u32`
//! little-endian) followed by exactly `length` payload bytes. See
//! [`crate::codec`] for the byte-level encoding.

use bytes::Bytes;

use crate::audio::format::FormatDescriptor;
use crate::error::CodecError;

/// Message type tag (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client asks for the catalogue
    ListRequest = 0,
    /// Server sends the catalogue
    ListResponse = 1,
    /// Client asks for a track by name
    SongRequest = 2,
    /// Server sends the track format
    SongInfo = 3,
    /// Server sends a chunk of raw samples
    SongData = 4,
    /// Server has sent every chunk
    SongDataEnd = 5,
    /// Client playback command (reserved, ignored by the server)
    PlayControl = 6,
    /// Error text from the peer
    Error = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            0 => MessageType::ListRequest,
            1 => MessageType::ListResponse,
            2 => MessageType::SongRequest,
            3 => MessageType::SongInfo,
            4 => MessageType::SongData,
            5 => MessageType::SongDataEnd,
            6 => MessageType::PlayControl,
            7 => MessageType::Error,
            other => return Err(CodecError::UnknownMessageType(other)),
        })
    }
}

/// Playback command carried by PLAY_CONTROL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlayCommand {
    Play = 0,
    Pause = 1,
    Stop = 2,
    Seek = 3,
}

impl TryFrom<u8> for PlayCommand {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            0 => Self::Play,
            1 => Self::Pause,
            2 => Self::Stop,
            3 => Self::Seek,
            other => return Err(CodecError::InvalidCommand(other)),
        })
    }
}

/// PLAY_CONTROL payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlMessage {
    pub command: PlayCommand,
    /// Only meaningful for [`PlayCommand::Seek`]
    pub seek_position_seconds: f64,
}

impl ControlMessage {
    pub fn new(command: PlayCommand) -> Self {
        Self {
            command,
            seek_position_seconds: 0.0,
        }
    }

    pub fn seek(seconds: f64) -> Self {
        Self {
            command: PlayCommand::Seek,
            seek_position_seconds: seconds,
        }
    }
}

/// SONG_INFO payload: the track format plus its total sample length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SongInfo {
    pub format: FormatDescriptor,
    /// Total number of sample bytes the following SONG_DATA messages carry
    pub data_len: u32,
}

impl SongInfo {
    pub fn duration_seconds(&self) -> f64 {
        self.format.bytes_to_seconds(self.data_len as usize)
    }
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ListRequest,
    ListResponse(Vec<String>),
    SongRequest(String),
    SongInfo(SongInfo),
    SongData(Bytes),
    SongDataEnd,
    PlayControl(ControlMessage),
    Error(String),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ListRequest => MessageType::ListRequest,
            Message::ListResponse(_) => MessageType::ListResponse,
            Message::SongRequest(_) => MessageType::SongRequest,
            Message::SongInfo(_) => MessageType::SongInfo,
            Message::SongData(_) => MessageType::SongData,
            Message::SongDataEnd => MessageType::SongDataEnd,
            Message::PlayControl(_) => MessageType::PlayControl,
            Message::Error(_) => MessageType::Error,
        }
    }
}
