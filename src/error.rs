//! Error types for the music streaming application

use thiserror::Error;

use crate::protocol::MessageType;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error terminates the connection it occurred on.
    ///
    /// Transport faults (failed or short reads/writes) and protocol faults
    /// (malformed frames, out-of-order messages) end the session. Missing or
    /// unloadable tracks, playback control errors and configuration problems
    /// are reported and the session carries on.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Error::Network(_) | Error::Codec(_) | Error::Io(_) => true,
            Error::Audio(AudioError::BufferOverflow { .. }) => true,
            Error::Audio(_) | Error::Track(_) | Error::Config(_) => false,
        }
    }
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Buffer overflow: {attempted} bytes exceed capacity of {capacity}")]
    BufferOverflow { capacity: usize, attempted: usize },

    #[error("No audio data loaded")]
    NoData,

    #[error("No active session")]
    NoSession,

    #[error("Still buffering, please wait")]
    StillBuffering,

    #[error("Seek target {requested} is beyond the {committed} committed bytes")]
    SeekOutOfRange { requested: usize, committed: usize },

    #[error("Invalid position: {0} seconds")]
    InvalidPosition(f64),

    #[error("Sync target is {wait_ms} ms away, limit is {max_ms} ms")]
    SyncTooFar { wait_ms: u64, max_ms: u64 },

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Wire codec errors (protocol faults)
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("{kind:?} payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        kind: MessageType,
        len: usize,
        max: usize,
    },

    #[error("Truncated {kind:?} payload: expected {expected} bytes, got {actual}")]
    TruncatedPayload {
        kind: MessageType,
        expected: usize,
        actual: usize,
    },

    #[error("{kind:?} payload has {extra} trailing bytes")]
    TrailingBytes { kind: MessageType, extra: usize },

    #[error("{0:?} payload is not valid UTF-8")]
    InvalidUtf8(MessageType),

    #[error("Invalid format record: {0}")]
    InvalidFormat(String),

    #[error("Invalid play command: {0}")]
    InvalidCommand(u8),

    #[error("Unexpected {kind:?} message: {reason}")]
    UnexpectedMessage {
        kind: MessageType,
        reason: &'static str,
    },
}

/// Network (transport) errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Incomplete frame: expected {expected} bytes, received {received}")]
    IncompleteFrame { expected: usize, received: usize },

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Timeout")]
    Timeout,
}

/// Track catalogue errors
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Song not found: {0}")]
    NotFound(String),

    #[error("Failed to load song {name}: {reason}")]
    LoadFailed { name: String, reason: String },

    #[error("Invalid WAV data: {0}")]
    InvalidWav(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
