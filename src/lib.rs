//! # LAN Music Player
//!
//! Streams uncompressed tracks from a music server to clients on the LAN and
//! plays them in real time, optionally starting several clients at the same
//! wall-clock instant.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                SERVER PC                                     │
//! │  ┌──────────────────────┐      ┌──────────────────────────────────────────┐ │
//! │  │ Catalogue            │      │ Track Cache (tracks::cache)              │ │
//! │  │ (tracks::catalog)    │─────▶│ load once, shared Arc<Track>             │ │
//! │  │ *.wav, sorted        │      └───────────────────┬──────────────────────┘ │
//! │  └──────────────────────┘                          │                        │
//! │                                                    ▼                        │
//! │  ┌──────────────────────────────────────────────────────────────────────┐  │
//! │  │ MusicServer (network::server) - one task per connection (JoinSet)    │  │
//! │  │  ┌────────────────┐   ┌────────────────┐   ┌────────────────┐        │  │
//! │  │  │ Delivery       │   │ Delivery       │   │ Delivery       │        │  │
//! │  │  │ Coordinator    │   │ Coordinator    │   │ Coordinator    │        │  │
//! │  │  └───────┬────────┘   └───────┬────────┘   └───────┬────────┘        │  │
//! │  └──────────┼────────────────────┼────────────────────┼─────────────────┘  │
//! └─────────────┼────────────────────┼────────────────────┼────────────────────┘
//!               │ TCP: [type|len|payload]  SONG_INFO, SONG_DATA × n, SONG_DATA_END
//!               ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                                CLIENT PC                                     │
//! │  ┌──────────────────────────────────────────────────────────────────────┐  │
//! │  │ Receive actor (network::receiver) ──▶ BufferingStateMachine          │  │
//! │  │   Idle → AwaitingFormat → Buffering → Streaming → Idle               │  │
//! │  └───────────────────────────────┬──────────────────────────────────────┘  │
//! │                                  │ append (BufferWriter)                   │
//! │                                  ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────────┐  │
//! │  │ StreamingSession ─ PlaybackBuffer (64 KiB segments, atomic length)   │  │
//! │  └───────────────────────────────┬──────────────────────────────────────┘  │
//! │                                  │ SessionSlot (arc-swap)                  │
//! │                                  ▼                                         │
//! │  ┌──────────────────────┐   ┌──────────────────────┐                      │
//! │  │ PlaybackEngine       │◀──│ OutputDriver (cpal)  │ device callback       │
//! │  │ render(), no locks   │   │ pulls one period     │                      │
//! │  └──────────────────────┘   └──────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod tracks;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default TCP port of the music server
    pub const DEFAULT_PORT: u16 = 8080;

    /// Directory scanned for tracks when none is configured
    pub const DEFAULT_MUSIC_DIR: &str = "./music";

    /// Default bytes per SONG_DATA message
    pub const DEFAULT_CHUNK_SIZE: usize = crate::codec::MAX_CHUNK_SIZE;

    /// Default delay between chunks in milliseconds
    pub const DEFAULT_PACING_MS: u64 = 10;

    /// Playback starts once more than this many bytes are buffered (1 MiB)
    pub const DEFAULT_BUFFERING_THRESHOLD: usize = 1024 * 1024;

    /// Longest accepted wait for a synchronised start
    pub const DEFAULT_MAX_SYNC_WAIT_MS: u64 = 60_000;

    /// Default TCP connect timeout
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Frames per period of the null output sink
    pub const NULL_OUTPUT_PERIOD_FRAMES: usize = 512;
}
