//! Client-side streaming session
//!
//! A [`StreamingSession`] is created when a format message arrives and is
//! replaced wholesale when the next one does. The render actor observes the
//! current session through a [`SessionSlot`]; replacing a session swaps the
//! slot instead of mutating the old buffer, so a render call in flight always
//! sees one consistent session.

pub mod state;
pub mod sync;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::buffer::{BufferWriter, PlaybackBuffer};
use crate::audio::format::FormatDescriptor;
use crate::error::AudioError;

pub use state::{BufferingStateMachine, ClientEvent, ClientState, OutputStart, SyncJob};
pub use sync::{start_at, sync_start, SyncOutcome, SyncPoint, SystemClock, WallClock};

/// Slot holding the session the render actor currently plays
pub type SessionSlot = Arc<ArcSwapOption<StreamingSession>>;

/// Create an empty session slot
pub fn empty_slot() -> SessionSlot {
    Arc::new(ArcSwapOption::empty())
}

/// One track being received and played
pub struct StreamingSession {
    id: u64,
    name: String,
    format: FormatDescriptor,
    buffer: Arc<PlaybackBuffer>,
    playing: AtomicBool,
    end_of_stream: AtomicBool,
    completed: AtomicBool,
    /// Only touched by network-side actors, never by the render callback
    pending_sync: Mutex<Option<SyncPoint>>,
}

impl StreamingSession {
    /// Create a session for a track of `data_len` bytes, with the writer
    /// for its buffer.
    pub fn new(
        id: u64,
        name: impl Into<String>,
        format: FormatDescriptor,
        data_len: usize,
    ) -> (Arc<Self>, BufferWriter) {
        let (buffer, writer) = PlaybackBuffer::new(data_len, format.bytes_per_frame());
        let session = Arc::new(Self {
            id,
            name: name.into(),
            format,
            buffer,
            playing: AtomicBool::new(false),
            end_of_stream: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            pending_sync: Mutex::new(None),
        });
        (session, writer)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    pub fn buffer(&self) -> &PlaybackBuffer {
        &self.buffer
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    #[inline]
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Record that the sender delivered every chunk.
    ///
    /// Must be called after the final append so that a reader seeing the flag
    /// also sees the final committed length.
    pub fn mark_end_of_stream(&self) {
        self.end_of_stream.store(true, Ordering::Release);
    }

    /// True once the stream ended and less than one frame is left to play
    pub fn is_drained(&self) -> bool {
        self.end_of_stream() && self.buffer.remaining() < self.format.bytes_per_frame()
    }

    /// Start or resume playback.
    ///
    /// A track that already played to the end restarts from the beginning.
    pub fn start(&self) -> Result<(), AudioError> {
        if self.buffer.committed_len() == 0 {
            return Err(AudioError::NoData);
        }
        if self.completed.swap(false, Ordering::AcqRel) || self.is_drained() {
            self.buffer.rewind();
        }
        self.playing.store(true, Ordering::Release);
        tracing::info!(session = self.id, "Playing {}", self.name);
        Ok(())
    }

    /// Pause without moving the cursor
    pub fn pause(&self) {
        self.playing.store(false, Ordering::Release);
        tracing::info!(
            session = self.id,
            "Playback paused at {:.2} seconds",
            self.position_seconds()
        );
    }

    /// Stop and rewind to the start
    pub fn stop(&self) {
        self.playing.store(false, Ordering::Release);
        self.buffer.rewind();
        tracing::info!(session = self.id, "Playback stopped");
    }

    /// Seek to a position in seconds.
    ///
    /// The target is rounded down to a frame boundary and must lie within the
    /// data received so far. Returns the new byte offset.
    pub fn seek(&self, seconds: f64) -> Result<usize, AudioError> {
        let offset = self.format.seconds_to_offset(seconds)?;
        let landed = self.buffer.seek_to(offset)?;
        self.completed.store(false, Ordering::Release);
        tracing::debug!(session = self.id, offset = landed, "Seeked to {:.3} seconds", seconds);
        Ok(landed)
    }

    /// Called by the render actor when a period ran past the committed data.
    ///
    /// Applies the pause policy: once the stream has ended the track is
    /// complete and playback stops; before that it is an underrun and
    /// playback stays armed for the next chunk. Returns true on completion.
    #[inline]
    pub fn on_exhausted(&self) -> bool {
        if self.is_drained() {
            self.playing.store(false, Ordering::Release);
            self.completed.store(true, Ordering::Release);
            true
        } else {
            self.buffer.record_underrun();
            false
        }
    }

    pub fn position_seconds(&self) -> f64 {
        self.format.bytes_to_seconds(self.buffer.cursor())
    }

    /// Declared track duration
    pub fn duration_seconds(&self) -> f64 {
        self.format.bytes_to_seconds(self.buffer.capacity())
    }

    /// Duration of the data received so far
    pub fn buffered_seconds(&self) -> f64 {
        self.format.bytes_to_seconds(self.buffer.committed_len())
    }

    pub fn set_pending_sync(&self, point: SyncPoint) {
        *self.pending_sync.lock() = Some(point);
    }

    /// Take the pending sync point; it is consumed once
    pub fn take_pending_sync(&self) -> Option<SyncPoint> {
        self.pending_sync.lock().take()
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("format", &self.format)
            .field("buffer", &self.buffer)
            .field("playing", &self.is_playing())
            .field("end_of_stream", &self.end_of_stream())
            .finish()
    }
}
