//! Client buffering state machine
//!
//! ```text
//!            request             SONG_INFO            > threshold
//!   Idle ───────────▶ AwaitingFormat ──────▶ Buffering ───────────▶ Streaming
//!    ▲                  │  ▲ SONG_INFO (any state)                      │
//!    │      ERROR       │  └────────────────────────────────────────────┤
//!    └──────────────────┘                                               │
//!    └──────────── end-of-stream received and cursor at the end ◀───────┘
//! ```
//!
//! The machine runs on the receive actor. It owns the output driver and the
//! writer half of the current session's buffer; the render actor only ever
//! sees sessions through the shared [`SessionSlot`].
//!
//! Opening a device can block for a long time, so the machine never starts
//! the driver itself. It hands out an [`OutputStart`] that the caller runs
//! once the machine is no longer locked.

use parking_lot::Mutex;
use std::sync::Arc;

use super::sync::SyncPoint;
use super::{empty_slot, SessionSlot, StreamingSession};
use crate::audio::buffer::BufferWriter;
use crate::audio::engine::{EngineStatsSnapshot, PlaybackEngine};
use crate::audio::format::FormatDescriptor;
use crate::audio::output::{OutputDriver, RenderCallback};
use crate::error::{AudioError, CodecError, Result};
use crate::protocol::{Message, MessageType, SongInfo};

/// Client playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    AwaitingFormat,
    Buffering,
    Streaming,
}

/// Notifications published to the application
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SongList(Vec<String>),
    SongInfo { name: String, info: SongInfo },
    PlaybackStarted { name: String },
    SyncScheduled { name: String, point: SyncPoint },
    StreamComplete { name: String, bytes: usize },
    ServerError(String),
    Disconnected,
}

/// A session waiting for its synchronised start
pub type SyncJob = (Arc<StreamingSession>, SyncPoint);

/// The driver and a count of how often it has been stopped
struct DriverCell {
    driver: Box<dyn OutputDriver>,
    stops: u64,
}

impl DriverCell {
    fn stop(&mut self) {
        self.driver.stop();
        self.stops += 1;
    }
}

/// A driver start scheduled by the machine
pub struct OutputStart {
    cell: Arc<Mutex<DriverCell>>,
    stops: u64,
    format: FormatDescriptor,
    render: RenderCallback,
}

impl OutputStart {
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Start the driver. Blocks until the sink is running or has failed.
    ///
    /// Does nothing if the driver was stopped after this start was
    /// scheduled.
    pub fn run(self) -> std::result::Result<(), AudioError> {
        let mut cell = self.cell.lock();
        if cell.stops != self.stops {
            tracing::debug!("Output stopped before it started, skipping");
            return Ok(());
        }
        cell.driver.start(&self.format, self.render)
    }
}

pub struct BufferingStateMachine {
    state: ClientState,
    /// State to return to if the pending request is refused
    previous_state: ClientState,
    requested: Option<String>,
    requested_sync: Option<SyncPoint>,
    threshold: usize,
    slot: SessionSlot,
    engine: PlaybackEngine,
    output: Arc<Mutex<DriverCell>>,
    /// Format the driver runs, or is about to run, with
    driver_format: Option<FormatDescriptor>,
    pending_output: Option<OutputStart>,
    current: Option<Arc<StreamingSession>>,
    /// Previous session, kept so the render actor never drops the last reference
    retired: Option<Arc<StreamingSession>>,
    writer: Option<BufferWriter>,
    next_session_id: u64,
    sync_jobs: Vec<SyncJob>,
}

impl BufferingStateMachine {
    /// Create a machine that starts playback once more than
    /// `threshold` bytes are buffered
    pub fn new(threshold: usize, driver: Box<dyn OutputDriver>) -> Self {
        let slot = empty_slot();
        Self {
            state: ClientState::Idle,
            previous_state: ClientState::Idle,
            requested: None,
            requested_sync: None,
            threshold,
            engine: PlaybackEngine::new(slot.clone()),
            slot,
            output: Arc::new(Mutex::new(DriverCell { driver, stops: 0 })),
            driver_format: None,
            pending_output: None,
            current: None,
            retired: None,
            writer: None,
            next_session_id: 1,
            sync_jobs: Vec::new(),
        }
    }

    /// Current state.
    ///
    /// A stream that has ended and played out reports `Idle`.
    pub fn state(&self) -> ClientState {
        match (&self.state, &self.current) {
            (ClientState::Streaming, Some(session)) if session.is_drained() => ClientState::Idle,
            (state, _) => *state,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn slot(&self) -> &SessionSlot {
        &self.slot
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn current_session(&self) -> Option<Arc<StreamingSession>> {
        self.current.clone()
    }

    pub fn engine_stats(&self) -> EngineStatsSnapshot {
        self.engine.stats().snapshot()
    }

    /// Take a fault the output reported, if any.
    ///
    /// Returns `None` without waiting while a start is still in progress.
    pub fn take_output_error(&self) -> Option<AudioError> {
        self.output.try_lock()?.driver.take_error()
    }

    /// Record that a song request was sent
    pub fn on_song_requested(&mut self, name: impl Into<String>, sync: Option<SyncPoint>) {
        let name = name.into();
        self.previous_state = self.state();
        self.state = ClientState::AwaitingFormat;
        tracing::info!("Requested {} (was {:?})", name, self.previous_state);
        self.requested = Some(name);
        self.requested_sync = sync;
    }

    /// Apply one message from the server.
    ///
    /// An error means the connection must be closed.
    pub fn on_message(&mut self, message: Message) -> Result<Vec<ClientEvent>> {
        match message {
            Message::ListResponse(names) => {
                tracing::info!("Server offers {} songs", names.len());
                Ok(vec![ClientEvent::SongList(names)])
            }
            Message::SongInfo(info) => Ok(self.on_song_info(info)),
            Message::SongData(chunk) => self.on_song_data(&chunk),
            Message::SongDataEnd => self.on_song_data_end(),
            Message::Error(text) => Ok(self.on_server_error(text)),
            other => {
                tracing::warn!("Ignoring unexpected {:?} from server", other.message_type());
                Ok(Vec::new())
            }
        }
    }

    fn on_song_info(&mut self, info: SongInfo) -> Vec<ClientEvent> {
        let name = self
            .requested
            .take()
            .unwrap_or_else(|| String::from("unknown"));

        // The render actor must be idle before the format it runs with changes
        if self.driver_format.is_some_and(|f| f != info.format) {
            self.output.lock().stop();
            self.driver_format = None;
            self.pending_output = None;
        }

        let id = self.next_session_id;
        self.next_session_id += 1;
        let (session, writer) =
            StreamingSession::new(id, name.clone(), info.format, info.data_len as usize);
        if let Some(point) = self.requested_sync.take() {
            session.set_pending_sync(point);
        }

        if let Some(old) = self.current.replace(session.clone()) {
            old.stop();
            self.retired = Some(old);
        }
        self.writer = Some(writer);
        self.slot.store(Some(session));
        self.state = ClientState::Buffering;

        tracing::info!(
            session = id,
            "Receiving {}: {} channels, {} Hz, {} bits, {:.2} seconds",
            name,
            info.format.channels(),
            info.format.sample_rate(),
            info.format.bits_per_sample(),
            info.duration_seconds()
        );

        if self.driver_format.is_none() {
            let engine = self.engine.clone();
            let render: RenderCallback = Box::new(move |out: &mut [f32]| {
                engine.render(out);
            });
            self.pending_output = Some(OutputStart {
                stops: self.output.lock().stops,
                cell: self.output.clone(),
                format: info.format,
                render,
            });
            self.driver_format = Some(info.format);
        }

        vec![ClientEvent::SongInfo { name, info }]
    }

    fn on_song_data(&mut self, chunk: &[u8]) -> Result<Vec<ClientEvent>> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(CodecError::UnexpectedMessage {
                kind: MessageType::SongData,
                reason: "no stream in progress",
            }
            .into());
        };

        let committed = writer.append(chunk)?;
        tracing::trace!("Buffered {} bytes ({} total)", chunk.len(), committed);

        if self.state == ClientState::Buffering && committed > self.threshold {
            return Ok(self.begin_playback());
        }
        Ok(Vec::new())
    }

    fn on_song_data_end(&mut self) -> Result<Vec<ClientEvent>> {
        let (Some(writer), Some(session)) = (self.writer.take(), self.current.clone()) else {
            return Err(CodecError::UnexpectedMessage {
                kind: MessageType::SongDataEnd,
                reason: "no stream in progress",
            }
            .into());
        };

        let bytes = writer.committed_len();
        drop(writer);
        session.mark_end_of_stream();
        tracing::info!(session = session.id(), "Received all {} bytes of {}", bytes, session.name());

        let mut events = Vec::new();
        if self.state == ClientState::Buffering {
            if bytes > 0 {
                events.extend(self.begin_playback());
            } else {
                self.state = ClientState::Idle;
            }
        }
        events.push(ClientEvent::StreamComplete {
            name: session.name().to_string(),
            bytes,
        });
        Ok(events)
    }

    fn on_server_error(&mut self, text: String) -> Vec<ClientEvent> {
        tracing::warn!("Server error: {}", text);
        let mut events = vec![ClientEvent::ServerError(text)];
        if self.state == ClientState::AwaitingFormat {
            self.state = self.previous_state;
            self.requested = None;
            self.requested_sync = None;
            if self.state == ClientState::Buffering {
                events.extend(self.resume_buffering());
            }
        }
        events
    }

    /// Apply the buffering transitions that data received while a request
    /// was pending would have triggered
    fn resume_buffering(&mut self) -> Vec<ClientEvent> {
        let Some(session) = self.current.clone() else {
            self.state = ClientState::Idle;
            return Vec::new();
        };
        let committed = session.buffer().committed_len();
        match (committed, session.end_of_stream()) {
            (0, true) => {
                self.state = ClientState::Idle;
                Vec::new()
            }
            (bytes, ended) if ended || bytes > self.threshold => self.begin_playback(),
            _ => Vec::new(),
        }
    }

    fn begin_playback(&mut self) -> Vec<ClientEvent> {
        let Some(session) = self.current.clone() else {
            return Vec::new();
        };
        self.state = ClientState::Streaming;
        let name = session.name().to_string();

        if let Some(point) = session.take_pending_sync() {
            self.sync_jobs.push((session, point));
            return vec![ClientEvent::SyncScheduled { name, point }];
        }

        match session.start() {
            Ok(()) => vec![ClientEvent::PlaybackStarted { name }],
            Err(e) => {
                tracing::warn!("Could not start playback: {}", e);
                Vec::new()
            }
        }
    }

    /// Take the synchronised starts scheduled since the last call
    pub fn take_sync_jobs(&mut self) -> Vec<SyncJob> {
        std::mem::take(&mut self.sync_jobs)
    }

    /// Take the driver start scheduled by the last format message.
    ///
    /// The caller must run it without holding the lock around the machine.
    pub fn take_output_start(&mut self) -> Option<OutputStart> {
        self.pending_output.take()
    }

    /// Record that a scheduled start failed.
    ///
    /// The next format message tries again.
    pub fn on_output_failed(&mut self, format: FormatDescriptor, error: AudioError) {
        tracing::error!("Failed to start audio output: {}", error);
        if self.driver_format == Some(format) {
            self.driver_format = None;
        }
    }

    fn session(&self) -> std::result::Result<&Arc<StreamingSession>, AudioError> {
        self.current.as_ref().ok_or(AudioError::NoSession)
    }

    /// Start or resume the current session.
    ///
    /// Refused while the threshold has not been reached. Starting by hand
    /// drops a sync point that has not fired yet.
    pub fn play(&mut self) -> Result<()> {
        if self.state == ClientState::Buffering {
            return Err(AudioError::StillBuffering.into());
        }
        let session = self.session()?;
        session.take_pending_sync();
        session.start()?;
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.session()?.pause();
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.session()?.stop();
        Ok(())
    }

    /// Seek the current session; returns the new byte offset
    pub fn seek(&self, seconds: f64) -> Result<usize> {
        Ok(self.session()?.seek(seconds)?)
    }

    /// Deactivate the output and release every session.
    ///
    /// The driver is stopped first so no render call can still be reading
    /// a buffer when it is freed.
    pub fn shutdown(&mut self) {
        self.output.lock().stop();
        self.driver_format = None;
        self.pending_output = None;
        self.slot.store(None);
        self.writer = None;
        self.current = None;
        self.retired = None;
        self.sync_jobs.clear();
        self.state = ClientState::Idle;
    }
}

impl Drop for BufferingStateMachine {
    fn drop(&mut self) {
        self.output.lock().stop();
    }
}
