//! Music client: connection, receive actor and playback controls
//!
//! The receive actor is a tokio task that reads messages and feeds them to
//! the [`BufferingStateMachine`]. Controls called from the application lock
//! the machine briefly; the lock is never held across an await and never
//! taken by the render actor.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::transport::{MessageReader, MessageWriter};
use crate::audio::engine::EngineStatsSnapshot;
use crate::audio::output::OutputDriver;
use crate::config::ClientConfig;
use crate::error::{AudioError, Error, NetworkError, Result};
use crate::protocol::Message;
use crate::session::{
    start_at, sync_start, BufferingStateMachine, ClientEvent, ClientState, StreamingSession,
    SyncOutcome, SyncPoint, SystemClock, WallClock,
};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State shared between the client handle and its tasks
struct Shared {
    machine: Mutex<BufferingStateMachine>,
    songs: Mutex<Vec<String>>,
    connected: AtomicBool,
    events: mpsc::UnboundedSender<ClientEvent>,
    clock: Arc<dyn WallClock>,
    max_sync_wait: Duration,
}

impl Shared {
    fn publish(&self, event: ClientEvent) {
        if let ClientEvent::SongList(names) = &event {
            *self.songs.lock() = names.clone();
        }
        // The application may have stopped listening
        let _ = self.events.send(event);
    }
}

pub struct MusicClient {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<MessageWriter<BoxedWriter>>,
    shutdown: watch::Sender<bool>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl MusicClient {
    /// Connect to the server named in `config`
    pub async fn connect(
        config: &ClientConfig,
        driver: Box<dyn OutputDriver>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let addr = format!("{}:{}", config.server_host, config.server_port);
        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }
        tracing::info!("Connected to {}", addr);

        Ok(Self::from_stream(stream, config, driver, Arc::new(SystemClock)))
    }

    /// Run a client over an already connected stream
    pub fn from_stream<S>(
        stream: S,
        config: &ClientConfig,
        driver: Box<dyn OutputDriver>,
        clock: Arc<dyn WallClock>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(read);
        let writer: BoxedWriter = Box::new(write);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            machine: Mutex::new(BufferingStateMachine::new(
                config.buffering_threshold_bytes,
                driver,
            )),
            songs: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            events: events_tx,
            clock,
            max_sync_wait: config.max_sync_wait(),
        });

        let task = tokio::spawn(receive_loop(
            MessageReader::new(reader),
            shared.clone(),
            shutdown_rx,
        ));

        let client = Self {
            shared,
            writer: tokio::sync::Mutex::new(MessageWriter::new(writer)),
            shutdown: shutdown_tx,
            receive_task: Mutex::new(Some(task)),
        };
        (client, events_rx)
    }

    async fn send(&self, message: &Message) -> Result<()> {
        if !self.is_connected() {
            return Err(NetworkError::Disconnected.into());
        }
        self.writer.lock().await.send(message).await
    }

    pub async fn request_song_list(&self) -> Result<()> {
        self.send(&Message::ListRequest).await
    }

    /// Ask for a track; playback starts once enough of it is buffered
    pub async fn request_song(&self, name: &str) -> Result<()> {
        self.request(name, None).await
    }

    /// Ask for a track and start it at `point` once buffered
    pub async fn request_song_synced(&self, name: &str, point: SyncPoint) -> Result<()> {
        self.request(name, Some(point)).await
    }

    async fn request(&self, name: &str, sync: Option<SyncPoint>) -> Result<()> {
        // Update the machine first so the reply can never overtake it
        self.shared.machine.lock().on_song_requested(name, sync);
        self.send(&Message::SongRequest(name.to_string())).await
    }

    pub fn play(&self) -> Result<()> {
        self.shared.machine.lock().play()
    }

    pub fn pause(&self) -> Result<()> {
        self.shared.machine.lock().pause()
    }

    pub fn stop(&self) -> Result<()> {
        self.shared.machine.lock().stop()
    }

    /// Seek within the buffered part of the current track
    pub fn seek(&self, seconds: f64) -> Result<()> {
        self.shared.machine.lock().seek(seconds).map(|_| ())
    }

    /// Start the current track at `point`, waiting on the caller's task
    pub async fn sync_play(&self, point: SyncPoint) -> Result<SyncOutcome> {
        let session = self.current_session().ok_or(AudioError::NoSession)?;
        sync_start(
            &session,
            point,
            self.shared.clock.as_ref(),
            self.shared.max_sync_wait,
        )
        .await
    }

    pub fn state(&self) -> ClientState {
        self.shared.machine.lock().state()
    }

    fn current_session(&self) -> Option<Arc<StreamingSession>> {
        self.shared.machine.lock().current_session()
    }

    pub fn position_seconds(&self) -> f64 {
        self.current_session()
            .map(|s| s.position_seconds())
            .unwrap_or(0.0)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.current_session()
            .map(|s| s.duration_seconds())
            .unwrap_or(0.0)
    }

    pub fn buffered_seconds(&self) -> f64 {
        self.current_session()
            .map(|s| s.buffered_seconds())
            .unwrap_or(0.0)
    }

    pub fn is_playing(&self) -> bool {
        self.current_session().is_some_and(|s| s.is_playing())
    }

    pub fn current_song(&self) -> Option<String> {
        self.current_session().map(|s| s.name().to_string())
    }

    /// Names from the most recent list response
    pub fn available_songs(&self) -> Vec<String> {
        self.shared.songs.lock().clone()
    }

    /// Take a fault reported by the output device since the last call
    pub fn take_output_error(&self) -> Option<AudioError> {
        self.shared.machine.lock().take_output_error()
    }

    /// Counters from the render path
    pub fn engine_stats(&self) -> EngineStatsSnapshot {
        self.shared.machine.lock().engine_stats()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Close the connection and release playback.
    ///
    /// The receive actor is joined and the output stopped before any
    /// session is released.
    pub async fn disconnect(&self) {
        let _ = self.shutdown.send(true);

        let task = self.receive_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Receive task failed: {}", e);
            }
        }

        self.shared.machine.lock().shutdown();
        if let Err(e) = self.writer.lock().await.close().await {
            tracing::debug!("Closing connection: {}", e);
        }
        tracing::info!("Disconnected");
    }
}

impl Drop for MusicClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        self.shared.machine.lock().shutdown();
    }
}

async fn receive_loop(
    mut reader: MessageReader<BoxedReader>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            message = reader.read_message() => message,
        };

        let message = match message {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!("Server closed the connection");
                break;
            }
            Err(e) => {
                tracing::error!("Connection lost: {}", e);
                break;
            }
        };

        let (result, jobs, output) = {
            let mut machine = shared.machine.lock();
            let result = machine.on_message(message);
            (result, machine.take_sync_jobs(), machine.take_output_start())
        };

        // Opening the device blocks, so it runs off both the lock and the runtime
        if let Some(start) = output {
            let format = *start.format();
            let started = tokio::task::spawn_blocking(move || start.run())
                .await
                .unwrap_or_else(|e| Err(AudioError::StreamError(e.to_string())));
            if let Err(e) = started {
                shared.machine.lock().on_output_failed(format, e);
            }
        }

        for (session, point) in jobs {
            spawn_sync(shared.clone(), session, point, shutdown.clone());
        }

        match result {
            Ok(events) => events.into_iter().for_each(|e| shared.publish(e)),
            Err(e) if e.is_session_fatal() => {
                tracing::error!("Protocol fault, closing connection: {}", e);
                break;
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }

    shared.connected.store(false, Ordering::Release);
    shared.publish(ClientEvent::Disconnected);
}

/// Wait for a sync point on its own task so the receive actor keeps reading
fn spawn_sync(
    shared: Arc<Shared>,
    session: Arc<StreamingSession>,
    point: SyncPoint,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let start = sync_start(&session, point, shared.clock.as_ref(), shared.max_sync_wait);
        let result: Result<SyncOutcome> = tokio::select! {
            result = start => result,
            _ = shutdown.changed() => return,
        };

        match result {
            Ok(outcome) => {
                tracing::debug!("Synchronised start: {:?}", outcome);
                shared.publish(ClientEvent::PlaybackStarted {
                    name: session.name().to_string(),
                });
            }
            Err(Error::Audio(AudioError::SyncTooFar { wait_ms, max_ms })) => {
                tracing::warn!(
                    "Sync target {} ms away exceeds {} ms, starting now",
                    wait_ms,
                    max_ms
                );
                match start_at(&session, point.target_position_seconds) {
                    Ok(()) => shared.publish(ClientEvent::PlaybackStarted {
                        name: session.name().to_string(),
                    }),
                    Err(e) => tracing::warn!("Could not start playback: {}", e),
                }
            }
            Err(e) => tracing::warn!("Synchronised start failed: {}", e),
        }
    });
}
