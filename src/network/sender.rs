//! Streaming delivery coordinator
//!
//! One coordinator serves one connected client: it answers list requests and
//! streams requested tracks as a format record, a run of bounded chunks and
//! an end marker. Tracks come from the [`TrackCache`] shared by all
//! connections.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use uuid::Uuid;

use super::transport::{MessageReader, MessageWriter};
use crate::codec::MAX_CHUNK_SIZE;
use crate::error::{Error, Result, TrackError};
use crate::protocol::Message;
use crate::tracks::{Track, TrackCache};

/// Chunking and pacing of sample delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Bytes per SONG_DATA message
    pub chunk_size: usize,
    /// Delay between chunks; zero sends back to back
    pub pacing: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
            pacing: Duration::from_millis(10),
        }
    }
}

impl DeliveryConfig {
    pub fn new(chunk_size: usize, pacing: Duration) -> Result<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk size must be between 1 and {} bytes, got {}",
                MAX_CHUNK_SIZE, chunk_size
            )));
        }
        Ok(Self { chunk_size, pacing })
    }
}

/// Per-connection delivery statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub lists_sent: u64,
    pub songs_sent: u64,
    pub chunks_sent: u64,
    pub sample_bytes_sent: u64,
    pub errors_sent: u64,
}

/// How a track delivery ended
enum Delivery {
    Complete,
    Interrupted,
}

/// Serves one client connection
pub struct DeliveryCoordinator<R, W> {
    peer_id: Uuid,
    reader: MessageReader<R>,
    writer: MessageWriter<W>,
    cache: Arc<TrackCache>,
    config: DeliveryConfig,
    shutdown: watch::Receiver<bool>,
    stats: DeliveryStats,
}

impl<R, W> DeliveryCoordinator<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: R,
        writer: W,
        cache: Arc<TrackCache>,
        config: DeliveryConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            peer_id: Uuid::new_v4(),
            reader: MessageReader::new(reader),
            writer: MessageWriter::new(writer),
            cache,
            config,
            shutdown,
            stats: DeliveryStats::default(),
        }
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Serve requests until the client disconnects or shutdown is signalled.
    ///
    /// Transport and protocol faults end the connection and are returned.
    pub async fn run(mut self) -> Result<DeliveryStats> {
        loop {
            if self.shutting_down() {
                tracing::info!("Closing connection for shutdown");
                break;
            }

            let message = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Closing connection for shutdown");
                        break;
                    }
                    continue;
                }
                message = self.reader.read_message() => message?,
            };

            let Some(message) = message else {
                tracing::info!("Client disconnected");
                break;
            };
            self.handle(message).await?;
        }

        tracing::debug!(
            messages_in = self.reader.messages_read(),
            bytes_in = self.reader.bytes_read(),
            messages_out = self.writer.messages_sent(),
            bytes_out = self.writer.bytes_sent(),
            "Connection closed"
        );
        Ok(self.stats)
    }

    async fn handle(&mut self, message: Message) -> Result<()> {
        match message {
            Message::ListRequest => {
                let names = self.cache.list_tracks();
                tracing::debug!("Sending list of {} songs", names.len());
                self.writer.send(&Message::ListResponse(names)).await?;
                self.stats.lists_sent += 1;
            }
            Message::SongRequest(name) => {
                tracing::info!("Client requested {}", name);
                self.deliver(&name).await?;
            }
            Message::PlayControl(control) => {
                tracing::debug!("Ignoring play control {:?}", control.command);
            }
            other => {
                tracing::warn!("Ignoring unexpected {:?} from client", other.message_type());
            }
        }
        Ok(())
    }

    async fn deliver(&mut self, name: &str) -> Result<()> {
        let track = match self.cache.get(name).await {
            Ok(track) => track,
            Err(TrackError::NotFound(_)) => {
                tracing::warn!("Song not found: {}", name);
                return self.send_error(format!("Song not found: {}", name)).await;
            }
            Err(e) => {
                tracing::warn!("{}", e);
                return self.send_error(format!("Failed to load song: {}", name)).await;
            }
        };

        match self.stream_track(&track).await? {
            Delivery::Complete => {
                self.stats.songs_sent += 1;
                tracing::info!("Finished sending {} ({} bytes)", name, track.data_len());
            }
            Delivery::Interrupted => {
                tracing::info!("Delivery of {} interrupted by shutdown", name);
            }
        }
        Ok(())
    }

    async fn stream_track(&mut self, track: &Track) -> Result<Delivery> {
        let info = match track.song_info() {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("{}", e);
                self.send_error(format!("Failed to load song: {}", track.name()))
                    .await?;
                return Ok(Delivery::Interrupted);
            }
        };
        self.writer.send(&Message::SongInfo(info)).await?;

        let samples = track.samples();
        let total = samples.len();
        let mut offset = 0;

        while offset < total {
            if self.shutting_down() {
                return Ok(Delivery::Interrupted);
            }

            let end = (offset + self.config.chunk_size).min(total);
            self.writer
                .send(&Message::SongData(samples.slice(offset..end)))
                .await?;
            self.stats.chunks_sent += 1;
            self.stats.sample_bytes_sent += (end - offset) as u64;
            offset = end;

            if offset < total && !self.config.pacing.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.pacing) => {}
                    _ = self.shutdown.changed() => return Ok(Delivery::Interrupted),
                }
            }
        }

        self.writer.send(&Message::SongDataEnd).await?;
        Ok(Delivery::Complete)
    }

    async fn send_error(&mut self, text: String) -> Result<()> {
        self.writer.send(&Message::Error(text)).await?;
        self.stats.errors_sent += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::FormatDescriptor;
    use crate::error::NetworkError;
    use crate::protocol::ControlMessage;
    use crate::tracks::MemoryCatalog;
    use tokio::io::DuplexStream;

    type Client = (MessageReader<tokio::io::ReadHalf<DuplexStream>>, MessageWriter<tokio::io::WriteHalf<DuplexStream>>);

    fn catalog() -> Arc<TrackCache> {
        let format = FormatDescriptor::cd_quality();
        let samples: Vec<u8> = (0..2_000_000u32).map(|i| (i % 253) as u8).collect();
        let catalog = MemoryCatalog::with_tracks([
            Track::new("a.wav", format, samples),
            Track::new("b.wav", format, vec![0u8; 64]),
        ]);
        Arc::new(TrackCache::new(Arc::new(catalog)))
    }

    fn connect(
        config: DeliveryConfig,
        capacity: usize,
    ) -> (
        Client,
        tokio::task::JoinHandle<Result<DeliveryStats>>,
        watch::Sender<bool>,
    ) {
        let (client, server) = tokio::io::duplex(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (server_read, server_write) = tokio::io::split(server);
        let coordinator =
            DeliveryCoordinator::new(server_read, server_write, catalog(), config, shutdown_rx);
        let task = tokio::spawn(coordinator.run());

        let (client_read, client_write) = tokio::io::split(client);
        (
            (MessageReader::new(client_read), MessageWriter::new(client_write)),
            task,
            shutdown_tx,
        )
    }

    fn unpaced() -> DeliveryConfig {
        DeliveryConfig::new(MAX_CHUNK_SIZE, Duration::ZERO).unwrap()
    }

    #[tokio::test]
    async fn test_list_request() {
        let ((mut reader, mut writer), task, _shutdown) = connect(unpaced(), 1 << 16);

        writer.send(&Message::ListRequest).await.unwrap();
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(Message::ListResponse(vec!["a.wav".into(), "b.wav".into()]))
        );

        drop(writer);
        drop(reader);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.lists_sent, 1);
    }

    #[tokio::test]
    async fn test_song_is_chunked_and_terminated() {
        let ((mut reader, mut writer), task, _shutdown) = connect(unpaced(), 1 << 20);

        writer.send(&Message::SongRequest("a.wav".into())).await.unwrap();

        let Some(Message::SongInfo(info)) = reader.read_message().await.unwrap() else {
            panic!("expected song info");
        };
        assert_eq!(info.data_len, 2_000_000);
        assert_eq!(info.format, FormatDescriptor::cd_quality());

        let mut sizes = Vec::new();
        let mut received = Vec::new();
        loop {
            match reader.read_message().await.unwrap() {
                Some(Message::SongData(chunk)) => {
                    sizes.push(chunk.len());
                    received.extend_from_slice(&chunk);
                }
                Some(Message::SongDataEnd) => break,
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(sizes.len(), 8);
        assert!(sizes[..7].iter().all(|&s| s == MAX_CHUNK_SIZE));
        assert_eq!(sizes[7], 2_000_000 - 7 * MAX_CHUNK_SIZE);
        assert!(received.iter().enumerate().all(|(i, &b)| b == (i % 253) as u8));

        drop(writer);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.songs_sent, 1);
        assert_eq!(stats.chunks_sent, 8);
        assert_eq!(stats.sample_bytes_sent, 2_000_000);
    }

    #[tokio::test]
    async fn test_errors_keep_connection_open() {
        let ((mut reader, mut writer), task, _shutdown) = connect(unpaced(), 1 << 16);

        writer.send(&Message::SongRequest("missing.wav".into())).await.unwrap();
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(Message::Error("Song not found: missing.wav".into()))
        );

        // Reserved control messages are ignored without a reply
        writer
            .send(&Message::PlayControl(ControlMessage::seek(1.0)))
            .await
            .unwrap();

        writer.send(&Message::SongRequest("b.wav".into())).await.unwrap();
        assert!(matches!(
            reader.read_message().await.unwrap(),
            Some(Message::SongInfo(_))
        ));
        assert!(matches!(
            reader.read_message().await.unwrap(),
            Some(Message::SongData(chunk)) if chunk.len() == 64
        ));
        assert_eq!(reader.read_message().await.unwrap(), Some(Message::SongDataEnd));

        drop(writer);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.errors_sent, 1);
        assert_eq!(stats.songs_sent, 1);
    }

    #[tokio::test]
    async fn test_send_failure_ends_connection() {
        let ((mut reader, mut writer), task, _shutdown) = connect(unpaced(), 4096);

        writer.send(&Message::SongRequest("a.wav".into())).await.unwrap();
        assert!(matches!(
            reader.read_message().await.unwrap(),
            Some(Message::SongInfo(_))
        ));
        drop(reader);
        drop(writer);

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::Network(NetworkError::SendFailed(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_between_chunks() {
        let config = DeliveryConfig::new(MAX_CHUNK_SIZE, Duration::from_secs(1)).unwrap();
        let ((mut reader, mut writer), task, shutdown) = connect(config, 1 << 20);

        writer.send(&Message::SongRequest("a.wav".into())).await.unwrap();
        assert!(matches!(
            reader.read_message().await.unwrap(),
            Some(Message::SongInfo(_))
        ));
        assert!(matches!(
            reader.read_message().await.unwrap(),
            Some(Message::SongData(_))
        ));

        shutdown.send(true).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.chunks_sent, 1);
        assert_eq!(stats.songs_sent, 0);
    }

    #[test]
    fn test_config_bounds() {
        assert!(DeliveryConfig::new(0, Duration::ZERO).is_err());
        assert!(DeliveryConfig::new(MAX_CHUNK_SIZE + 1, Duration::ZERO).is_err());
        assert_eq!(DeliveryConfig::default().chunk_size, MAX_CHUNK_SIZE);
    }
}
