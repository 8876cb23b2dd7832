//! End-to-end tests over loopback TCP: a real server, real sockets and a
//! client whose output periods are pulled by hand.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use lan_music_player::{
    audio::{FormatDescriptor, PullOutput},
    codec::MAX_CHUNK_SIZE,
    config::ClientConfig,
    network::{DeliveryConfig, MessageReader, MessageWriter, MusicClient, MusicServer},
    protocol::Message,
    session::{ClientEvent, ClientState},
    tracks::{MemoryCatalog, Track},
    Result,
};

const TRACK_BYTES: usize = 2_000_000;

/// 16-bit stereo samples with a recognisable ramp
fn ramp_samples(len: usize) -> Vec<u8> {
    (0..len / 2)
        .flat_map(|i| ((i % 65_536) as u16 as i16).to_le_bytes())
        .collect()
}

fn catalog() -> Arc<MemoryCatalog> {
    let format = FormatDescriptor::new(2, 44_100, 16).unwrap();
    Arc::new(MemoryCatalog::with_tracks([
        Track::new("long.wav", format, ramp_samples(TRACK_BYTES)),
        Track::new("short.wav", format, ramp_samples(4_000)),
    ]))
}

struct RunningServer {
    port: u16,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl RunningServer {
    async fn start() -> Self {
        let delivery = DeliveryConfig::new(MAX_CHUNK_SIZE, Duration::ZERO).unwrap();
        let server = MusicServer::bind(("127.0.0.1", 0), catalog(), delivery)
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(server.run(shutdown_rx));
        Self { port, shutdown, task }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_port: self.port,
            ..ClientConfig::default()
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for a client event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_raw_protocol_list_and_chunking() {
    let server = RunningServer::start().await;

    let stream = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();
    let (read, write) = stream.into_split();
    let mut reader = MessageReader::new(read);
    let mut writer = MessageWriter::new(write);

    writer.send(&Message::ListRequest).await.unwrap();
    assert_eq!(
        reader.read_message().await.unwrap(),
        Some(Message::ListResponse(vec!["long.wav".into(), "short.wav".into()]))
    );

    writer.send(&Message::SongRequest("long.wav".into())).await.unwrap();
    let Some(Message::SongInfo(info)) = reader.read_message().await.unwrap() else {
        panic!("expected SONG_INFO first");
    };
    assert_eq!(info.data_len as usize, TRACK_BYTES);
    assert_eq!(info.format.bytes_per_frame(), 4);

    let mut chunks = Vec::new();
    loop {
        match reader.read_message().await.unwrap() {
            Some(Message::SongData(chunk)) => chunks.push(chunk),
            Some(Message::SongDataEnd) => break,
            other => panic!("unexpected message {:?}", other),
        }
    }
    // Seven full chunks and one partial
    assert_eq!(chunks.len(), 8);
    assert!(chunks[..7].iter().all(|c| c.len() == MAX_CHUNK_SIZE));
    assert_eq!(chunks[7].len(), TRACK_BYTES - 7 * MAX_CHUNK_SIZE);
    let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
    assert_eq!(joined, ramp_samples(TRACK_BYTES));

    writer.send(&Message::SongRequest("missing.wav".into())).await.unwrap();
    assert_eq!(
        reader.read_message().await.unwrap(),
        Some(Message::Error("Song not found: missing.wav".into()))
    );

    // Still usable after the error
    writer.send(&Message::ListRequest).await.unwrap();
    assert!(matches!(
        reader.read_message().await.unwrap(),
        Some(Message::ListResponse(_))
    ));

    drop(writer);
    assert_eq!(reader.read_message().await.unwrap(), None);
    server.stop().await;
}

#[tokio::test]
async fn test_client_buffers_then_plays_whole_track() {
    let server = RunningServer::start().await;
    let output = PullOutput::new();
    let (client, mut events) = MusicClient::connect(&server.client_config(), Box::new(output.clone()))
        .await
        .unwrap();

    client.request_song_list().await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::SongList(vec!["long.wav".into(), "short.wav".into()])
    );

    client.request_song("long.wav").await.unwrap();
    assert!(matches!(next_event(&mut events).await, ClientEvent::SongInfo { .. }));
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::PlaybackStarted { name: "long.wav".into() }
    );
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::StreamComplete {
            name: "long.wav".into(),
            bytes: TRACK_BYTES
        }
    );
    assert_eq!(client.state(), ClientState::Streaming);
    assert!((client.duration_seconds() - TRACK_BYTES as f64 / 176_400.0).abs() < 1e-9);

    let expected: Vec<f32> = ramp_samples(TRACK_BYTES)
        .chunks_exact(2)
        .map(|s| i16::from_le_bytes([s[0], s[1]]) as f32 / 32768.0)
        .collect();

    let total_frames = TRACK_BYTES / 4;
    let mut rendered = Vec::with_capacity(expected.len());
    while rendered.len() < expected.len() {
        rendered.extend(output.pull(4_096));
        let frames_played = (client.position_seconds() * 44_100.0).round() as usize;
        assert!(frames_played <= total_frames);
    }

    assert_eq!(&rendered[..expected.len()], &expected[..]);
    assert!(rendered[expected.len()..].iter().all(|s| *s == 0.0));
    assert_eq!(client.state(), ClientState::Idle);
    assert!(!client.is_playing());

    // Played to the end, so play restarts from the top
    client.play().unwrap();
    assert_eq!(output.pull(2), expected[..4].to_vec());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_small_track_plays_after_end_of_stream() {
    let server = RunningServer::start().await;
    let output = PullOutput::new();
    let (client, mut events) = MusicClient::connect(&server.client_config(), Box::new(output.clone()))
        .await
        .unwrap();

    client.request_song("short.wav").await.unwrap();
    assert!(matches!(next_event(&mut events).await, ClientEvent::SongInfo { .. }));
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::PlaybackStarted { name: "short.wav".into() }
    );
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::StreamComplete { bytes: 4_000, .. }
    ));

    let samples = output.pull(1_000);
    assert_eq!(samples.len(), 2_000);
    assert_eq!(samples[1], 1.0 / 32768.0);

    client.request_song("nope.wav").await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::ServerError("Song not found: nope.wav".into())
    );
    assert!(client.is_connected());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn test_clients_are_independent_and_see_shutdown() {
    let server = RunningServer::start().await;
    let config = server.client_config();

    let (first, mut first_events) = MusicClient::connect(&config, Box::new(PullOutput::new()))
        .await
        .unwrap();
    let (second, mut second_events) = MusicClient::connect(&config, Box::new(PullOutput::new()))
        .await
        .unwrap();

    first.request_song("short.wav").await.unwrap();
    second.request_song_list().await.unwrap();

    assert!(matches!(next_event(&mut first_events).await, ClientEvent::SongInfo { .. }));
    assert!(matches!(next_event(&mut second_events).await, ClientEvent::SongList(_)));

    server.stop().await;

    loop {
        if next_event(&mut second_events).await == ClientEvent::Disconnected {
            break;
        }
    }
    assert!(!second.is_connected());

    first.disconnect().await;
    second.disconnect().await;
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = ClientConfig {
        server_port: port,
        ..ClientConfig::default()
    };
    assert!(MusicClient::connect(&config, Box::new(PullOutput::new())).await.is_err());
}
