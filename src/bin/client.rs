//! Music Client Application
//!
//! Connects to a music server, lists its songs and plays one.
//!
//! ```text
//! client [host] [port] [song] [--config PATH] [--sync-at RFC3339|EPOCH_MS]
//!        [--position SECONDS] [--null-output]
//! ```
//!
//! `song` is a name or a 1-based index into the server's list. With
//! `--sync-at`, playback starts at that wall-clock instant, so several
//! clients given the same instant play in step.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_music_player::{
    audio::{device::list_output_devices, CpalOutput, NullOutput, OutputDriver},
    config::AppConfig,
    constants::NULL_OUTPUT_PERIOD_FRAMES,
    network::MusicClient,
    session::{ClientEvent, ClientState, SyncPoint},
};

#[derive(Debug, Default)]
struct Args {
    host: Option<String>,
    port: Option<u16>,
    song: Option<String>,
    config: Option<PathBuf>,
    sync_at_millis: Option<i64>,
    position: Option<f64>,
    null_output: bool,
}

/// Parse epoch milliseconds or an RFC 3339 timestamp
fn parse_instant(text: &str) -> Result<i64> {
    if let Ok(millis) = text.parse::<i64>() {
        return Ok(millis);
    }
    let instant = chrono::DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("Invalid --sync-at value {}", text))?;
    Ok(instant.timestamp_millis())
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut positional = 0;
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                args.config = Some(PathBuf::from(iter.next().context("--config needs a path")?));
            }
            "--sync-at" => {
                let value = iter.next().context("--sync-at needs a time")?;
                args.sync_at_millis = Some(parse_instant(&value)?);
            }
            "--position" => {
                let value = iter.next().context("--position needs seconds")?;
                args.position = Some(value.parse().context("Invalid --position")?);
            }
            "--null-output" => args.null_output = true,
            flag if flag.starts_with("--") => bail!("Unknown option {}", flag),
            value => {
                match positional {
                    0 => args.host = Some(value.to_string()),
                    1 => args.port = Some(value.parse().context("Invalid port")?),
                    2 => args.song = Some(value.to_string()),
                    _ => bail!("Unexpected argument {}", value),
                }
                positional += 1;
            }
        }
    }
    Ok(args)
}

/// Resolve a song argument: a listed name, or a 1-based index
fn resolve_song(arg: &str, songs: &[String]) -> Option<String> {
    if songs.iter().any(|s| s == arg) {
        return Some(arg.to_string());
    }
    let index: usize = arg.parse().ok()?;
    songs.get(index.checked_sub(1)?).cloned()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host.clone() {
        config.client.server_host = host;
    }
    if let Some(port) = args.port {
        config.client.server_port = port;
    }
    config.validate()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Music Client");

    let driver: Box<dyn OutputDriver> = if args.null_output {
        Box::new(NullOutput::new(NULL_OUTPUT_PERIOD_FRAMES))
    } else {
        println!("\n=== Available Output Devices ===");
        for device in list_output_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
        Box::new(CpalOutput::new(config.client.output_device.clone()))
    };

    let (client, mut events) = MusicClient::connect(&config.client, driver).await?;
    client.request_song_list().await?;

    let songs = loop {
        match events.recv().await {
            Some(ClientEvent::SongList(songs)) => break songs,
            Some(ClientEvent::Disconnected) | None => bail!("Server closed the connection"),
            Some(other) => tracing::debug!("Waiting for song list, got {:?}", other),
        }
    };

    println!("\n=== Songs on {} ===", config.client.server_host);
    for (i, song) in songs.iter().enumerate() {
        println!("  {}. {}", i + 1, song);
    }
    println!();

    let Some(song_arg) = args.song.as_deref() else {
        client.disconnect().await;
        return Ok(());
    };
    let Some(song) = resolve_song(song_arg, &songs) else {
        client.disconnect().await;
        bail!("No song named or numbered {}", song_arg);
    };

    match args.sync_at_millis {
        Some(at) => {
            let point = SyncPoint::new(at, args.position.unwrap_or(0.0));
            client.request_song_synced(&song, point).await?;
        }
        None => client.request_song(&song).await?,
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut started = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Some(ClientEvent::SongInfo { name, info }) => {
                    println!(
                        "{}: {} channels, {} Hz, {} bits, {:.1} seconds",
                        name,
                        info.format.channels(),
                        info.format.sample_rate(),
                        info.format.bits_per_sample(),
                        info.duration_seconds()
                    );
                }
                Some(ClientEvent::SyncScheduled { point, .. }) => {
                    println!("Buffered, starting at {} ms", point.target_wall_clock_millis);
                }
                Some(ClientEvent::PlaybackStarted { name }) => {
                    println!("Playing {}", name);
                    started = true;
                    if let (Some(position), None) = (args.position, args.sync_at_millis) {
                        if let Err(e) = client.seek(position) {
                            tracing::warn!("Could not seek to {} seconds: {}", position, e);
                        }
                    }
                }
                Some(ClientEvent::StreamComplete { bytes, .. }) => {
                    tracing::info!("Download complete ({} bytes)", bytes);
                }
                Some(ClientEvent::ServerError(text)) => {
                    eprintln!("Server error: {}", text);
                    break;
                }
                Some(ClientEvent::SongList(_)) => {}
                Some(ClientEvent::Disconnected) | None => {
                    println!("Disconnected from server");
                    break;
                }
            },
            _ = ticker.tick() => {
                while let Some(e) = client.take_output_error() {
                    tracing::error!("Audio output error: {}", e);
                }
                if started && client.state() == ClientState::Idle {
                    println!("Finished");
                    break;
                }
                tracing::debug!(
                    "Position {:.1}/{:.1} s, buffered {:.1} s",
                    client.position_seconds(),
                    client.duration_seconds(),
                    client.buffered_seconds()
                );
            }
        }
    }

    let stats = client.engine_stats();
    tracing::info!(
        periods = stats.periods,
        frames = stats.frames_rendered,
        silent = stats.silent_periods,
        underruns = stats.exhausted_periods,
        "Playback finished"
    );
    client.disconnect().await;
    Ok(())
}
