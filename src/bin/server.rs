//! Music Server Application
//!
//! Serves the `.wav` files of one directory to clients on the LAN.
//!
//! ```text
//! server [port] [music_dir] [--config PATH]
//! ```

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_music_player::{
    config::AppConfig,
    network::MusicServer,
    tracks::{DirectoryCatalog, TrackCatalog},
};

#[derive(Debug, Default)]
struct Args {
    port: Option<u16>,
    music_dir: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut positional = 0;
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => bail!("Unknown option {}", flag),
            value => {
                match positional {
                    0 => args.port = Some(value.parse().context("Invalid port")?),
                    1 => args.music_dir = Some(PathBuf::from(value)),
                    _ => bail!("Unexpected argument {}", value),
                }
                positional += 1;
            }
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.music_dir {
        config.server.music_dir = dir;
    }
    config.validate()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Music Server");

    let catalog = Arc::new(DirectoryCatalog::new(&config.server.music_dir));

    println!("\n=== Available Songs ===");
    let songs = catalog.list_tracks();
    if songs.is_empty() {
        println!("  (none found in {})", config.server.music_dir.display());
    }
    for (i, song) in songs.iter().enumerate() {
        println!("  {}. {}", i + 1, song);
    }
    println!();

    let server = MusicServer::bind(
        (config.server.bind_address.as_str(), config.server.port),
        catalog,
        config.server.delivery()?,
    )
    .await?;

    tracing::info!(
        "Chunk size {} bytes, pacing {} ms",
        config.server.chunk_size,
        config.server.pacing_ms
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.run(shutdown_rx));

    tracing::info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    server_task.await??;

    Ok(())
}
