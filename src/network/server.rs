//! TCP accept loop
//!
//! Each accepted connection runs its own [`DeliveryCoordinator`] task inside
//! a `JoinSet`. Finished tasks are reaped while accepting; on shutdown every
//! task is told through the watch channel and joined before `run` returns.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use super::sender::{DeliveryConfig, DeliveryCoordinator};
use crate::error::{NetworkError, Result};
use crate::tracks::{TrackCache, TrackCatalog};

/// Connection counters, readable while the server runs
#[derive(Debug, Default)]
pub struct ServerStats {
    active: AtomicUsize,
    accepted: AtomicU64,
    failed: AtomicU64,
}

impl ServerStats {
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections that ended with a transport or protocol fault
    pub fn failed_connections(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct MusicServer {
    listener: TcpListener,
    cache: Arc<TrackCache>,
    delivery: DeliveryConfig,
    stats: Arc<ServerStats>,
}

impl MusicServer {
    /// Bind the listening socket
    pub async fn bind(
        addr: impl ToSocketAddrs,
        catalog: Arc<dyn TrackCatalog>,
        delivery: DeliveryConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        Ok(Self {
            listener,
            cache: Arc::new(TrackCache::new(catalog)),
            delivery,
            stats: Arc::new(ServerStats::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn cache(&self) -> &Arc<TrackCache> {
        &self.cache
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    pub fn active_connections(&self) -> usize {
        self.stats.active_connections()
    }

    /// Accept and serve clients until `shutdown` becomes true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut connections = JoinSet::new();
        tracing::info!("Server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
                    }

                    let (read, write) = stream.into_split();
                    let coordinator = DeliveryCoordinator::new(
                        read,
                        write,
                        self.cache.clone(),
                        self.delivery,
                        shutdown.clone(),
                    );
                    let span = tracing::info_span!("peer", id = %coordinator.peer_id(), %peer);
                    let stats = self.stats.clone();

                    stats.active.fetch_add(1, Ordering::Relaxed);
                    stats.accepted.fetch_add(1, Ordering::Relaxed);
                    connections.spawn(
                        async move {
                            tracing::info!("Client connected");
                            match coordinator.run().await {
                                Ok(delivered) => tracing::info!(
                                    songs = delivered.songs_sent,
                                    bytes = delivered.sample_bytes_sent,
                                    "Session ended"
                                ),
                                Err(e) => {
                                    stats.failed.fetch_add(1, Ordering::Relaxed);
                                    tracing::error!("Session terminated: {}", e);
                                }
                            }
                            stats.active.fetch_sub(1, Ordering::Relaxed);
                        }
                        .instrument(span),
                    );
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }
            }
        }

        tracing::info!(
            "Shutting down, waiting for {} connections",
            connections.len()
        );
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Connection task failed: {}", e);
            }
        }
        tracing::info!("Server stopped");
        Ok(())
    }
}
