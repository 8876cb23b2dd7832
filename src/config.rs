//! Application configuration
//!
//! Loaded from TOML. Every field has a default, so an absent file or a file
//! with only a few keys is fine.
//!
//! ```toml
//! [server]
//! port = 8080
//! music_dir = "./music"
//! pacing_ms = 10
//!
//! [client]
//! server_host = "192.168.1.20"
//! buffering_threshold_bytes = 1048576
//!
//! [logging]
//! level = "debug"
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::MAX_CHUNK_SIZE;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::network::sender::DeliveryConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub music_dir: PathBuf,
    /// Bytes per SONG_DATA message
    pub chunk_size: usize,
    /// Delay between chunks in milliseconds; 0 disables pacing
    pub pacing_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            music_dir: PathBuf::from(DEFAULT_MUSIC_DIR),
            chunk_size: DEFAULT_CHUNK_SIZE,
            pacing_ms: DEFAULT_PACING_MS,
        }
    }
}

impl ServerConfig {
    pub fn delivery(&self) -> Result<DeliveryConfig> {
        DeliveryConfig::new(self.chunk_size, Duration::from_millis(self.pacing_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Playback starts once more than this many bytes are buffered
    pub buffering_threshold_bytes: usize,
    /// Output device name; the default device when unset
    pub output_device: Option<String>,
    /// Longest wait accepted for a synchronised start
    pub max_sync_wait_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: DEFAULT_PORT,
            buffering_threshold_bytes: DEFAULT_BUFFERING_THRESHOLD,
            output_device: None,
            max_sync_wait_ms: DEFAULT_MAX_SYNC_WAIT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    pub fn max_sync_wait(&self) -> Duration {
        Duration::from_millis(self.max_sync_wait_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    ///
    /// A missing default file gives the default configuration; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// `config.toml` in the platform configuration directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "lan-music", "lan-music-player")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.chunk_size == 0 || self.server.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "server.chunk_size must be between 1 and {}",
                MAX_CHUNK_SIZE
            )));
        }
        if self.client.server_host.trim().is_empty() {
            return Err(Error::Config("client.server_host is empty".into()));
        }
        if self.client.server_port == 0 {
            return Err(Error::Config("client.server_port must not be 0".into()));
        }
        if self.client.connect_timeout_ms == 0 {
            return Err(Error::Config("client.connect_timeout_ms must not be 0".into()));
        }
        Ok(())
    }
}
