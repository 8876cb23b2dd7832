//! Track catalogues
//!
//! The sender only needs two things from a catalogue: the names it can
//! offer, and the samples behind one of those names.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::track::Track;
use super::wav::parse_wav;
use crate::error::TrackError;

/// Source of tracks offered to clients
pub trait TrackCatalog: Send + Sync {
    /// Names of all available tracks, in a stable order
    fn list_tracks(&self) -> Vec<String>;

    /// Load a track by its exact listed name
    fn load_track(&self, name: &str) -> Result<Track, TrackError>;
}

/// Catalogue of the `.wav` files in one directory
pub struct DirectoryCatalog {
    dir: PathBuf,
    names: RwLock<Vec<String>>,
}

impl DirectoryCatalog {
    /// Open `dir` and scan it.
    ///
    /// A missing or unreadable directory yields an empty catalogue and a
    /// warning, so the server can still start and answer list requests.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let catalog = Self {
            dir: dir.into(),
            names: RwLock::new(Vec::new()),
        };
        if let Err(e) = catalog.rescan() {
            tracing::warn!("Could not scan music directory {}: {}", catalog.dir.display(), e);
        }
        catalog
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read the directory; returns the number of tracks found
    pub fn rescan(&self) -> std::io::Result<usize> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.len() > 4 && name.ends_with(".wav") {
                names.push(name);
            }
        }
        names.sort();

        tracing::info!("Found {} songs in {}", names.len(), self.dir.display());
        let count = names.len();
        *self.names.write() = names;
        Ok(count)
    }
}

impl TrackCatalog for DirectoryCatalog {
    fn list_tracks(&self) -> Vec<String> {
        self.names.read().clone()
    }

    fn load_track(&self, name: &str) -> Result<Track, TrackError> {
        // Only scanned names resolve, so a request can never leave the directory
        if !self.names.read().iter().any(|n| n == name) {
            return Err(TrackError::NotFound(name.to_string()));
        }

        let path = self.dir.join(name);
        let load_failed = |reason: String| TrackError::LoadFailed {
            name: name.to_string(),
            reason,
        };

        let bytes = std::fs::read(&path).map_err(|e| load_failed(e.to_string()))?;
        let layout = parse_wav(&bytes).map_err(|e| load_failed(e.to_string()))?;

        let track = Track::new(name, layout.format, bytes::Bytes::from(bytes).slice(layout.data));
        tracing::info!(
            "Loaded {}: {} channels, {} Hz, {} bits, {:.2} seconds",
            name,
            track.format().channels(),
            track.format().sample_rate(),
            track.format().bits_per_sample(),
            track.duration_seconds()
        );
        Ok(track)
    }
}

/// Catalogue of tracks already in memory
#[derive(Default)]
pub struct MemoryCatalog {
    tracks: RwLock<BTreeMap<String, Track>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(tracks: impl IntoIterator<Item = Track>) -> Self {
        let catalog = Self::new();
        for track in tracks {
            catalog.insert(track);
        }
        catalog
    }

    /// Add or replace a track
    pub fn insert(&self, track: Track) {
        self.tracks.write().insert(track.name().to_string(), track);
    }
}

impl TrackCatalog for MemoryCatalog {
    fn list_tracks(&self) -> Vec<String> {
        self.tracks.read().keys().cloned().collect()
    }

    fn load_track(&self, name: &str) -> Result<Track, TrackError> {
        self.tracks
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TrackError::NotFound(name.to_string()))
    }
}
