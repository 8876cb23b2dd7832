//! Shared cache of loaded tracks
//!
//! Each track is read from its catalogue at most once, on a blocking thread,
//! no matter how many connections ask for it at the same moment. A failed
//! load leaves no entry behind, so the next request tries again.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::catalog::TrackCatalog;
use super::track::Track;
use crate::error::TrackError;

pub struct TrackCache {
    catalog: Arc<dyn TrackCatalog>,
    entries: DashMap<String, Arc<OnceCell<Arc<Track>>>>,
}

impl TrackCache {
    pub fn new(catalog: Arc<dyn TrackCatalog>) -> Self {
        Self {
            catalog,
            entries: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn TrackCatalog> {
        &self.catalog
    }

    pub fn list_tracks(&self) -> Vec<String> {
        self.catalog.list_tracks()
    }

    /// Get a track, loading it on first use
    pub async fn get(&self, name: &str) -> Result<Arc<Track>, TrackError> {
        // Clone the cell out so no map guard is held across the await
        let cell = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                let catalog = self.catalog.clone();
                let owned = name.to_string();
                tokio::task::spawn_blocking(move || catalog.load_track(&owned))
                    .await
                    .map_err(|e| TrackError::LoadFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?
                    .map(Arc::new)
            })
            .await
            .cloned();

        if result.is_err() {
            self.entries
                .remove_if(name, |_, cell| cell.get().is_none());
        }
        result
    }

    /// Number of tracks currently held
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
