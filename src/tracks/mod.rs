//! Track catalogue, WAV loading and the shared track cache

pub mod cache;
pub mod catalog;
pub mod track;
pub mod wav;

pub use cache::TrackCache;
pub use catalog::{DirectoryCatalog, MemoryCatalog, TrackCatalog};
pub use track::Track;
