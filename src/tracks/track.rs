//! A loaded track

use bytes::Bytes;

use crate::audio::format::FormatDescriptor;
use crate::error::TrackError;
use crate::protocol::SongInfo;

/// A track held in memory: its format and raw interleaved sample bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    name: String,
    format: FormatDescriptor,
    samples: Bytes,
}

impl Track {
    pub fn new(name: impl Into<String>, format: FormatDescriptor, samples: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            format,
            samples: samples.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Sample bytes; slicing the returned `Bytes` does not copy
    pub fn samples(&self) -> &Bytes {
        &self.samples
    }

    pub fn data_len(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.format.bytes_to_seconds(self.samples.len())
    }

    /// Format record announced before the samples are sent
    pub fn song_info(&self) -> Result<SongInfo, TrackError> {
        let data_len = u32::try_from(self.samples.len()).map_err(|_| TrackError::LoadFailed {
            name: self.name.clone(),
            reason: format!("{} sample bytes do not fit a format record", self.samples.len()),
        })?;
        Ok(SongInfo {
            format: self.format,
            data_len,
        })
    }
}
