//! PCM format description and sample conversion

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Encoding of a single PCM sample on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleEncoding {
    /// 8-bit unsigned, centred on 128
    U8,
    /// 16-bit signed little-endian
    I16,
    /// 32-bit signed little-endian
    I32,
}

impl SampleEncoding {
    pub fn from_bits(bits_per_sample: u16) -> Option<Self> {
        match bits_per_sample {
            8 => Some(Self::U8),
            16 => Some(Self::I16),
            32 => Some(Self::I32),
            _ => None,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Self::U8 => 8,
            Self::I16 => 16,
            Self::I32 => 32,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }
}

/// Convert one encoded sample to a float in `[-1.0, 1.0]`.
///
/// `raw` must hold at least `encoding.bytes()` bytes; extra bytes are ignored.
#[inline]
pub fn convert_sample(encoding: SampleEncoding, raw: &[u8]) -> f32 {
    match encoding {
        SampleEncoding::U8 => (raw[0] as f32 - 128.0) / 128.0,
        SampleEncoding::I16 => i16::from_le_bytes([raw[0], raw[1]]) as f32 / 32768.0,
        SampleEncoding::I32 => {
            (i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64 / 2_147_483_648.0) as f32
        }
    }
}

/// Channel count, sample rate and bit depth of a track.
///
/// Immutable for the lifetime of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    channels: u16,
    sample_rate: u32,
    encoding: SampleEncoding,
}

impl FormatDescriptor {
    pub fn new(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Result<Self, AudioError> {
        if channels == 0 {
            return Err(AudioError::UnsupportedFormat("channel count must be at least 1".into()));
        }
        if sample_rate == 0 {
            return Err(AudioError::UnsupportedFormat("sample rate must be positive".into()));
        }
        let encoding = SampleEncoding::from_bits(bits_per_sample).ok_or_else(|| {
            AudioError::UnsupportedFormat(format!("{} bits per sample", bits_per_sample))
        })?;

        Ok(Self {
            channels,
            sample_rate,
            encoding,
        })
    }

    /// CD-quality stereo: 2 channels, 44.1 kHz, 16 bit
    pub fn cd_quality() -> Self {
        Self {
            channels: 2,
            sample_rate: 44_100,
            encoding: SampleEncoding::I16,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.encoding.bits()
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.encoding.bytes()
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.sample_rate as usize
    }

    /// Duration of `bytes` of sample data
    pub fn bytes_to_seconds(&self, bytes: usize) -> f64 {
        bytes as f64 / self.bytes_per_second() as f64
    }

    /// Frame-aligned byte offset of a position in seconds, rounding down
    pub fn seconds_to_offset(&self, seconds: f64) -> Result<usize, AudioError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(AudioError::InvalidPosition(seconds));
        }
        let raw = (seconds * self.bytes_per_second() as f64).floor();
        if raw >= usize::MAX as f64 {
            return Err(AudioError::InvalidPosition(seconds));
        }
        Ok(self.align_down(raw as usize))
    }

    /// Round a byte offset down to a frame boundary
    #[inline]
    pub fn align_down(&self, offset: usize) -> usize {
        let bytes_per_frame = self.bytes_per_frame();
        offset / bytes_per_frame * bytes_per_frame
    }
}
