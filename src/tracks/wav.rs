//! RIFF/WAVE parsing and writing
//!
//! Only uncompressed PCM is accepted. Chunks are walked in file order until
//! `data`, so files with `LIST`, `fact` or other metadata chunks before the
//! samples load fine.

use bytes::{BufMut, BytesMut};
use std::ops::Range;

use crate::audio::format::FormatDescriptor;
use crate::error::TrackError;

const FORMAT_PCM: u16 = 1;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Result of parsing a WAV file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavLayout {
    pub format: FormatDescriptor,
    /// Byte range of the sample data within the file
    pub data: Range<usize>,
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Parse a complete WAV file held in memory
pub fn parse_wav(bytes: &[u8]) -> Result<WavLayout, TrackError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(TrackError::InvalidWav("missing RIFF/WAVE header".into()));
    }

    let mut format = None;
    let mut pos = 12;

    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32(bytes, pos + 4) as usize;
        let body = pos + 8;

        match id {
            b"fmt " => {
                if size < 16 || body + size > bytes.len() {
                    return Err(TrackError::InvalidWav(format!("fmt chunk of {} bytes", size)));
                }
                format = Some(parse_fmt(&bytes[body..body + size])?);
            }
            b"data" => {
                let Some(format) = format else {
                    return Err(TrackError::InvalidWav("data chunk before fmt chunk".into()));
                };
                let end = body
                    .checked_add(size)
                    .filter(|&end| end <= bytes.len())
                    .ok_or_else(|| {
                        TrackError::InvalidWav(format!(
                            "data chunk claims {} bytes, {} present",
                            size,
                            bytes.len() - body
                        ))
                    })?;
                return Ok(WavLayout {
                    format,
                    data: body..end,
                });
            }
            _ => {}
        }

        // Chunks are word aligned
        pos = body.saturating_add(size).saturating_add(size & 1);
    }

    Err(TrackError::InvalidWav("no data chunk".into()))
}

fn parse_fmt(chunk: &[u8]) -> Result<FormatDescriptor, TrackError> {
    let tag = read_u16(chunk, 0);
    let channels = read_u16(chunk, 2);
    let sample_rate = read_u32(chunk, 4);
    let bits_per_sample = read_u16(chunk, 14);

    if tag != FORMAT_PCM && tag != FORMAT_EXTENSIBLE {
        return Err(TrackError::InvalidWav(format!(
            "format tag {:#06x} is not PCM",
            tag
        )));
    }

    FormatDescriptor::new(channels, sample_rate, bits_per_sample)
        .map_err(|e| TrackError::InvalidWav(e.to_string()))
}

/// Build a canonical 44-byte-header PCM WAV file
pub fn encode_wav(format: &FormatDescriptor, samples: &[u8]) -> Vec<u8> {
    let block_align = format.bytes_per_frame() as u16;
    let byte_rate = format.bytes_per_second() as u32;
    let data_len = samples.len() as u32;

    let mut out = BytesMut::with_capacity(44 + samples.len());
    out.put_slice(b"RIFF");
    out.put_u32_le(36u32.saturating_add(data_len));
    out.put_slice(b"WAVE");

    out.put_slice(b"fmt ");
    out.put_u32_le(16);
    out.put_u16_le(FORMAT_PCM);
    out.put_u16_le(format.channels());
    out.put_u32_le(format.sample_rate());
    out.put_u32_le(byte_rate);
    out.put_u16_le(block_align);
    out.put_u16_le(format.bits_per_sample());

    out.put_slice(b"data");
    out.put_u32_le(data_len);
    out.put_slice(samples);
    out.to_vec()
}
