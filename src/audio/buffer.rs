//! Append-only playback buffer shared by the receive and render actors
//!
//! This is a single-producer single-consumer (SPSC) structure. The producer
//! (network receive actor) appends through the unique [`BufferWriter`] and then
//! publishes the new committed length with release ordering. The consumer
//! (real-time render callback) loads the committed length with acquire ordering
//! and only reads bytes below it.
//!
//! Storage is a fixed table of lazily allocated segments. A segment is never
//! moved or freed while the buffer lives, so the reader can never observe
//! memory the writer relocates. Bytes live in atomic cells, which keeps the
//! concurrent write/read pair free of data races without `unsafe`.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::AudioError;

/// Size of one storage segment in bytes (power of two)
pub const SEGMENT_SIZE: usize = 64 * 1024;

const SEGMENT_SHIFT: u32 = SEGMENT_SIZE.trailing_zeros();
const SEGMENT_MASK: usize = SEGMENT_SIZE - 1;

type Segment = Box<[AtomicU8]>;

fn allocate_segment() -> Segment {
    (0..SEGMENT_SIZE).map(|_| AtomicU8::new(0)).collect()
}

/// Raw sample storage with an atomically published committed length and a
/// frame-aligned read cursor.
pub struct PlaybackBuffer {
    segments: Box<[OnceLock<Segment>]>,
    capacity: usize,
    bytes_per_frame: usize,
    committed: CachePadded<AtomicUsize>,
    cursor: CachePadded<AtomicUsize>,
    underrun_count: AtomicUsize,
}

impl PlaybackBuffer {
    /// Create a buffer able to hold `capacity` bytes, and its only writer.
    pub fn new(capacity: usize, bytes_per_frame: usize) -> (Arc<Self>, BufferWriter) {
        let segment_count = capacity.div_ceil(SEGMENT_SIZE);
        let segments = (0..segment_count).map(|_| OnceLock::new()).collect();

        let buffer = Arc::new(Self {
            segments,
            capacity,
            bytes_per_frame: bytes_per_frame.max(1),
            committed: CachePadded::new(AtomicUsize::new(0)),
            cursor: CachePadded::new(AtomicUsize::new(0)),
            underrun_count: AtomicUsize::new(0),
        });

        let writer = BufferWriter {
            buffer: buffer.clone(),
        };
        (buffer, writer)
    }

    /// Get buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// Length of the prefix that is fully written and safe to read
    #[inline]
    pub fn committed_len(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    /// Current read offset, always frame aligned
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Committed bytes not yet consumed by the cursor
    pub fn remaining(&self) -> usize {
        self.committed_len().saturating_sub(self.cursor())
    }

    /// Check if every declared byte has been committed
    pub fn is_full(&self) -> bool {
        self.committed_len() == self.capacity
    }

    /// Copy committed bytes starting at `offset` into `dst`.
    ///
    /// Returns the number of bytes copied, which is short only when the
    /// committed length ends inside the requested range. Never blocks or
    /// allocates.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> usize {
        let committed = self.committed_len();
        if offset >= committed {
            return 0;
        }
        let len = dst.len().min(committed - offset);

        let mut copied = 0;
        while copied < len {
            let position = offset + copied;
            let Some(segment) = self.segments[position >> SEGMENT_SHIFT].get() else {
                break;
            };
            let inner = position & SEGMENT_MASK;
            let count = (SEGMENT_SIZE - inner).min(len - copied);

            for (out, cell) in dst[copied..copied + count]
                .iter_mut()
                .zip(&segment[inner..inner + count])
            {
                *out = cell.load(Ordering::Relaxed);
            }
            copied += count;
        }
        copied
    }

    /// Move the cursor to `offset`, rounded down to a frame boundary.
    ///
    /// Offsets past the committed length are rejected and leave the cursor
    /// where it was.
    pub fn seek_to(&self, offset: usize) -> Result<usize, AudioError> {
        let committed = self.committed_len();
        if offset > committed {
            return Err(AudioError::SeekOutOfRange {
                requested: offset,
                committed,
            });
        }
        let aligned = offset / self.bytes_per_frame * self.bytes_per_frame;
        self.cursor.store(aligned, Ordering::Release);
        Ok(aligned)
    }

    /// Reset the cursor to the start of the track
    pub fn rewind(&self) {
        self.cursor.store(0, Ordering::Release);
    }

    /// Advance the cursor from `from` to `to` unless someone else moved it.
    ///
    /// Returns false when a concurrent seek or stop won; the render actor then
    /// leaves the cursor alone and picks up the new position next period.
    #[inline]
    pub fn advance_cursor(&self, from: usize, to: usize) -> bool {
        debug_assert!(to <= self.committed_len());
        self.cursor
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Count a render period that ran out of committed data
    pub fn record_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get underrun count
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PlaybackBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackBuffer")
            .field("capacity", &self.capacity)
            .field("committed", &self.committed_len())
            .field("cursor", &self.cursor())
            .finish()
    }
}

/// The only handle that can append to a [`PlaybackBuffer`]
pub struct BufferWriter {
    buffer: Arc<PlaybackBuffer>,
}

impl BufferWriter {
    /// Append `data` and publish it.
    ///
    /// Nothing is committed if the data would not fit in the declared
    /// capacity. Returns the new committed length.
    pub fn append(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        let buffer = &*self.buffer;
        // Only this writer stores to `committed`
        let start = buffer.committed.load(Ordering::Relaxed);
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= buffer.capacity)
            .ok_or(AudioError::BufferOverflow {
                capacity: buffer.capacity,
                attempted: start.saturating_add(data.len()),
            })?;

        let mut written = 0;
        while written < data.len() {
            let position = start + written;
            let segment = buffer.segments[position >> SEGMENT_SHIFT].get_or_init(allocate_segment);
            let inner = position & SEGMENT_MASK;
            let count = (SEGMENT_SIZE - inner).min(data.len() - written);

            for (cell, byte) in segment[inner..inner + count]
                .iter()
                .zip(&data[written..written + count])
            {
                cell.store(*byte, Ordering::Relaxed);
            }
            written += count;
        }

        buffer.committed.store(end, Ordering::Release);
        Ok(end)
    }

    pub fn committed_len(&self) -> usize {
        self.buffer.committed_len()
    }

    pub fn buffer(&self) -> &Arc<PlaybackBuffer> {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    #[test]
    fn test_append_and_read_across_segments() {
        let (buffer, mut writer) = PlaybackBuffer::new(3 * SEGMENT_SIZE, 4);

        let data: Vec<u8> = (0..SEGMENT_SIZE + 100).map(|i| (i % 251) as u8).collect();
        assert_eq!(writer.append(&data).unwrap(), data.len());
        assert_eq!(buffer.committed_len(), data.len());

        let mut out = vec![0u8; 200];
        let copied = buffer.read(SEGMENT_SIZE - 100, &mut out);
        assert_eq!(copied, 200);
        assert_eq!(&out[..], &data[SEGMENT_SIZE - 100..SEGMENT_SIZE + 100]);

        // Reads stop at the committed length
        let copied = buffer.read(data.len() - 10, &mut out);
        assert_eq!(copied, 10);
        assert_eq!(buffer.read(data.len(), &mut out), 0);
    }

    #[test]
    fn test_overflow_commits_nothing() {
        let (buffer, mut writer) = PlaybackBuffer::new(8, 4);
        writer.append(&[1, 2, 3, 4]).unwrap();

        let result = writer.append(&[0; 5]);
        assert!(matches!(
            result,
            Err(AudioError::BufferOverflow { capacity: 8, attempted: 9 })
        ));
        assert_eq!(buffer.committed_len(), 4);

        writer.append(&[5, 6, 7, 8]).unwrap();
        assert!(buffer.is_full());
    }

    #[test]
    fn test_seek_rules() {
        let (buffer, mut writer) = PlaybackBuffer::new(64, 4);
        writer.append(&[0; 40]).unwrap();

        assert_eq!(buffer.seek_to(10).unwrap(), 8);
        assert_eq!(buffer.seek_to(40).unwrap(), 40);

        assert!(buffer.seek_to(41).is_err());
        assert_eq!(buffer.cursor(), 40);

        buffer.rewind();
        assert_eq!(buffer.cursor(), 0);
    }

    #[test]
    fn test_advance_loses_to_concurrent_seek() {
        let (buffer, mut writer) = PlaybackBuffer::new(64, 4);
        writer.append(&[0; 64]).unwrap();

        let observed = buffer.cursor();
        buffer.seek_to(32).unwrap();
        assert!(!buffer.advance_cursor(observed, observed + 16));
        assert_eq!(buffer.cursor(), 32);

        assert!(buffer.advance_cursor(32, 48));
        assert_eq!(buffer.cursor(), 48);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        const TOTAL: usize = 4 * SEGMENT_SIZE + 123;
        let (buffer, mut writer) = PlaybackBuffer::new(TOTAL, 1);

        let producer = thread::spawn(move || {
            let data: Vec<u8> = (0..TOTAL).map(|i| (i % 253) as u8).collect();
            for chunk in data.chunks(1000) {
                writer.append(chunk).unwrap();
            }
        });

        let mut position = 0;
        let mut last_committed = 0;
        let mut scratch = [0u8; 512];
        while position < TOTAL {
            let committed = buffer.committed_len();
            assert!(committed >= last_committed);
            last_committed = committed;

            let copied = buffer.read(position, &mut scratch);
            for (i, byte) in scratch[..copied].iter().enumerate() {
                assert_eq!(*byte, ((position + i) % 253) as u8);
            }
            position += copied;
            assert!(position <= buffer.committed_len());
            thread::yield_now();
        }

        producer.join().unwrap();
        assert!(buffer.is_full());
    }

    proptest! {
        #[test]
        fn prop_seek_lands_on_frame_boundary(
            committed in 0usize..10_000,
            bytes_per_frame in 1usize..12,
            offset in 0usize..12_000,
        ) {
            let (buffer, mut writer) = PlaybackBuffer::new(10_000, bytes_per_frame);
            writer.append(&vec![0u8; committed]).unwrap();
            let before = buffer.cursor();

            match buffer.seek_to(offset) {
                Ok(landed) => {
                    prop_assert!(offset <= committed);
                    prop_assert_eq!(landed, offset / bytes_per_frame * bytes_per_frame);
                    prop_assert_eq!(buffer.cursor(), landed);
                }
                Err(_) => {
                    prop_assert!(offset > committed);
                    prop_assert_eq!(buffer.cursor(), before);
                }
            }
            prop_assert!(buffer.cursor() <= buffer.committed_len());
        }
    }
}
