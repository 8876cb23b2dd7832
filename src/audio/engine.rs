//! Real-time playback engine
//!
//! [`PlaybackEngine::render`] is called by the output driver once per device
//! period. It never blocks, locks or allocates: it snapshots the current
//! session, converts whatever whole frames are committed and fills the rest of
//! the period with silence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::format::convert_sample;
use crate::session::SessionSlot;

/// Result of one render period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// No session, not playing, or nothing left to play
    Silence,
    /// Every requested frame came from the buffer
    Rendered { frames: usize },
    /// The buffer ran out part way through the period
    Exhausted { frames: usize, completed: bool },
}

/// Counters shared with the rest of the client
#[derive(Debug, Default)]
pub struct EngineStats {
    periods: AtomicU64,
    frames_rendered: AtomicU64,
    silent_periods: AtomicU64,
    exhausted_periods: AtomicU64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            periods: self.periods.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            silent_periods: self.silent_periods.load(Ordering::Relaxed),
            exhausted_periods: self.exhausted_periods.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub periods: u64,
    pub frames_rendered: u64,
    pub silent_periods: u64,
    pub exhausted_periods: u64,
}

/// Renders the current session into interleaved `f32` output buffers
#[derive(Clone)]
pub struct PlaybackEngine {
    slot: SessionSlot,
    stats: Arc<EngineStats>,
}

impl PlaybackEngine {
    pub fn new(slot: SessionSlot) -> Self {
        Self {
            slot,
            stats: Arc::new(EngineStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// Fill `out` with the next period of audio.
    ///
    /// `out` holds interleaved samples in the session's channel layout; its
    /// length divided by the channel count is the number of frames requested.
    pub fn render(&self, out: &mut [f32]) -> RenderOutcome {
        self.stats.periods.fetch_add(1, Ordering::Relaxed);

        let guard = self.slot.load();
        let Some(session) = guard.as_ref() else {
            return self.silence(out);
        };

        let format = session.format();
        let buffer = session.buffer();
        let channels = format.channels() as usize;
        let bytes_per_frame = format.bytes_per_frame();
        let bytes_per_sample = format.bytes_per_sample();
        let encoding = format.encoding();

        let committed = buffer.committed_len();
        let cursor = buffer.cursor();

        if !session.is_playing() || committed == 0 || cursor >= committed {
            out.fill(0.0);
            self.stats.silent_periods.fetch_add(1, Ordering::Relaxed);
            if session.is_playing() && committed > 0 && session.on_exhausted() {
                return RenderOutcome::Exhausted {
                    frames: 0,
                    completed: true,
                };
            }
            return RenderOutcome::Silence;
        }

        let requested = out.len() / channels;
        let available = (committed - cursor) / bytes_per_frame;
        let frames = requested.min(available);

        let mut raw = [0u8; 4];
        let mut position = cursor;
        for frame in out.chunks_exact_mut(channels).take(frames) {
            for sample in frame.iter_mut() {
                buffer.read(position, &mut raw[..bytes_per_sample]);
                *sample = convert_sample(encoding, &raw);
                position += bytes_per_sample;
            }
        }
        out[frames * channels..].fill(0.0);

        buffer.advance_cursor(cursor, cursor + frames * bytes_per_frame);
        self.stats
            .frames_rendered
            .fetch_add(frames as u64, Ordering::Relaxed);

        if frames < requested {
            self.stats.exhausted_periods.fetch_add(1, Ordering::Relaxed);
            let completed = session.on_exhausted();
            RenderOutcome::Exhausted { frames, completed }
        } else {
            RenderOutcome::Rendered { frames }
        }
    }

    fn silence(&self, out: &mut [f32]) -> RenderOutcome {
        out.fill(0.0);
        self.stats.silent_periods.fetch_add(1, Ordering::Relaxed);
        RenderOutcome::Silence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::FormatDescriptor;
    use crate::session::{empty_slot, StreamingSession};

    fn stereo_i16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_silence_without_session() {
        let engine = PlaybackEngine::new(empty_slot());
        let mut out = vec![1.0f32; 16];
        assert_eq!(engine.render(&mut out), RenderOutcome::Silence);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_silence_when_paused() {
        let slot = empty_slot();
        let (session, mut writer) =
            StreamingSession::new(1, "a.wav", FormatDescriptor::cd_quality(), 64);
        writer.append(&[0x10; 64]).unwrap();
        slot.store(Some(session.clone()));

        let engine = PlaybackEngine::new(slot);
        let mut out = vec![1.0f32; 8];
        assert_eq!(engine.render(&mut out), RenderOutcome::Silence);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(session.buffer().cursor(), 0);
    }

    #[test]
    fn test_full_period_converts_and_advances() {
        let slot = empty_slot();
        let data = stereo_i16(&[16384, -16384, 0, 32767, -32768, 8192]);
        let (session, mut writer) =
            StreamingSession::new(1, "a.wav", FormatDescriptor::cd_quality(), 64);
        writer.append(&data).unwrap();
        slot.store(Some(session.clone()));
        session.start().unwrap();

        let engine = PlaybackEngine::new(slot);
        let mut out = vec![0.0f32; 4];
        assert_eq!(engine.render(&mut out), RenderOutcome::Rendered { frames: 2 });
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], -0.5);
        assert_eq!(out[2], 0.0);
        assert!(out[3] > 0.9999);
        assert_eq!(session.buffer().cursor(), 8);
    }

    #[test]
    fn test_exhaustion_renders_whole_frames_then_silence() {
        let slot = empty_slot();
        let format = FormatDescriptor::cd_quality();
        // 3 whole frames plus 2 stray bytes
        let mut data = stereo_i16(&[8192; 6]);
        data.extend_from_slice(&[0x7f, 0x7f]);
        let (session, mut writer) = StreamingSession::new(1, "a.wav", format, data.len());
        writer.append(&data).unwrap();
        session.mark_end_of_stream();
        slot.store(Some(session.clone()));
        session.start().unwrap();

        let engine = PlaybackEngine::new(slot);
        let mut out = vec![1.0f32; 10];
        let outcome = engine.render(&mut out);

        assert_eq!(
            outcome,
            RenderOutcome::Exhausted {
                frames: 3,
                completed: true
            }
        );
        assert!(out[..6].iter().all(|s| *s == 0.25));
        assert!(out[6..].iter().all(|s| *s == 0.0));
        assert_eq!(session.buffer().cursor(), 12);
        assert!(!session.is_playing());
        assert!(session.is_completed());
    }

    #[test]
    fn test_underrun_keeps_playing_until_end_of_stream() {
        let slot = empty_slot();
        let (session, mut writer) =
            StreamingSession::new(1, "a.wav", FormatDescriptor::cd_quality(), 32);
        writer.append(&stereo_i16(&[100; 4])).unwrap();
        slot.store(Some(session.clone()));
        session.start().unwrap();

        let engine = PlaybackEngine::new(slot);
        let mut out = vec![0.0f32; 8];
        assert_eq!(
            engine.render(&mut out),
            RenderOutcome::Exhausted {
                frames: 2,
                completed: false
            }
        );
        assert!(session.is_playing());

        writer.append(&stereo_i16(&[100; 8])).unwrap();
        session.mark_end_of_stream();
        assert_eq!(engine.render(&mut out), RenderOutcome::Rendered { frames: 4 });

        // Cursor now sits on the final committed length
        assert_eq!(
            engine.render(&mut out),
            RenderOutcome::Exhausted {
                frames: 0,
                completed: true
            }
        );
        assert!(session.is_drained());

        let stats = engine.stats().snapshot();
        assert_eq!(stats.periods, 3);
        assert_eq!(stats.frames_rendered, 6);
        assert_eq!(stats.exhausted_periods, 1);
        assert_eq!(stats.silent_periods, 1);
    }

    #[test]
    fn test_session_swap_between_periods() {
        let slot = empty_slot();
        let (old, mut old_writer) =
            StreamingSession::new(1, "old.wav", FormatDescriptor::cd_quality(), 16);
        old_writer.append(&stereo_i16(&[16384; 8])).unwrap();
        old.start().unwrap();
        slot.store(Some(old.clone()));

        let engine = PlaybackEngine::new(slot.clone());
        let mut out = vec![0.0f32; 4];
        engine.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.5));

        let mono = FormatDescriptor::new(1, 8000, 8).unwrap();
        let (new, mut new_writer) = StreamingSession::new(2, "new.wav", mono, 8);
        new_writer.append(&[0, 0, 0, 0]).unwrap();
        new.start().unwrap();
        slot.store(Some(new.clone()));

        let mut out = vec![1.0f32; 4];
        assert_eq!(engine.render(&mut out), RenderOutcome::Rendered { frames: 4 });
        assert!(out.iter().all(|s| *s == -1.0));
        // The old session was left untouched by the new period
        assert_eq!(old.buffer().cursor(), 8);
    }
}
