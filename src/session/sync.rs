//! Synchronised start
//!
//! Several clients that were told the same wall-clock instant and track
//! position start playing together, to within the accuracy of their clocks.
//! The wait happens on an async task; the render path is never involved.

use std::time::Duration;

use super::StreamingSession;
use crate::error::{AudioError, Result};

/// A wall-clock instant paired with the position to play from at that instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncPoint {
    /// Milliseconds since the Unix epoch
    pub target_wall_clock_millis: i64,
    pub target_position_seconds: f64,
}

impl SyncPoint {
    pub fn new(target_wall_clock_millis: i64, target_position_seconds: f64) -> Self {
        Self {
            target_wall_clock_millis,
            target_position_seconds,
        }
    }
}

/// Source of the current wall-clock time
pub trait WallClock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// How a synchronised start went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Waited this long, then started on time
    Waited(Duration),
    /// The target had already passed; started at once
    Immediate { late_by: Duration },
}

/// Seek `session` to `position_seconds` and start it there
pub fn start_at(session: &StreamingSession, position_seconds: f64) -> Result<()> {
    session.seek(position_seconds)?;
    session.start()?;
    Ok(())
}

/// Wait for `point` and start `session` there.
///
/// Holds playback, waits until the target instant, then seeks to the target
/// position and starts. The seek happens after the wait, so the position
/// only has to be buffered by the target instant. A target more than
/// `max_wait` in the future is refused with [`AudioError::SyncTooFar`]
/// before anything changes. A target in the past starts immediately and
/// reports how late it was.
pub async fn sync_start(
    session: &StreamingSession,
    point: SyncPoint,
    clock: &dyn WallClock,
    max_wait: Duration,
) -> Result<SyncOutcome> {
    let wait_ms = point.target_wall_clock_millis - clock.now_millis();
    if wait_ms > 0 && wait_ms as u128 > max_wait.as_millis() {
        return Err(AudioError::SyncTooFar {
            wait_ms: wait_ms as u64,
            max_ms: max_wait.as_millis() as u64,
        }
        .into());
    }
    // Reject a malformed position before waiting for it
    session.format().seconds_to_offset(point.target_position_seconds)?;

    if session.is_playing() {
        session.pause();
    }

    let outcome = if wait_ms > 0 {
        let wait = Duration::from_millis(wait_ms as u64);
        tracing::info!(
            session = session.id(),
            "Synchronised start in {} ms at {:.3} seconds",
            wait_ms,
            point.target_position_seconds
        );
        tokio::time::sleep(wait).await;
        SyncOutcome::Waited(wait)
    } else {
        let late_by = Duration::from_millis(wait_ms.unsigned_abs());
        tracing::info!(
            session = session.id(),
            "Sync target passed {} ms ago, starting immediately",
            late_by.as_millis()
        );
        SyncOutcome::Immediate { late_by }
    };

    start_at(session, point.target_position_seconds)?;
    Ok(outcome)
}
