use std::time::{Duration, Instant};

use anyhow::Result;

use crate::Errors;

/// Paces playback at the source frame rate. The presentation deadline
/// advances by a fixed per-frame duration, so long runs stay synced to
/// real time even when individual frames take uneven amounts of work.
#[derive(Debug)]
pub struct PlaybackClock {
    frame_duration: Duration,
    deadline: Instant,
}

impl PlaybackClock {
    /// Derive the fixed inter-frame duration from the nominal frame rate.
    pub fn for_fps(fps: f64) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(Errors::BadFrameRate(fps).into());
        }
        let nanos = (1_000_000_000.0 / fps).round() as u64;
        Ok(Self {
            frame_duration: Duration::from_nanos(nanos),
            deadline: Instant::now(),
        })
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Restart pacing from this instant. Used when playback begins and
    /// when resuming from a pause, since pause time does not count
    /// against the schedule.
    pub fn reset(&mut self) {
        self.deadline = Instant::now();
    }

    /// Move the deadline forward by exactly one frame duration. The
    /// deadline never snaps back to "now", so a frame that overruns its
    /// period leaves the schedule permanently behind.
    pub fn advance(&mut self) {
        self.deadline += self.frame_duration;
    }

    /// Milliseconds until the next frame is due. Zero or negative once
    /// the deadline has passed.
    pub fn wait_budget(&self) -> i64 {
        let now = Instant::now();
        if let Some(ahead) = self.deadline.checked_duration_since(now) {
            ahead.as_millis() as i64
        } else {
            -(now.duration_since(self.deadline).as_millis() as i64)
        }
    }
}
