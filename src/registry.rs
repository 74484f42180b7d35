use std::fmt;

use anyhow::{ensure, Result};
use opencv::{
    core::{Mat, Rect, Scalar},
    prelude::*,
};

use crate::{regions::RegionSpec, tracker::SingleObjectTracker, Errors};

/// Seconds an object may go unseen before it is written off.
pub const LOST_GRACE_SECONDS: u64 = 3;

/// Consecutive missed frames tolerated at the given whole-frame rate.
pub fn grace_period_frames(fps_rounded: u64) -> u64 {
    fps_rounded * LOST_GRACE_SECONDS
}

/// Sentinel box meaning "currently not located".
pub fn not_found_rect() -> Rect {
    Rect::new(-1, -1, 0, 0)
}

/// One region under tracking: an engine handle plus lifecycle bookkeeping.
pub struct TrackedObject {
    pub name: String,
    pub color: Scalar,
    pub rect: Rect,
    pub active: bool,
    pub last_seen: u64,
    engine: Box<dyn SingleObjectTracker>,
}

/// Fixed set of tracked objects. Objects are never removed; once lost
/// they are skipped by updates and rendering for the rest of playback.
pub struct TrackerRegistry {
    objects: Vec<TrackedObject>,
    grace_frames: u64,
}

impl fmt::Debug for TrackerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerRegistry")
            .field("grace_frames", &self.grace_frames)
            .finish_non_exhaustive()
    }
}

impl TrackerRegistry {
    /// Build one engine per region against the first displayed frame.
    /// Engine init counts as the frame-0 sighting.
    pub fn build(
        specs: &[RegionSpec],
        frame: &Mat,
        fps_rounded: u64,
        mut make_engine: impl FnMut() -> Result<Box<dyn SingleObjectTracker>>,
    ) -> Result<Self> {
        let frame_size = frame.size()?;
        let mut objects = Vec::with_capacity(specs.len());
        for spec in specs {
            let rect = spec.pixel_rect(frame_size);
            ensure!(
                rect.width > 0 && rect.height > 0,
                Errors::InvalidRegions(format!(
                    "region '{}' maps to an empty rectangle",
                    spec.name
                ))
            );
            let mut engine = make_engine()?;
            engine.init(frame, rect)?;
            tracing::info!(
                "tracking '{}': {} x {} starting at ({}, {})",
                spec.name,
                rect.width,
                rect.height,
                rect.x,
                rect.y
            );
            objects.push(TrackedObject {
                name: spec.name.clone(),
                color: spec.scalar(),
                rect,
                active: true,
                last_seen: 0,
                engine,
            });
        }
        Ok(Self {
            objects,
            grace_frames: grace_period_frames(fps_rounded),
        })
    }

    /// Advance every active object by one frame. An engine error counts
    /// as a miss for that object, never as a playback failure.
    pub fn update_all(&mut self, frame_index: u64, frame: &Mat) {
        for object in self.objects.iter_mut().filter(|object| object.active) {
            match object.engine.update(frame) {
                Ok((true, rect)) => {
                    object.rect = rect;
                    object.last_seen = frame_index;
                }
                outcome => {
                    if let Err(err) = outcome {
                        tracing::warn!(
                            "tracker for '{}' failed on frame {}: {err:#}",
                            object.name,
                            frame_index
                        );
                    }
                    object.rect = not_found_rect();
                    if frame_index - object.last_seen > self.grace_frames {
                        object.active = false;
                        tracing::info!(
                            "lost '{}', last seen on frame {} ({} frames ago)",
                            object.name,
                            object.last_seen,
                            frame_index - object.last_seen
                        );
                    }
                }
            }
        }
    }

    /// Objects whose box belongs on this frame: exactly those the update
    /// step confirmed on this same frame index.
    pub fn drawable(&self, frame_index: u64) -> impl Iterator<Item = &TrackedObject> + '_ {
        self.objects
            .iter()
            .filter(move |object| object.last_seen == frame_index)
    }
}
