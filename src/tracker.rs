use anyhow::{Context, Result};
use opencv::{
    core::{Mat, Ptr, Rect},
    prelude::*,
    tracking::{TrackerCSRT, TrackerCSRT_Params},
};

/// Capability contract for one externally implemented tracking engine.
/// `init` binds the engine to a region on the given frame; `update`
/// reports whether the object was found on a later frame and, when it
/// was, where.
pub trait SingleObjectTracker {
    fn init(&mut self, frame: &Mat, bounds: Rect) -> Result<()>;
    fn update(&mut self, frame: &Mat) -> Result<(bool, Rect)>;
}

/// SingleObjectTracker over OpenCV's CSRT implementation.
pub struct CsrtTracker {
    inner: Ptr<TrackerCSRT>,
    bounds: Rect,
}

impl CsrtTracker {
    pub fn new() -> Result<Self> {
        let params = TrackerCSRT_Params::default()?;
        let inner = TrackerCSRT::create(&params).context("Failed to create CSRT tracker")?;
        Ok(Self {
            inner,
            bounds: Rect::default(),
        })
    }
}

impl SingleObjectTracker for CsrtTracker {
    fn init(&mut self, frame: &Mat, bounds: Rect) -> Result<()> {
        self.inner
            .init(frame, bounds)
            .context("Failed to initialize CSRT tracker")?;
        self.bounds = bounds;
        Ok(())
    }

    fn update(&mut self, frame: &Mat) -> Result<(bool, Rect)> {
        let mut bounds = self.bounds;
        let found = self.inner.update(frame, &mut bounds)?;
        if found {
            self.bounds = bounds;
        }
        Ok((found, bounds))
    }
}

/// Engine factory handed to the registry, one fresh CSRT per region.
pub fn csrt_factory() -> impl FnMut() -> Result<Box<dyn SingleObjectTracker>> {
    || {
        let engine = CsrtTracker::new()?;
        Ok(Box::new(engine) as Box<dyn SingleObjectTracker>)
    }
}
