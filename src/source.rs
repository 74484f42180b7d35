use std::path::Path;

use anyhow::{Context, Result};
use opencv::{core::Size, prelude::*, videoio};

use crate::Errors;

/// Stream metadata captured once at open time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: i32,
    pub height: i32,
    pub frame_count: u64,
    pub fps: f64,
}

impl StreamInfo {
    pub fn frame_size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Nominal rate rounded to whole frames per second, never below 1.
    pub fn fps_rounded(&self) -> u64 {
        self.fps.round().max(1.0) as u64
    }
}

/// Sequential frame decode. Implementations yield frames in order and
/// only ever move backwards through `seek`.
pub trait FrameSource {
    fn info(&self) -> StreamInfo;
    fn seek(&mut self, frame_index: u64) -> Result<()>;
    /// Next frame, or `None` once the stream is exhausted. A frame that
    /// fails to decode mid-stream ends the stream the same way.
    fn read_next(&mut self) -> Result<Option<Mat>>;
}

/// FrameSource over `opencv::videoio::VideoCapture`.
pub struct VideoFileSource {
    capture: videoio::VideoCapture,
    info: StreamInfo,
}

impl VideoFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let name = path.to_string_lossy().into_owned();
        let capture = videoio::VideoCapture::from_file(&name, videoio::CAP_ANY)
            .with_context(|| Errors::OpenFailed(name.clone()))?;
        if !capture.is_opened().context("Failed to query capture state")? {
            return Err(Errors::OpenFailed(name).into());
        }

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let frame_count = capture.get(videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as u64;
        let fps = capture.get(videoio::CAP_PROP_FPS)?;

        let info = StreamInfo {
            width,
            height,
            frame_count,
            fps,
        };
        describe(&name, &info);
        Ok(Self { capture, info })
    }
}

fn describe(name: &str, info: &StreamInfo) {
    if info.fps > 0.0 {
        let frames_per_minute = info.fps * 60.0;
        let minutes = (info.frame_count as f64 / frames_per_minute).floor();
        let seconds = (info.frame_count as f64 - minutes * frames_per_minute) / info.fps;
        tracing::info!(
            "{name}: {} x {} @ {} FPS for {minutes:.0}m{seconds:.1}s ({} total frames)",
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );
    } else {
        tracing::warn!(
            "{name}: {} x {}, frame rate reported as {}",
            info.width,
            info.height,
            info.fps
        );
    }
}

impl FrameSource for VideoFileSource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn seek(&mut self, frame_index: u64) -> Result<()> {
        self.capture
            .set(videoio::CAP_PROP_POS_FRAMES, frame_index as f64)
            .context("Failed to reposition the stream")?;
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self
            .capture
            .read(&mut frame)
            .context("Failed to read from the stream")?
        {
            return Ok(None);
        }
        if frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}
