use std::{fmt, time::Instant};

use anyhow::Result;
use opencv::{
    core::{Mat, Point, Size},
    imgproc,
    prelude::*,
};

use crate::{
    clock::PlaybackClock,
    display::{resize_to, scale_to_fit, DisplaySink, ScalePlan, KEY_ESCAPE},
    registry::{TrackedObject, TrackerRegistry},
    source::{FrameSource, StreamInfo},
    Errors,
};

/// One playback session: source, sink, pacing, and the scale plan, all
/// fixed at construction.
pub struct Playback {
    source: Box<dyn FrameSource>,
    sink: Box<dyn DisplaySink>,
    info: StreamInfo,
    scale: ScalePlan,
    clock: PlaybackClock,
    title: String,
}

impl fmt::Debug for Playback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Playback")
            .field("info", &self.info)
            .field("scale", &self.scale)
            .field("clock", &self.clock)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

impl Playback {
    pub fn new(
        source: Box<dyn FrameSource>,
        sink: Box<dyn DisplaySink>,
        viewport: Size,
        app_name: &str,
    ) -> Result<Self> {
        let info = source.info();
        let clock = PlaybackClock::for_fps(info.fps)?;
        let nanos = clock.frame_duration().as_nanos();
        tracing::info!(
            "each frame is {nanos} nanoseconds ({} milliseconds)",
            nanos as f64 / 1_000_000.0
        );

        let scale = scale_to_fit(info.frame_size(), viewport);
        if scale.factor != 1.0 {
            tracing::info!(
                "each frame will be resized to {} x {} (zoom factor of {})",
                scale.size.width,
                scale.size.height,
                scale.factor
            );
        }

        let title = format!(
            "{app_name} ({} x {} @ {}%)",
            info.width,
            info.height,
            (100.0 * scale.factor).round() as i32
        );
        Ok(Self {
            source,
            sink,
            info,
            scale,
            clock,
            title,
        })
    }

    pub fn info(&self) -> StreamInfo {
        self.info
    }

    fn fit(&self, frame: Mat) -> Result<Mat> {
        if frame.size()? != self.scale.size {
            resize_to(&frame, self.scale.size)
        } else {
            Ok(frame)
        }
    }

    /// Decode frame 0, scaled for display. The stream is left positioned
    /// on frame 1, so callers either rewind or reuse the returned frame.
    pub fn first_frame(&mut self) -> Result<Mat> {
        let frame = self.source.read_next()?.ok_or(Errors::EmptyVideo)?;
        self.fit(frame)
    }

    /// Show a frame and block until any key is pressed.
    pub fn preview(&mut self, frame: &Mat) -> Result<()> {
        println!("Press any key to start..");
        self.sink.show(&self.title, frame)?;
        self.sink.wait_key(-1)?;
        Ok(())
    }

    /// Preview frame 0, then rewind so playback delivers it again.
    pub fn pause_on_first_frame(&mut self) -> Result<()> {
        self.source.seek(0)?;
        let frame = self.first_frame()?;
        self.source.seek(0)?;
        self.preview(&frame)
    }

    /// Play the whole stream at the source frame rate.
    pub fn show_video(&mut self) -> Result<()> {
        self.run(None, None)
    }

    /// Play the whole stream while updating and drawing tracked regions.
    /// `first` is the already-decoded frame 0 from `first_frame`; it is
    /// shown without an update pass, since every engine was initialized
    /// on that very frame and must not see it twice.
    pub fn show_video_tracking(
        &mut self,
        registry: &mut TrackerRegistry,
        first: Mat,
    ) -> Result<()> {
        self.run(Some(first), Some(registry))
    }

    /// Keep the last shown frame up until the user dismisses it.
    pub fn hold_last_frame(&mut self) -> Result<()> {
        println!("Done! Press any key to exit.");
        self.sink.wait_key(-1)?;
        Ok(())
    }

    fn run(
        &mut self,
        mut pending: Option<Mat>,
        mut registry: Option<&mut TrackerRegistry>,
    ) -> Result<()> {
        let mut meter = ProgressMeter::new(self.info.fps_rounded(), self.info.frame_count);
        let mut shown: u64 = 0;
        self.clock.reset();
        loop {
            let reused = pending.is_some();
            let mut frame = match pending.take() {
                Some(frame) => frame,
                None => match self.source.read_next()? {
                    Some(frame) => frame,
                    None => break,
                },
            };
            let index = shown;
            shown += 1;

            if let Some(report) = meter.note(shown) {
                report.log(self.info.frame_count);
            }

            frame = self.fit(frame)?;

            if let Some(registry) = registry.as_mut() {
                if !reused {
                    registry.update_all(index, &frame);
                }
                draw_objects(&mut frame, registry.drawable(index))?;
            }

            let budget = self.clock.wait_budget();
            meter.note_wait(budget);
            // highgui only pumps window events inside wait_key, so even a
            // late frame gets a 1 ms slice
            let wait = budget.clamp(1, i64::from(i32::MAX)) as i32;
            match self.sink.wait_key(wait)? {
                Some(KEY_ESCAPE) => return Err(Errors::QuitRequested.into()),
                Some(_) => {
                    tracing::info!("paused on frame {shown}");
                    if let Some(KEY_ESCAPE) = self.sink.wait_key(-1)? {
                        return Err(Errors::QuitRequested.into());
                    }
                    self.clock.reset();
                }
                None => {}
            }
            self.sink.show(&self.title, &frame)?;
            self.clock.advance();
        }
        tracing::info!("finished showing {shown} frames");
        Ok(())
    }
}

/// Draw each object's box and name label.
pub fn draw_objects<'a>(
    frame: &mut Mat,
    objects: impl Iterator<Item = &'a TrackedObject>,
) -> Result<()> {
    for object in objects {
        imgproc::rectangle(frame, object.rect, object.color, 2, imgproc::LINE_8, 0)?;
        let origin = Point::new(object.rect.x, object.rect.y.saturating_sub(6));
        imgproc::put_text(
            frame,
            &object.name,
            origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            object.color,
            1,
            imgproc::LINE_8,
            false,
        )?;
    }
    Ok(())
}

/// Once-a-second progress bookkeeping, plus an unconditional report on
/// the final frame.
struct ProgressMeter {
    every: u64,
    total: u64,
    window_frames: u64,
    window_wait_ms: i64,
    window_started: Instant,
}

struct ProgressReport {
    frame: u64,
    fps: f64,
    average_wait_ms: f64,
}

impl ProgressMeter {
    fn new(fps_rounded: u64, total: u64) -> Self {
        Self {
            every: fps_rounded,
            total,
            window_frames: 0,
            window_wait_ms: 0,
            window_started: Instant::now(),
        }
    }

    fn note(&mut self, shown: u64) -> Option<ProgressReport> {
        self.window_frames += 1;
        if shown % self.every != 0 && shown != self.total {
            return None;
        }
        let elapsed = self.window_started.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            self.window_frames as f64 / elapsed
        } else {
            0.0
        };
        let report = ProgressReport {
            frame: shown,
            fps,
            average_wait_ms: self.window_wait_ms as f64 / self.every as f64,
        };
        self.window_frames = 0;
        self.window_wait_ms = 0;
        self.window_started = Instant::now();
        Some(report)
    }

    /// Waits land in the window of the report that follows them.
    fn note_wait(&mut self, budget_ms: i64) {
        self.window_wait_ms += budget_ms;
    }
}

impl ProgressReport {
    fn log(&self, total: u64) {
        if total > 0 {
            tracing::info!(
                "processing frame {}/{} ({:.1}%), {:.1} FPS, average pause {:.1} ms",
                self.frame,
                total,
                100.0 * self.frame as f64 / total as f64,
                self.fps,
                self.average_wait_ms
            );
        } else {
            tracing::info!(
                "processing frame {}, {:.1} FPS, average pause {:.1} ms",
                self.frame,
                self.fps,
                self.average_wait_ms
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
        rc::Rc,
    };

    use opencv::core::{Rect, Scalar, CV_8UC3};
    use opencv::prelude::*;

    use super::*;
    use crate::{exit_code, regions::RegionSpec, tracker::SingleObjectTracker};

    fn mat(width: i32, height: i32) -> Mat {
        Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[derive(Default)]
    struct SourceState {
        cursor: u64,
        seeks: Vec<u64>,
    }

    struct FakeSource {
        info: StreamInfo,
        state: Rc<RefCell<SourceState>>,
    }

    impl FakeSource {
        fn new(frames: u64, fps: f64, width: i32, height: i32) -> Self {
            Self {
                info: StreamInfo {
                    width,
                    height,
                    frame_count: frames,
                    fps,
                },
                state: Rc::new(RefCell::new(SourceState::default())),
            }
        }
    }

    impl FrameSource for FakeSource {
        fn info(&self) -> StreamInfo {
            self.info
        }

        fn seek(&mut self, frame_index: u64) -> Result<()> {
            let mut state = self.state.borrow_mut();
            state.seeks.push(frame_index);
            state.cursor = frame_index;
            Ok(())
        }

        fn read_next(&mut self) -> Result<Option<Mat>> {
            let mut state = self.state.borrow_mut();
            if state.cursor >= self.info.frame_count {
                return Ok(None);
            }
            state.cursor += 1;
            Ok(Some(mat(self.info.width, self.info.height)))
        }
    }

    #[derive(Default)]
    struct SinkState {
        sizes: Vec<Size>,
        waits: Vec<i32>,
        keys: VecDeque<i32>,
    }

    #[derive(Clone, Default)]
    struct FakeSink {
        state: Rc<RefCell<SinkState>>,
    }

    impl DisplaySink for FakeSink {
        fn show(&mut self, _title: &str, frame: &Mat) -> Result<()> {
            let size = frame.size()?;
            self.state.borrow_mut().sizes.push(size);
            Ok(())
        }

        fn wait_key(&mut self, timeout_ms: i32) -> Result<Option<i32>> {
            let mut state = self.state.borrow_mut();
            state.waits.push(timeout_ms);
            Ok(state.keys.pop_front().filter(|&key| key >= 0))
        }
    }

    fn playback(frames: u64, fps: f64) -> (Playback, FakeSink, Rc<RefCell<SourceState>>) {
        let source = FakeSource::new(frames, fps, 64, 48);
        let source_state = source.state.clone();
        let sink = FakeSink::default();
        let playback = Playback::new(
            Box::new(source),
            Box::new(sink.clone()),
            Size::new(1024, 768),
            "test",
        )
        .unwrap();
        (playback, sink, source_state)
    }

    struct CountingEngine {
        calls: Rc<Cell<usize>>,
    }

    impl SingleObjectTracker for CountingEngine {
        fn init(&mut self, _frame: &Mat, _bounds: Rect) -> Result<()> {
            Ok(())
        }

        fn update(&mut self, _frame: &Mat) -> Result<(bool, Rect)> {
            self.calls.set(self.calls.get() + 1);
            Ok((true, Rect::new(8, 8, 16, 16)))
        }
    }

    #[test]
    fn plays_to_end_of_stream() {
        let (mut playback, sink, _) = playback(3, 30.0);
        playback.show_video().unwrap();
        let state = sink.state.borrow();
        assert_eq!(state.sizes.len(), 3);
        assert_eq!(state.waits.len(), 3);
        assert!(state.waits.iter().all(|&wait| wait >= 1));
    }

    #[test]
    fn escape_quits_with_a_recognized_error() {
        let (mut playback, sink, _) = playback(10, 30.0);
        sink.state.borrow_mut().keys.push_back(KEY_ESCAPE);
        let err = playback.show_video().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::QuitRequested)
        ));
        assert_eq!(exit_code(&err), 1);
        // the quit lands before the frame it interrupted is shown
        assert!(sink.state.borrow().sizes.is_empty());
    }

    #[test]
    fn any_other_key_pauses_until_the_next_key() {
        let (mut playback, sink, _) = playback(2, 30.0);
        {
            let mut state = sink.state.borrow_mut();
            state.keys.push_back(32);
            state.keys.push_back(32);
        }
        playback.show_video().unwrap();
        let state = sink.state.borrow();
        assert_eq!(state.sizes.len(), 2);
        assert_eq!(state.waits.len(), 3);
        // the pause wait blocks indefinitely
        assert_eq!(state.waits[1], -1);
    }

    #[test]
    fn escape_during_a_pause_quits() {
        let (mut playback, sink, _) = playback(2, 30.0);
        {
            let mut state = sink.state.borrow_mut();
            state.keys.push_back(32);
            state.keys.push_back(KEY_ESCAPE);
        }
        let err = playback.show_video().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::QuitRequested)
        ));
    }

    #[test]
    fn the_preview_rewinds_for_plain_playback() {
        let (mut playback, sink, source_state) = playback(3, 30.0);
        playback.pause_on_first_frame().unwrap();
        assert_eq!(source_state.borrow().seeks, vec![0, 0]);
        {
            let state = sink.state.borrow();
            assert_eq!(state.sizes.len(), 1);
            assert_eq!(state.waits, vec![-1]);
        }
        playback.show_video().unwrap();
        // frame 0 is delivered again during playback
        assert_eq!(sink.state.borrow().sizes.len(), 4);
    }

    #[test]
    fn tracking_playback_reuses_the_decoded_first_frame() {
        let (mut playback, sink, _) = playback(3, 1.0);
        let first = playback.first_frame().unwrap();
        let region = RegionSpec {
            name: "one".into(),
            color: [0, 255, 0],
            x: 0.25,
            y: 0.25,
            w: 0.5,
            h: 0.5,
        };
        let calls = Rc::new(Cell::new(0));
        let handle = calls.clone();
        let mut registry = TrackerRegistry::build(&[region], &first, 1, move || {
            Ok(Box::new(CountingEngine {
                calls: handle.clone(),
            }) as Box<dyn SingleObjectTracker>)
        })
        .unwrap();
        playback.show_video_tracking(&mut registry, first).unwrap();
        // engines saw frames 1 and 2 but never the reused frame 0
        assert_eq!(calls.get(), 2);
        assert_eq!(sink.state.borrow().sizes.len(), 3);
    }

    #[test]
    fn empty_streams_are_a_recognized_failure() {
        let (mut playback, _, _) = playback(0, 30.0);
        let err = playback.first_frame().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::EmptyVideo)
        ));
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn bad_frame_rates_fail_at_session_setup() {
        let source = FakeSource::new(3, 0.0, 64, 48);
        let err = Playback::new(
            Box::new(source),
            Box::new(FakeSink::default()),
            Size::new(1024, 768),
            "test",
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::BadFrameRate(_))
        ));
    }

    #[test]
    fn oversized_frames_are_scaled_for_display() {
        let source = FakeSource::new(2, 30.0, 128, 96);
        let sink = FakeSink::default();
        let mut playback = Playback::new(
            Box::new(source),
            Box::new(sink.clone()),
            Size::new(64, 48),
            "test",
        )
        .unwrap();
        playback.show_video().unwrap();
        assert_eq!(sink.state.borrow().sizes, vec![Size::new(64, 48); 2]);
    }

    #[test]
    fn the_window_title_carries_dimensions_and_zoom() {
        let source = FakeSource::new(1, 30.0, 128, 96);
        let playback = Playback::new(
            Box::new(source),
            Box::new(FakeSink::default()),
            Size::new(64, 48),
            "demo",
        )
        .unwrap();
        assert_eq!(playback.title, "demo (128 x 96 @ 50%)");
    }

    #[test]
    fn thirty_fps_and_ninety_frames_report_three_times() {
        let mut meter = ProgressMeter::new(30, 90);
        let mut reported = Vec::new();
        for shown in 1..=90 {
            if let Some(report) = meter.note(shown) {
                reported.push(report.frame);
            }
        }
        assert_eq!(reported, vec![30, 60, 90]);
    }

    #[test]
    fn the_final_frame_always_reports() {
        let mut meter = ProgressMeter::new(30, 95);
        let mut reported = Vec::new();
        for shown in 1..=95 {
            if let Some(report) = meter.note(shown) {
                reported.push(report.frame);
            }
        }
        assert_eq!(reported, vec![30, 60, 90, 95]);
    }

    #[test]
    fn unknown_totals_still_report_every_second() {
        let mut meter = ProgressMeter::new(2, 0);
        let frames: Vec<u64> = (1..=5).filter(|&shown| meter.note(shown).is_some()).collect();
        assert_eq!(frames, vec![2, 4]);
    }

    #[test]
    fn waits_average_over_the_report_window() {
        let mut meter = ProgressMeter::new(2, 4);
        meter.note(1);
        meter.note_wait(10);
        let report = meter.note(2).unwrap();
        assert!((report.average_wait_ms - 5.0).abs() < 1e-9);
    }
}
