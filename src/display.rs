use anyhow::Result;
use opencv::{
    core::{Mat, Size},
    highgui, imgproc,
};

/// Key code highgui reports for ESC.
pub const KEY_ESCAPE: i32 = 27;

/// Frame presentation and key polling. A negative timeout blocks until a
/// key arrives, zero polls and returns right away, positive waits up to
/// that many milliseconds.
pub trait DisplaySink {
    fn show(&mut self, title: &str, frame: &Mat) -> Result<()>;
    fn wait_key(&mut self, timeout_ms: i32) -> Result<Option<i32>>;
}

/// DisplaySink over the highgui window system.
pub struct HighguiSink;

impl DisplaySink for HighguiSink {
    fn show(&mut self, title: &str, frame: &Mat) -> Result<()> {
        highgui::imshow(title, frame)?;
        Ok(())
    }

    fn wait_key(&mut self, timeout_ms: i32) -> Result<Option<i32>> {
        // highgui itself treats 0 as "block forever", so the poll case
        // goes through poll_key instead
        let code = if timeout_ms < 0 {
            highgui::wait_key(0)?
        } else if timeout_ms == 0 {
            highgui::poll_key()?
        } else {
            highgui::wait_key(timeout_ms)?
        };
        Ok((code >= 0).then_some(code))
    }
}

/// Display size and zoom factor, fixed once per session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalePlan {
    pub factor: f64,
    pub size: Size,
}

/// Plan for fitting a source into the viewport. Sources larger than the
/// viewport in either dimension are scaled by the larger of the two
/// per-dimension ratios, each result dimension rounded to the nearest
/// pixel; sources that already fit keep their native size and a factor
/// of exactly 1.
pub fn scale_to_fit(source: Size, viewport: Size) -> ScalePlan {
    if source.width > viewport.width || source.height > viewport.height {
        let horizontal = f64::from(viewport.width) / f64::from(source.width);
        let vertical = f64::from(viewport.height) / f64::from(source.height);
        let factor = horizontal.max(vertical);
        let size = Size::new(
            (factor * f64::from(source.width)).round() as i32,
            (factor * f64::from(source.height)).round() as i32,
        );
        ScalePlan { factor, size }
    } else {
        ScalePlan {
            factor: 1.0,
            size: source,
        }
    }
}

pub fn resize_to(frame: &Mat, size: Size) -> Result<Mat> {
    let mut resized = Mat::default();
    imgproc::resize(frame, &mut resized, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
    Ok(resized)
}

#[cfg(test)]
mod tests {
    use opencv::core::{Scalar, CV_8UC3};
    use opencv::prelude::*;

    use super::*;

    #[test]
    fn oversized_sources_scale_by_the_larger_ratio() {
        let plan = scale_to_fit(Size::new(1920, 1080), Size::new(1024, 768));
        assert!((plan.factor - 768.0 / 1080.0).abs() < 1e-12);
        assert_eq!(plan.size, Size::new(1365, 768));
    }

    #[test]
    fn fitting_sources_keep_their_native_size() {
        let plan = scale_to_fit(Size::new(640, 480), Size::new(1024, 768));
        assert_eq!(plan.factor, 1.0);
        assert_eq!(plan.size, Size::new(640, 480));
    }

    #[test]
    fn an_exact_viewport_match_is_not_scaled() {
        let plan = scale_to_fit(Size::new(1024, 768), Size::new(1024, 768));
        assert_eq!(plan.factor, 1.0);
        assert_eq!(plan.size, Size::new(1024, 768));
    }

    #[test]
    fn one_oversized_dimension_is_enough_to_trigger_scaling() {
        // width fits, height does not; the larger ratio wins even when
        // it enlarges the fitting dimension
        let plan = scale_to_fit(Size::new(1000, 1200), Size::new(1024, 768));
        assert!((plan.factor - 1024.0 / 1000.0).abs() < 1e-12);
        assert_eq!(plan.size, Size::new(1024, 1229));
    }

    #[test]
    fn resize_produces_the_planned_size() {
        let frame = Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(0.0)).unwrap();
        let resized = resize_to(&frame, Size::new(32, 24)).unwrap();
        assert_eq!(resized.size().unwrap(), Size::new(32, 24));
    }
}
