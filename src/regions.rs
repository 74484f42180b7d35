use std::{fs, path::Path};

use anyhow::{bail, Result};
use opencv::core::{Rect, Scalar, Size};
use serde::Deserialize;

use crate::Errors;

/// One hand-picked region to follow, as it appears in the JSON region
/// list. Coordinates are normalized to the displayed frame; the color is
/// RGB.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegionSpec {
    pub name: String,
    pub color: [u8; 3],
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl RegionSpec {
    fn in_bounds(&self) -> bool {
        [self.x, self.y, self.w, self.h]
            .iter()
            .all(|value| value.is_finite())
            && self.x >= 0.0
            && self.y >= 0.0
            && self.w > 0.0
            && self.h > 0.0
            && self.x + self.w <= 1.0
            && self.y + self.h <= 1.0
    }

    /// Pixel rectangle against the frame this region will be tracked on.
    pub fn pixel_rect(&self, frame: Size) -> Rect {
        let width = f64::from(frame.width);
        let height = f64::from(frame.height);
        Rect::new(
            (self.x * width).round() as i32,
            (self.y * height).round() as i32,
            (self.w * width).round() as i32,
            (self.h * height).round() as i32,
        )
    }

    /// Draw color. The config stores RGB, OpenCV draws BGR.
    pub fn scalar(&self) -> Scalar {
        Scalar::new(
            f64::from(self.color[2]),
            f64::from(self.color[1]),
            f64::from(self.color[0]),
            0.0,
        )
    }
}

/// Parse and validate a JSON region list.
pub fn parse_regions(text: &str) -> Result<Vec<RegionSpec>> {
    let specs: Vec<RegionSpec> =
        serde_json::from_str(text).map_err(|err| Errors::InvalidRegions(err.to_string()))?;
    for spec in &specs {
        if !spec.in_bounds() {
            bail!(Errors::InvalidRegions(format!(
                "region '{}' does not fit in the unit square",
                spec.name
            )));
        }
    }
    Ok(specs)
}

pub fn load_regions(path: &Path) -> Result<Vec<RegionSpec>> {
    let text = fs::read_to_string(path)
        .map_err(|err| Errors::InvalidRegions(format!("{}: {err}", path.display())))?;
    parse_regions(&text)
}
