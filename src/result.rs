use std::{fmt, str::FromStr};

use image::DynamicImage;
use serde::Serialize;

/// A point in absolute screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

impl ScreenPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for ScreenPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Parses `x,y`.
impl FromStr for ScreenPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected `x,y`, got `{s}`"))?;
        let x = x
            .trim()
            .parse()
            .map_err(|e| format!("invalid x coordinate `{x}`: {e}"))?;
        let y = y
            .trim()
            .parse()
            .map_err(|e| format!("invalid y coordinate `{y}`: {e}"))?;
        Ok(Self { x, y })
    }
}

/// Axis-aligned rectangle in absolute screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            width: right - left,
            height: bottom - top,
        }
    }

    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }

    pub fn origin(&self) -> ScreenPoint {
        ScreenPoint::new(self.left, self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Squared distance from the box center to `point`, scaled by 4 so the
    /// center never needs a fractional coordinate.
    pub fn scaled_distance_squared(&self, point: ScreenPoint) -> i64 {
        let dx = 2 * self.left as i64 + self.width as i64 - 2 * point.x as i64;
        let dy = 2 * self.top as i64 + self.height as i64 - 2 * point.y as i64;
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordObservation {
    pub text: String,
    pub bounding_box: BoundingBox,
}

/// Where to put the cursor relative to a matched word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorPosition {
    Before,
    #[default]
    Middle,
    After,
}

impl FromStr for CursorPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "before" => Ok(Self::Before),
            "middle" => Ok(Self::Middle),
            "after" => Ok(Self::After),
            other => Err(format!(
                "unknown cursor position `{other}`, expected before, middle or after"
            )),
        }
    }
}

/// Words recognized in one capture, already in absolute screen coordinates.
///
/// A result set belongs to the request that produced it and is never mutated
/// after construction, so a single command can run several lookups against it.
#[derive(Debug, Clone)]
pub struct ResultSet {
    generation: u64,
    observations: Vec<WordObservation>,
    captured_image: DynamicImage,
    capture_bounds: BoundingBox,
}

impl ResultSet {
    pub fn new(
        generation: u64,
        observations: Vec<WordObservation>,
        captured_image: DynamicImage,
        capture_bounds: BoundingBox,
    ) -> Self {
        Self {
            generation,
            observations,
            captured_image,
            capture_bounds,
        }
    }

    /// Generation id of the request that produced this set.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Observations in the order the OCR engine reported them.
    pub fn observations(&self) -> &[WordObservation] {
        &self.observations
    }

    pub fn captured_image(&self) -> &DynamicImage {
        &self.captured_image
    }

    pub fn capture_bounds(&self) -> BoundingBox {
        self.capture_bounds
    }
}
