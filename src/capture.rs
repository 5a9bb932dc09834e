use image::DynamicImage;

use crate::{BoundingBox, CaptureError, ScreenPoint};

/// Source of screen pixels.
pub trait ScreenCapture: Send {
    /// Extent of the capturable screen in absolute coordinates.
    fn screen_bounds(&self) -> Result<BoundingBox, CaptureError>;

    /// Grabs `region`, which always lies within [`Self::screen_bounds`].
    fn capture(&self, region: BoundingBox) -> Result<DynamicImage, CaptureError>;
}

/// Square region of `radius` pixels around `anchor`, clipped to `screen`.
pub fn capture_region(
    anchor: ScreenPoint,
    radius: u32,
    screen: BoundingBox,
) -> Result<BoundingBox, CaptureError> {
    let radius = i32::try_from(radius).unwrap_or(i32::MAX);
    let left = anchor.x.saturating_sub(radius).max(screen.left);
    let top = anchor.y.saturating_sub(radius).max(screen.top);
    let right = anchor.x.saturating_add(radius).min(screen.right());
    let bottom = anchor.y.saturating_add(radius).min(screen.bottom());
    if right <= left || bottom <= top {
        return Err(CaptureError::EmptyRegion { anchor });
    }
    Ok(BoundingBox::from_edges(left, top, right, bottom))
}

/// Serves captures out of an image that stands in for the screen, such as a
/// saved screenshot.
#[derive(Debug, Clone)]
pub struct ImageCapture {
    image: DynamicImage,
    origin: ScreenPoint,
}

impl ImageCapture {
    pub fn new(image: DynamicImage) -> Self {
        Self::with_origin(image, ScreenPoint::default())
    }

    /// Places the image's top-left pixel at `origin` in screen space.
    pub fn with_origin(image: DynamicImage, origin: ScreenPoint) -> Self {
        Self { image, origin }
    }
}

impl ScreenCapture for ImageCapture {
    fn screen_bounds(&self) -> Result<BoundingBox, CaptureError> {
        Ok(BoundingBox::new(
            self.origin.x,
            self.origin.y,
            self.image.width() as i32,
            self.image.height() as i32,
        ))
    }

    fn capture(&self, region: BoundingBox) -> Result<DynamicImage, CaptureError> {
        crop(&self.image, self.origin, region)
    }
}

fn crop(
    image: &DynamicImage,
    origin: ScreenPoint,
    region: BoundingBox,
) -> Result<DynamicImage, CaptureError> {
    let x = region.left - origin.x;
    let y = region.top - origin.y;
    if region.is_empty()
        || x < 0
        || y < 0
        || (x + region.width) as u32 > image.width()
        || (y + region.height) as u32 > image.height()
    {
        return Err(CaptureError::Backend(format!(
            "region {region:?} is outside the {}x{} screen at {origin}",
            image.width(),
            image.height()
        )));
    }
    Ok(image.crop_imm(x as u32, y as u32, region.width as u32, region.height as u32))
}

/// Captures the primary monitor.
#[cfg(feature = "xcap")]
#[derive(Debug, Clone, Copy, Default)]
pub struct XcapCapture;

#[cfg(feature = "xcap")]
impl XcapCapture {
    fn primary_monitor() -> Result<xcap::Monitor, CaptureError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| CaptureError::NoDisplay(format!("failed to enumerate monitors: {e}")))?;
        let primary = monitors
            .iter()
            .position(|m| m.is_primary().unwrap_or(false))
            .unwrap_or(0);
        monitors
            .into_iter()
            .nth(primary)
            .ok_or_else(|| CaptureError::NoDisplay("no monitors found".into()))
    }

    fn monitor_bounds(monitor: &xcap::Monitor) -> Result<BoundingBox, CaptureError> {
        let backend = |e: xcap::XCapError| CaptureError::Backend(e.to_string());
        Ok(BoundingBox::new(
            monitor.x().map_err(backend)?,
            monitor.y().map_err(backend)?,
            monitor.width().map_err(backend)? as i32,
            monitor.height().map_err(backend)? as i32,
        ))
    }
}

#[cfg(feature = "xcap")]
impl ScreenCapture for XcapCapture {
    fn screen_bounds(&self) -> Result<BoundingBox, CaptureError> {
        Self::monitor_bounds(&Self::primary_monitor()?)
    }

    fn capture(&self, region: BoundingBox) -> Result<DynamicImage, CaptureError> {
        let monitor = Self::primary_monitor()?;
        let bounds = Self::monitor_bounds(&monitor)?;
        let buffer = monitor
            .capture_image()
            .map_err(|e| CaptureError::Backend(format!("failed to capture screen: {e}")))?;
        crop(&DynamicImage::ImageRgba8(buffer), bounds.origin(), region)
    }
}
