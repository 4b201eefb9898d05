use image::{DynamicImage, Rgb, RgbImage};

#[cfg(feature = "screen-capture")]
const ENABLE_LOGS: bool = true;

#[cfg(feature = "screen-capture")]
use crate::log_warn;

/// Size of the filler frame before any real capture has succeeded.
pub const DEFAULT_FRAME_SIZE: (u32, u32) = (1920, 1080);
const FILLER_SHADE: u8 = 0x22;

/// One full-screen snapshot. `filler` is set when the capture failed and
/// the image is a stand-in.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub filler: bool,
}

impl Frame {
    pub fn real(image: DynamicImage) -> Self {
        Self {
            image,
            filler: false,
        }
    }

    /// Flat dark frame of the given size.
    pub fn filler(width: u32, height: u32) -> Self {
        let shade = Rgb([FILLER_SHADE; 3]);
        Self {
            image: DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, shade)),
            filler: true,
        }
    }
}

/// Produces frames for the tick loop. Must not fail: on error, return a
/// filler frame.
pub trait CaptureSource: Send {
    fn capture_frame(&mut self) -> Frame;
}

/// Primary-monitor screenshots through xcap.
#[cfg(feature = "screen-capture")]
pub struct ScreenCapture {
    last_size: (u32, u32),
}

#[cfg(feature = "screen-capture")]
impl ScreenCapture {
    pub fn new() -> Self {
        Self {
            last_size: DEFAULT_FRAME_SIZE,
        }
    }

    fn grab() -> anyhow::Result<DynamicImage> {
        use anyhow::Context;

        let monitors = xcap::Monitor::all().context("Failed to enumerate monitors")?;
        let monitor = monitors.first().context("No monitors found")?;
        let raw = monitor
            .capture_image()
            .context("Failed to capture screen (check screen recording permission)")?;
        let image = DynamicImage::ImageRgba8(raw);
        if image.width() == 0 || image.height() == 0 {
            anyhow::bail!("captured an empty screenshot");
        }
        Ok(image)
    }
}

#[cfg(feature = "screen-capture")]
impl Default for ScreenCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "screen-capture")]
impl CaptureSource for ScreenCapture {
    fn capture_frame(&mut self) -> Frame {
        match Self::grab() {
            Ok(image) => {
                self.last_size = (image.width(), image.height());
                Frame::real(image)
            }
            Err(err) => {
                log_warn!("screen capture failed: {err:#}");
                Frame::filler(self.last_size.0, self.last_size.1)
            }
        }
    }
}
