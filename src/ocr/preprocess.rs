use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::contrast::{equalize_histogram, otsu_level, threshold, ThresholdType};
use imageproc::filter::gaussian_blur_f32;

const SMALL_SIDE_PX: u32 = 200;
// Gaussian weights of an 11x11 neighbourhood
const ADAPTIVE_SIGMA: f32 = 2.0;
const ADAPTIVE_OFFSET: f32 = 2.0;

/// Grayscale images handed to the OCR engine, in the order they are tried.
pub struct OcrVariants {
    /// Upscaled, contrast-enhanced grayscale, tried last if the thresholded
    /// variants come back weak.
    pub enhanced: GrayImage,
    pub candidates: Vec<(&'static str, GrayImage)>,
}

pub fn build_variants(img: &DynamicImage) -> OcrVariants {
    let gray = upscale(img).to_luma8();
    let enhanced = equalize_histogram(&gray);

    let level = otsu_level(&enhanced);
    let candidates = vec![
        (
            "enhanced_threshold",
            threshold(&enhanced, level, ThresholdType::Binary),
        ),
        (
            "adaptive_threshold",
            adaptive_threshold(&enhanced, ADAPTIVE_SIGMA, ADAPTIVE_OFFSET),
        ),
    ];

    OcrVariants {
        enhanced,
        candidates,
    }
}

/// Small crops are blown up 2x, larger ones 1.5x; tesseract reads tiny UI
/// text poorly at native size.
pub fn upscale(img: &DynamicImage) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }
    let factor = if width.min(height) < SMALL_SIDE_PX { 2.0 } else { 1.5 };
    let new_w = (width as f64 * factor).round() as u32;
    let new_h = (height as f64 * factor).round() as u32;
    img.resize_exact(new_w, new_h, FilterType::Lanczos3)
}

/// White where a pixel exceeds its Gaussian-weighted neighbourhood mean
/// minus `offset`, black elsewhere.
pub fn adaptive_threshold(img: &GrayImage, sigma: f32, offset: f32) -> GrayImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let local_mean = gaussian_blur_f32(img, sigma);
    GrayImage::from_fn(width, height, |x, y| {
        let value = f32::from(img.get_pixel(x, y)[0]);
        let mean = f32::from(local_mean.get_pixel(x, y)[0]);
        if value > mean - offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}
