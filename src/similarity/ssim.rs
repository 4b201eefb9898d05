use image::GrayImage;
use image_compare::{Algorithm, SimilarityImage};
use serde::{Deserialize, Serialize};

use super::ScoreError;

/// How the 8x8 window scores are reduced to a single score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SsimPooling {
    /// Lowest window score. A change confined to a few pixels still drags the
    /// region score down instead of being averaged away.
    #[default]
    Worst,
    /// Mean over all windows.
    Mean,
}

/// Grayscale structural similarity over 8x8 windows, clamped to [0, 1].
pub fn structural_similarity(
    lhs: &GrayImage,
    rhs: &GrayImage,
    pooling: SsimPooling,
) -> Result<f64, ScoreError> {
    if lhs.dimensions() != rhs.dimensions() {
        return Err(ScoreError::SizeMismatch {
            lhs: lhs.dimensions(),
            rhs: rhs.dimensions(),
        });
    }
    let (width, height) = lhs.dimensions();
    if width == 0 || height == 0 {
        return Err(ScoreError::EmptyImage);
    }

    let result = image_compare::gray_similarity_structure(&Algorithm::MSSIMSimple, lhs, rhs)
        .map_err(|err| ScoreError::Ssim(format!("{err:?}")))?;

    let pooled = match pooling {
        SsimPooling::Mean => result.score,
        // every pixel of the map carries the score of the window it sits in
        SsimPooling::Worst => match &result.image {
            SimilarityImage::Gray(map) => map
                .pixels()
                .map(|p| f64::from(p[0]))
                .fold(f64::INFINITY, f64::min),
            _ => result.score,
        },
    };

    if pooled.is_nan() || pooled.is_infinite() {
        return Err(ScoreError::NotANumber);
    }
    Ok(pooled.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn solid(w: u32, h: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([value]))
    }

    #[test]
    fn identical_images_score_one() {
        let mut img = solid(40, 24, 90);
        img.put_pixel(3, 4, Luma([200]));
        img.put_pixel(30, 17, Luma([10]));

        for pooling in [SsimPooling::Worst, SsimPooling::Mean] {
            let score = structural_similarity(&img, &img.clone(), pooling).unwrap();
            assert!((score - 1.0).abs() < 1e-6, "{pooling:?} gave {score}");
        }
    }

    #[test]
    fn single_pixel_change_is_visible_with_worst_pooling() {
        let base = solid(100, 100, 40);
        let mut changed = base.clone();
        changed.put_pixel(50, 50, Luma([250]));

        let worst = structural_similarity(&base, &changed, SsimPooling::Worst).unwrap();
        let mean = structural_similarity(&base, &changed, SsimPooling::Mean).unwrap();

        assert!(worst < 0.5, "worst-block ssim {worst}");
        assert!(mean > worst);
        assert!(mean > 0.99, "mean pooling dilutes a 1px change: {mean}");
    }

    #[test]
    fn inverted_content_scores_low() {
        let mut lhs = solid(16, 16, 0);
        let mut rhs = solid(16, 16, 255);
        for y in 0..16 {
            for x in 0..8 {
                lhs.put_pixel(x, y, Luma([255]));
                rhs.put_pixel(x, y, Luma([0]));
            }
        }
        let score = structural_similarity(&lhs, &rhs, SsimPooling::Mean).unwrap();
        assert!(score < 0.1, "{score}");
    }

    #[test]
    fn mismatched_or_empty_images_are_errors() {
        let a = solid(10, 10, 0);
        let b = solid(10, 11, 0);
        assert!(matches!(
            structural_similarity(&a, &b, SsimPooling::Worst),
            Err(ScoreError::SizeMismatch { .. })
        ));

        let empty = GrayImage::new(0, 0);
        assert!(matches!(
            structural_similarity(&empty, &empty, SsimPooling::Worst),
            Err(ScoreError::EmptyImage)
        ));
    }
}
