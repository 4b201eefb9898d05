use image::{DynamicImage, GenericImageView};
use image_hasher::{HashAlg, HasherConfig, ImageHash};

use super::ScoreError;

const HASH_SIDE: u32 = 8;
const HASH_BITS: f64 = (HASH_SIDE * HASH_SIDE) as f64;

pub fn compute_phash(img: &DynamicImage) -> Result<ImageHash, ScoreError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(ScoreError::EmptyImage);
    }

    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .hash_size(HASH_SIDE, HASH_SIDE)
        .to_hasher();

    Ok(hasher.hash_image(img))
}

/// `1 - hamming_distance / 64` between the perceptual hashes of both images.
pub fn phash_similarity(lhs: &DynamicImage, rhs: &DynamicImage) -> Result<f64, ScoreError> {
    let h1 = compute_phash(lhs)?;
    let h2 = compute_phash(rhs)?;
    let distance = h1.dist(&h2);
    Ok((1.0 - distance as f64 / HASH_BITS).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            let v = ((x * 255) / w.max(1)) as u8;
            Rgb([v, ((y * 255) / h.max(1)) as u8, 128])
        }))
    }

    #[test]
    fn identical_images_hash_equal() {
        let img = gradient(64, 48);
        assert_eq!(phash_similarity(&img, &img.clone()).unwrap(), 1.0);
        let (a, b) = (compute_phash(&img).unwrap(), compute_phash(&img.clone()).unwrap());
        assert_eq!(a.to_base64(), b.to_base64());
    }

    #[test]
    fn mirrored_image_moves_the_hash() {
        let img = gradient(64, 64);
        let mirrored = img.fliph();
        let similarity = phash_similarity(&img, &mirrored).unwrap();
        assert!(similarity < 1.0, "{similarity}");
        assert!(similarity >= 0.0);
    }

    #[test]
    fn empty_image_is_an_error() {
        let empty = DynamicImage::new_rgb8(0, 0);
        assert!(matches!(compute_phash(&empty), Err(ScoreError::EmptyImage)));
    }
}
