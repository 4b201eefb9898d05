//! Text extraction for the OCR comparison method.
//!
//! The engine itself is an external collaborator behind [`OcrEngine`]; this
//! module decides which preprocessed images and page segmentation modes are
//! tried, and keeps the best-scoring read.

pub mod preprocess;
pub mod tesseract;

use anyhow::{bail, Result};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

pub use tesseract::TesseractCli;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Stop trying further preprocessing variants once a read is this confident.
pub const GOOD_CONFIDENCE: f64 = 70.0;
/// Stop trying further segmentation modes for one image once this confident.
const EXCELLENT_CONFIDENCE: f64 = 80.0;
/// Below this the enhanced (unthresholded) image is tried as a last resort.
const RETRY_CONFIDENCE: f64 = 50.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    /// Mean word confidence, 0..100.
    pub confidence: f64,
    pub word_count: u64,
}

impl OcrResult {
    fn rank(&self) -> f64 {
        self.text.chars().count() as f64 * 0.1 + self.confidence
    }
}

/// Tesseract page segmentation modes worth trying on UI crops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSegMode {
    /// A uniform block of text.
    Block = 6,
    /// A single text line.
    SingleLine = 7,
    /// Sparse text, as much as can be found.
    SparseText = 11,
}

pub const PAGE_SEG_MODES: [PageSegMode; 3] = [
    PageSegMode::Block,
    PageSegMode::SingleLine,
    PageSegMode::SparseText,
];

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &GrayImage, mode: PageSegMode) -> Result<OcrResult>;
}

/// Best read of `img`. With `preprocess` the thresholded variants are tried
/// first (stopping early on a confident read), then the enhanced grayscale if
/// nothing reached 50. Fails only if every engine call failed.
pub fn extract_text(
    engine: &dyn OcrEngine,
    img: &DynamicImage,
    preprocess: bool,
) -> Result<OcrResult> {
    if !preprocess {
        return recognize_best(engine, &img.to_luma8());
    }

    let variants = preprocess::build_variants(img);
    let mut best: Option<OcrResult> = None;
    let mut last_error = None;

    for (name, candidate) in &variants.candidates {
        match recognize_best(engine, candidate) {
            Ok(result) => {
                log_debug!(
                    "ocr variant {name}: confidence={:.1} words={}",
                    result.confidence,
                    result.word_count
                );
                let confident = result.confidence > GOOD_CONFIDENCE;
                keep_better(&mut best, result);
                if confident {
                    break;
                }
            }
            Err(err) => {
                log_debug!("ocr variant {name} failed: {err:#}");
                last_error = Some(err);
            }
        }
    }

    let best_confidence = best.as_ref().map(|r| r.confidence).unwrap_or(0.0);
    if best_confidence < RETRY_CONFIDENCE {
        match recognize_best(engine, &variants.enhanced) {
            Ok(result) => keep_better(&mut best, result),
            Err(err) => last_error = Some(err),
        }
    }

    match (best, last_error) {
        (Some(result), _) => Ok(result),
        (None, Some(err)) => Err(err),
        (None, None) => Ok(OcrResult::default()),
    }
}

/// Runs every segmentation mode on one image and keeps the highest
/// `len * 0.1 + confidence`.
fn recognize_best(engine: &dyn OcrEngine, img: &GrayImage) -> Result<OcrResult> {
    let mut best: Option<OcrResult> = None;
    let mut failures = 0;

    for mode in PAGE_SEG_MODES {
        let result = match engine.recognize(img, mode) {
            Ok(result) => result,
            Err(err) => {
                log_debug!("ocr psm {} failed: {err:#}", mode as u8);
                failures += 1;
                continue;
            }
        };

        let excellent = result.confidence > EXCELLENT_CONFIDENCE && result.text.chars().count() > 3;
        if result.text.trim().is_empty() {
            best.get_or_insert_with(OcrResult::default);
            continue;
        }

        let better = best.as_ref().map_or(true, |b| result.rank() > b.rank());
        if better {
            best = Some(result);
        }
        if excellent {
            break;
        }
    }

    if failures == PAGE_SEG_MODES.len() {
        bail!("all {} page segmentation modes failed", failures);
    }
    Ok(best.unwrap_or_default())
}

fn keep_better(best: &mut Option<OcrResult>, candidate: OcrResult) {
    if candidate.text.trim().is_empty() {
        best.get_or_insert_with(OcrResult::default);
        return;
    }
    let replace = best
        .as_ref()
        .map_or(true, |b| b.text.trim().is_empty() || candidate.confidence > b.confidence);
    if replace {
        *best = Some(candidate);
    }
}
