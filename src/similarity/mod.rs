//! Scores how alike two crops of the same region are, in [0, 1].

pub mod phash;
pub mod ssim;
pub mod text;

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use crate::ocr::{self, OcrEngine};

pub use ssim::SsimPooling;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// SSIM above this short-circuits the slower methods.
pub const FAST_PATH_CUTOFF: f64 = 0.95;
/// At least one side's OCR confidence must reach this for text to count.
pub const MIN_OCR_CONFIDENCE: f64 = 25.0;
/// Score reported when no method produced anything.
pub const NEUTRAL_SCORE: f64 = 0.5;

const TEXT_WEIGHTS: Weights = Weights {
    text: 0.6,
    ssim: 0.25,
    phash: 0.15,
};
const VISUAL_WEIGHTS: Weights = Weights {
    text: 0.0,
    ssim: 0.6,
    phash: 0.4,
};

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("size mismatch: {lhs:?} vs {rhs:?}")]
    SizeMismatch { lhs: (u32, u32), rhs: (u32, u32) },
    #[error("empty image")]
    EmptyImage,
    #[error("score is not a number")]
    NotANumber,
    #[error("ssim failed: {0}")]
    Ssim(String),
    #[error("ocr failed: {0}")]
    Ocr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// SSIM with fast path, then pHash and (if configured) OCR text.
    #[default]
    Combined,
    Ssim,
    Phash,
    /// OCR text alone; falls back to `Combined` when OCR is not trustworthy.
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub ssim: Option<f64>,
    pub phash: Option<f64>,
    pub text: Option<f64>,
    pub combined: f64,
    pub confidence: f64,
    pub diagnostic: String,
}

impl ComparisonResult {
    pub fn is_different(&self, threshold: f64) -> bool {
        self.combined < threshold
    }

    fn size_mismatch(lhs: (u32, u32), rhs: (u32, u32)) -> Self {
        Self {
            ssim: None,
            phash: None,
            text: None,
            combined: 0.0,
            confidence: 1.0,
            diagnostic: format!(
                "size mismatch: {}x{} vs {}x{}",
                lhs.0, lhs.1, rhs.0, rhs.1
            ),
        }
    }

    fn single(method: Method, score: f64) -> Self {
        let mut result = Self {
            ssim: None,
            phash: None,
            text: None,
            combined: score,
            confidence: 1.0,
            diagnostic: format!("{}: {score:.4}", method.label()),
        };
        match method {
            Method::Ssim => result.ssim = Some(score),
            Method::Phash => result.phash = Some(score),
            Method::Text => result.text = Some(score),
        }
        result
    }
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Ssim,
    Phash,
    Text,
}

impl Method {
    fn label(self) -> &'static str {
        match self {
            Method::Ssim => "SSIM",
            Method::Phash => "pHash",
            Method::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Weights {
    text: f64,
    ssim: f64,
    phash: f64,
}

/// Weighted average over the methods that produced a score. Text-biased
/// weights apply when a text score is present, visual-only weights otherwise.
/// Returns `(score, confidence)`.
pub fn combine_scores(ssim: Option<f64>, phash: Option<f64>, text: Option<f64>) -> (f64, f64) {
    let weights = if text.is_some() {
        TEXT_WEIGHTS
    } else {
        VISUAL_WEIGHTS
    };

    let parts = [
        (text, weights.text),
        (ssim, weights.ssim),
        (phash, weights.phash),
    ];

    let (mut weighted, mut total_weight, mut contributors) = (0.0, 0.0, 0);
    for (score, weight) in parts {
        if let Some(score) = score {
            weighted += score * weight;
            total_weight += weight;
            contributors += 1;
        }
    }

    if contributors == 0 || total_weight <= 0.0 {
        return (NEUTRAL_SCORE, 0.0);
    }

    let confidence = if contributors >= 2 { 0.9 } else { 0.7 };
    (weighted / total_weight, confidence)
}

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub mode: CompareMode,
    pub fast_path_cutoff: f64,
    pub min_ocr_confidence: f64,
    pub pooling: SsimPooling,
    /// Threshold/upscale crops before OCR. Slower, better on UI text.
    pub ocr_preprocess: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            mode: CompareMode::Combined,
            fast_path_cutoff: FAST_PATH_CUTOFF,
            min_ocr_confidence: MIN_OCR_CONFIDENCE,
            pooling: SsimPooling::Worst,
            ocr_preprocess: true,
        }
    }
}

pub struct SimilarityScorer {
    config: ScorerConfig,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl SimilarityScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config, ocr: None }
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn compare(&self, prev: &DynamicImage, curr: &DynamicImage) -> ComparisonResult {
        let (lhs, rhs) = (prev.dimensions(), curr.dimensions());
        if lhs != rhs || lhs.0 == 0 || lhs.1 == 0 {
            return ComparisonResult::size_mismatch(lhs, rhs);
        }

        match self.config.mode {
            CompareMode::Ssim => match self.ssim(prev, curr) {
                Ok(score) => ComparisonResult::single(Method::Ssim, score),
                Err(err) => self.fallback(format!("SSIM failed: {err}")),
            },
            CompareMode::Phash => match phash::phash_similarity(prev, curr) {
                Ok(score) => ComparisonResult::single(Method::Phash, score),
                Err(err) => self.fallback(format!("pHash failed: {err}")),
            },
            CompareMode::Text => match self.text_similarity(prev, curr) {
                Ok(TextOutcome::Trusted { score, .. }) => {
                    ComparisonResult::single(Method::Text, score)
                }
                _ => self.compare_combined(prev, curr),
            },
            CompareMode::Combined => self.compare_combined(prev, curr),
        }
    }

    fn compare_combined(&self, prev: &DynamicImage, curr: &DynamicImage) -> ComparisonResult {
        let mut diagnostic = String::new();

        let ssim = match self.ssim(prev, curr) {
            Ok(score) => Some(score),
            Err(err) => {
                log_debug!("ssim skipped: {err}");
                let _ = write!(diagnostic, "SSIM failed: {err}");
                None
            }
        };

        if let Some(score) = ssim.filter(|&s| s > self.config.fast_path_cutoff) {
            let (combined, confidence) = combine_scores(Some(score), None, None);
            return ComparisonResult {
                ssim: Some(score),
                phash: None,
                text: None,
                combined,
                confidence,
                diagnostic: format!("fast path: SSIM {score:.4}"),
            };
        }

        let phash = match phash::phash_similarity(prev, curr) {
            Ok(score) => Some(score),
            Err(err) => {
                log_debug!("phash skipped: {err}");
                push_part(&mut diagnostic, format!("pHash failed: {err}"));
                None
            }
        };

        let text = match self.text_similarity(prev, curr) {
            Ok(TextOutcome::Trusted { score, details }) => {
                push_part(&mut diagnostic, details);
                Some(score)
            }
            Ok(TextOutcome::Untrusted(details)) => {
                push_part(&mut diagnostic, details);
                None
            }
            Ok(TextOutcome::Disabled) => None,
            Err(err) => {
                log_debug!("text comparison skipped: {err}");
                push_part(&mut diagnostic, format!("OCR failed: {err}"));
                None
            }
        };

        let (combined, confidence) = combine_scores(ssim, phash, text);
        if let Some(score) = ssim {
            push_part(&mut diagnostic, format!("SSIM: {score:.4}"));
        }
        if let Some(score) = phash {
            push_part(&mut diagnostic, format!("pHash: {score:.4}"));
        }
        if ssim.is_none() && phash.is_none() && text.is_none() {
            push_part(&mut diagnostic, "all methods failed, neutral score".to_string());
        }

        ComparisonResult {
            ssim,
            phash,
            text,
            combined,
            confidence,
            diagnostic,
        }
    }

    fn ssim(&self, prev: &DynamicImage, curr: &DynamicImage) -> Result<f64, ScoreError> {
        ssim::structural_similarity(&prev.to_luma8(), &curr.to_luma8(), self.config.pooling)
    }

    fn text_similarity(
        &self,
        prev: &DynamicImage,
        curr: &DynamicImage,
    ) -> Result<TextOutcome, ScoreError> {
        let Some(engine) = self.ocr.as_deref() else {
            return Ok(TextOutcome::Disabled);
        };

        let preprocess = self.config.ocr_preprocess;
        let lhs = ocr::extract_text(engine, prev, preprocess)
            .map_err(|err| ScoreError::Ocr(format!("{err:#}")))?;
        let rhs = ocr::extract_text(engine, curr, preprocess)
            .map_err(|err| ScoreError::Ocr(format!("{err:#}")))?;

        let floor = self.config.min_ocr_confidence;
        if lhs.confidence < floor && rhs.confidence < floor {
            return Ok(TextOutcome::Untrusted(format!(
                "OCR confidence too low ({:.0}/{:.0}), using visual",
                lhs.confidence, rhs.confidence
            )));
        }

        let score = text::text_similarity(&lhs.text, &rhs.text);
        Ok(TextOutcome::Trusted {
            score,
            details: format!(
                "OCR: text sim {score:.3}, '{}' vs '{}' (conf: {:.0}/{:.0})",
                preview(&lhs.text),
                preview(&rhs.text),
                lhs.confidence,
                rhs.confidence
            ),
        })
    }

    fn fallback(&self, reason: String) -> ComparisonResult {
        let (combined, confidence) = combine_scores(None, None, None);
        ComparisonResult {
            ssim: None,
            phash: None,
            text: None,
            combined,
            confidence,
            diagnostic: reason,
        }
    }
}

enum TextOutcome {
    Disabled,
    Untrusted(String),
    Trusted { score: f64, details: String },
}

fn push_part(diagnostic: &mut String, part: String) {
    if !diagnostic.is_empty() {
        diagnostic.push_str(", ");
    }
    diagnostic.push_str(&part);
}

fn preview(text: &str) -> String {
    let normalized = text::normalize(text);
    if normalized.chars().count() > 50 {
        let head: String = normalized.chars().take(50).collect();
        format!("{head}...")
    } else {
        normalized
    }
}
