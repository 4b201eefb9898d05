use anyhow::{anyhow, bail, Context, Result};
use image::{GrayImage, ImageFormat};
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

use super::{OcrEngine, OcrResult, PageSegMode};

const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Words at or below this confidence are noise on game/UI crops.
const MIN_WORD_CONFIDENCE: f64 = 15.0;

/// Runs the `tesseract` binary with PNG on stdin and TSV on stdout.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
    language: String,
    timeout: Duration,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    /// True when the binary can be started at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image: &GrayImage, mode: PageSegMode) -> Result<OcrResult> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("failed to encode OCR input as PNG")?;

        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language, "--oem", "3", "--psm"])
            .arg((mode as u8).to_string())
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", self.binary.display()))?;

        // Drain stdout on its own thread so a large TSV cannot fill the pipe
        // while we wait for exit.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("tesseract stdout not captured"))?;
        let reader = thread::spawn(move || {
            let mut out = String::new();
            stdout.read_to_string(&mut out).map(|_| out)
        });

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .context("failed to write image to tesseract")?;
        }

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                bail!("tesseract timed out after {}s", self.timeout.as_secs());
            }
        };

        let output = reader
            .join()
            .map_err(|_| anyhow!("tesseract reader thread panicked"))?
            .context("failed to read tesseract output")?;

        if !status.success() {
            bail!("tesseract exited with {status}");
        }

        Ok(parse_tsv(&output))
    }
}

/// Joins words above the confidence floor and averages their confidence.
pub fn parse_tsv(tsv: &str) -> OcrResult {
    let mut words = Vec::new();
    let mut confidences = Vec::new();

    for line in tsv.lines().skip(1) {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 12 {
            continue;
        }
        let Ok(confidence) = columns[10].trim().parse::<f64>() else {
            continue;
        };
        let word = columns[11].trim();
        if confidence > MIN_WORD_CONFIDENCE && !word.is_empty() {
            words.push(word.to_string());
            confidences.push(confidence);
        }
    }

    if words.is_empty() {
        return OcrResult::default();
    }

    OcrResult {
        text: words.join(" "),
        confidence: confidences.iter().sum::<f64>() / confidences.len() as f64,
        word_count: words.len() as u64,
    }
}
