//! Frame quality scoring over raw luminance samples.
//!
//! Three statistics are computed per frame: a blur score, the mean
//! brightness and a contrast score. A frame passes when all three clear
//! their thresholds, and is only *reported* OK once enough consecutive
//! frames have passed, so a single lucky frame from a shaking hand never
//! unlocks capture.
//!
//! # Known approximation
//!
//! The blur score is the population standard deviation of the luminance
//! samples. That is a cheap proxy for high-frequency content, not a
//! gradient or Laplacian estimator: a flat gray card scores 0 and a sharp
//! but low-contrast scene scores low. The contrast score uses the same
//! statistic centred on the brightness mean, so the two are numerically
//! identical in practice. Both are kept as separate metrics so thresholds
//! can diverge if the blur estimator is ever replaced.

use serde::Serialize;

use crate::config::QualityThresholds;
use crate::frame::{sample_count, Frame};

/// Why a frame failed quality checks. Listed in reporting priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    EmptyBuffer,
    InvalidBuffer,
    Blurry,
    TooDark,
    TooBright,
    LowContrast,
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::EmptyBuffer => "Empty frame buffer",
            Self::InvalidBuffer => "Frame buffer does not match its dimensions",
            Self::Blurry => "Image is blurry. Please hold the phone steady.",
            Self::TooDark => "Lighting is too dark. Please increase the light.",
            Self::TooBright => "Lighting is too bright. Please reduce the light.",
            Self::LowContrast => "Contrast is too low. Please adjust the angle.",
        };
        f.write_str(msg)
    }
}

/// Raw luminance statistics for one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LuminanceMetrics {
    pub blur: f32,
    pub brightness: f32,
    pub contrast: f32,
}

/// Quality snapshot for one analysed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityResult {
    /// Higher = sharper.
    pub blur_score: f32,
    /// Mean luminance, 0-255.
    pub brightness_score: f32,
    /// Luminance standard deviation.
    pub contrast_score: f32,
    /// All thresholds passed *and* the stability run is long enough.
    pub is_quality_ok: bool,
    pub issue: Option<QualityIssue>,
}

impl QualityResult {
    fn rejected(issue: QualityIssue) -> Self {
        Self {
            blur_score: 0.0,
            brightness_score: 0.0,
            contrast_score: 0.0,
            is_quality_ok: false,
            issue: Some(issue),
        }
    }

    /// Human-readable diagnostic for the first failing check, if any.
    pub fn error_message(&self) -> Option<String> {
        self.issue.map(|i| i.to_string())
    }

    /// Overall quality 0-100: each metric normalised against its threshold
    /// (contrast against 50), capped at 1, averaged.
    pub fn quality_percentage(&self, thresholds: &QualityThresholds) -> u32 {
        let blur_ref = if thresholds.blur > 0.0 { thresholds.blur } else { 1.0 };
        let brightness_ref = if thresholds.min_brightness > 0.0 {
            thresholds.min_brightness
        } else {
            1.0
        };

        let blur = (self.blur_score / blur_ref).min(1.0);
        let brightness = (self.brightness_score / brightness_ref).min(1.0);
        let contrast = (self.contrast_score / 50.0).min(1.0);
        ((blur + brightness + contrast) / 3.0 * 100.0) as u32
    }
}

/// Compute luminance statistics for a buffer. Returns zeros for an empty buffer.
pub fn measure(samples: &[u8]) -> LuminanceMetrics {
    if samples.is_empty() {
        return LuminanceMetrics::default();
    }
    let brightness = mean(samples);
    LuminanceMetrics {
        blur: std_dev_about(samples, brightness),
        brightness: brightness as f32,
        contrast: std_dev_about(samples, f64::from(brightness as f32)),
    }
}

fn mean(samples: &[u8]) -> f64 {
    let sum: u64 = samples.iter().map(|&b| u64::from(b)).sum();
    sum as f64 / samples.len() as f64
}

fn std_dev_about(samples: &[u8], centre: f64) -> f32 {
    let variance = samples
        .iter()
        .map(|&b| {
            let d = f64::from(b) - centre;
            d * d
        })
        .sum::<f64>()
        / samples.len() as f64;
    variance.sqrt() as f32
}

/// Stateful scorer tracking the run of consecutive passing frames.
///
/// One scorer per frame stream. [`QualityScorer::reset`] must be called
/// whenever a capture attempt restarts.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    thresholds: QualityThresholds,
    consecutive_good_frames: u32,
    frames_analyzed: u64,
}

impl QualityScorer {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            consecutive_good_frames: 0,
            frames_analyzed: 0,
        }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Score a frame.
    pub fn score_frame(&mut self, frame: &Frame) -> QualityResult {
        self.score(&frame.data, frame.width, frame.height)
    }

    /// Score a luminance buffer of `width` x `height` samples.
    ///
    /// Only the first `width * height` samples are measured, so trailing
    /// padding is tolerated; a buffer shorter than the declared dimensions,
    /// or dimensions whose product overflows, is rejected. Malformed input yields a zeroed failing result
    /// and breaks the stability run.
    pub fn score(&mut self, samples: &[u8], width: u32, height: u32) -> QualityResult {
        self.frames_analyzed += 1;

        if samples.is_empty() {
            self.consecutive_good_frames = 0;
            return QualityResult::rejected(QualityIssue::EmptyBuffer);
        }
        let Some(pixels) = sample_count(width, height).and_then(|n| samples.get(..n)) else {
            tracing::debug!(
                width,
                height,
                len = samples.len(),
                "quality: buffer does not cover declared dimensions"
            );
            self.consecutive_good_frames = 0;
            return QualityResult::rejected(QualityIssue::InvalidBuffer);
        };

        let metrics = measure(pixels);
        let t = &self.thresholds;

        let blur_ok = metrics.blur >= t.blur;
        let too_dark = metrics.brightness < t.min_brightness;
        let too_bright = metrics.brightness > t.max_brightness;
        let contrast_ok = metrics.contrast >= t.contrast;
        let passed = blur_ok && !too_dark && !too_bright && contrast_ok;

        if passed {
            self.consecutive_good_frames = self.consecutive_good_frames.saturating_add(1);
        } else {
            self.consecutive_good_frames = 0;
        }

        let issue = if !blur_ok {
            Some(QualityIssue::Blurry)
        } else if too_dark {
            Some(QualityIssue::TooDark)
        } else if too_bright {
            Some(QualityIssue::TooBright)
        } else if !contrast_ok {
            Some(QualityIssue::LowContrast)
        } else {
            None
        };

        QualityResult {
            blur_score: metrics.blur,
            brightness_score: metrics.brightness,
            contrast_score: metrics.contrast,
            is_quality_ok: passed && self.has_minimum_frames(),
            issue,
        }
    }

    pub fn consecutive_good_frames(&self) -> u32 {
        self.consecutive_good_frames
    }

    pub fn has_minimum_frames(&self) -> bool {
        self.consecutive_good_frames >= self.thresholds.min_stable_frames
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    /// Zero both counters.
    pub fn reset(&mut self) {
        self.consecutive_good_frames = 0;
        self.frames_analyzed = 0;
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(QualityThresholds::default())
    }
}
