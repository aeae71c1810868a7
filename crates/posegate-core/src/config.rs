//! Threshold configuration for the scorer, validator and state machine.
//!
//! Every struct deserializes with `#[serde(default)]`, so a TOML file only
//! needs to name the values it overrides:
//!
//! ```toml
//! [quality]
//! min_stable_frames = 6
//!
//! [liveness]
//! required_consecutive_frames = 3
//! quality_gate = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Pass thresholds for [`crate::QualityScorer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Minimum mean luminance (0-255). Darker frames fail.
    pub min_brightness: f32,
    /// Maximum mean luminance, inclusive. Brighter frames are overexposed.
    pub max_brightness: f32,
    /// Minimum blur score (luminance standard deviation).
    pub blur: f32,
    /// Minimum contrast score (luminance standard deviation).
    pub contrast: f32,
    /// Consecutive passing frames required before a frame is reported OK.
    pub min_stable_frames: u32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_brightness: 25.0,
            max_brightness: 230.0,
            blur: 10.0,
            contrast: 20.0,
            min_stable_frames: 10,
        }
    }
}

/// Angle and probability windows for [`crate::FaceValidator`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryThresholds {
    /// Exclusive bound on |yaw| and |roll| for a frontal face, in degrees.
    pub frontal_angle: f32,
    /// Eye-open probability each eye must exceed.
    pub eye_open: f32,
    /// Smile probability that must be exceeded to count as smiling.
    pub smile: f32,
    /// Exclusive lower bound on |yaw| for a side pose, in degrees.
    pub side_angle_min: f32,
    /// Exclusive upper bound on |yaw| for a side pose, in degrees.
    pub side_angle_max: f32,
}

impl Default for GeometryThresholds {
    fn default() -> Self {
        Self {
            frontal_angle: 15.0,
            eye_open: 0.5,
            smile: 0.5,
            side_angle_min: 20.0,
            side_angle_max: 45.0,
        }
    }
}

/// Temporal gating and scoring for [`crate::LivenessMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Consecutive pose-matching frames required to capture a pose.
    pub required_consecutive_frames: u32,
    pub front_weight: f32,
    pub left_weight: f32,
    pub right_weight: f32,
    /// Aggregate confidence at or above which a complete session is live.
    pub min_confidence: f32,
    /// Run the quality scorer before the detector and drop frames it rejects.
    pub quality_gate: bool,
    /// JPEG quality used for captured pose artifacts.
    pub artifact_jpeg_quality: u8,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            required_consecutive_frames: 5,
            front_weight: 0.4,
            left_weight: 0.3,
            right_weight: 0.3,
            min_confidence: 0.7,
            quality_gate: false,
            artifact_jpeg_quality: 90,
        }
    }
}

/// Complete configuration for one liveness engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub quality: QualityThresholds,
    pub geometry: GeometryThresholds,
    pub liveness: LivenessConfig,
}

impl EngineConfig {
    /// Parse a (possibly partial) TOML document and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Reject threshold combinations that break scorer or state-machine invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let q = &self.quality;
        if q.min_brightness > q.max_brightness {
            return Err(invalid(format!(
                "quality.min_brightness ({}) exceeds quality.max_brightness ({})",
                q.min_brightness, q.max_brightness
            )));
        }
        if q.min_stable_frames == 0 {
            return Err(invalid("quality.min_stable_frames must be at least 1"));
        }

        let g = &self.geometry;
        if g.frontal_angle <= 0.0 {
            return Err(invalid("geometry.frontal_angle must be positive"));
        }
        // The side window must start strictly past the frontal window so no
        // single yaw value can satisfy two poses.
        if g.side_angle_min <= g.frontal_angle {
            return Err(invalid(format!(
                "geometry.side_angle_min ({}) must exceed geometry.frontal_angle ({})",
                g.side_angle_min, g.frontal_angle
            )));
        }
        if g.side_angle_max <= g.side_angle_min {
            return Err(invalid(format!(
                "geometry.side_angle_max ({}) must exceed geometry.side_angle_min ({})",
                g.side_angle_max, g.side_angle_min
            )));
        }
        for (name, p) in [("eye_open", g.eye_open), ("smile", g.smile)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(format!("geometry.{name} must be within 0..=1")));
            }
        }

        let l = &self.liveness;
        if l.required_consecutive_frames == 0 {
            return Err(invalid(
                "liveness.required_consecutive_frames must be at least 1",
            ));
        }
        if l.front_weight < 0.0 || l.left_weight < 0.0 || l.right_weight < 0.0 {
            return Err(invalid("liveness pose weights must be non-negative"));
        }
        if !(0.0..=1.0).contains(&l.min_confidence) {
            return Err(invalid("liveness.min_confidence must be within 0..=1"));
        }
        if l.artifact_jpeg_quality == 0 || l.artifact_jpeg_quality > 100 {
            return Err(invalid("liveness.artifact_jpeg_quality must be within 1..=100"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
