// THEORY:
// Everything tunable about the rig lives in one TOML file. It is read and checked
// once, before the first frame, and any problem stops the process with a message
// naming the offending value. Nothing here is re-validated per frame.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core_modules::aggregator::{DEFAULT_RECENT_LIMIT, DEFAULT_WINDOW_DAYS, MAX_WINDOW_DAYS};
use crate::core_modules::classifier::DetectorInput;
use crate::core_modules::roi::{Roi, RoiGate};
use crate::error::ConfigurationError;
use crate::pipeline::TriggerPolicy;

pub const DEFAULT_DIFFERENCE_THRESHOLD: f64 = 25.0;
pub const DEFAULT_PRESENCE_THRESHOLD: f64 = 0.4;
pub const DEFAULT_CONFIDENCE_CUTOFF: f32 = 0.5;

/// Top-level configuration for an inspection rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorConfig {
    /// Width of every incoming frame in pixels.
    pub frame_width: u32,
    /// Height of every incoming frame in pixels.
    pub frame_height: u32,
    /// Flip frames horizontally before inspection (webcams deliver a mirror image).
    #[serde(default)]
    pub mirror: bool,
    pub roi: Roi,
    pub strategy: StrategyConfig,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    #[serde(default = "default_baseline_path")]
    pub baseline_path: PathBuf,
    #[serde(default)]
    pub trigger: TriggerPolicy,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Difference {
        /// Mean HSV difference above which a product is defective, on a 0..=255 scale.
        #[serde(default = "default_threshold")]
        threshold: f64,
        #[serde(default = "default_true")]
        presence_check: bool,
        #[serde(default = "default_presence_threshold")]
        presence_threshold: f64,
    },
    Detector {
        /// Detections below this confidence are ignored.
        #[serde(default = "default_confidence_cutoff")]
        confidence_cutoff: f32,
        #[serde(default)]
        input: DetectorInput,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from("defect_log.txt")
}

fn default_baseline_path() -> PathBuf {
    PathBuf::from("baseline.jpg")
}

fn default_threshold() -> f64 {
    DEFAULT_DIFFERENCE_THRESHOLD
}

fn default_confidence_cutoff() -> f32 {
    DEFAULT_CONFIDENCE_CUTOFF
}

fn default_true() -> bool {
    true
}

fn default_presence_threshold() -> f64 {
    DEFAULT_PRESENCE_THRESHOLD
}

fn default_window_days() -> u32 {
    DEFAULT_WINDOW_DAYS
}

fn default_recent_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}

impl InspectorConfig {
    /// Reads, parses and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(path = %path.display(), roi = %config.roi, "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        RoiGate::new(self.roi, self.frame_width, self.frame_height)?;

        match &self.strategy {
            StrategyConfig::Difference {
                threshold,
                presence_threshold,
                ..
            } => {
                check_range("threshold", *threshold, 0.0, 255.0)?;
                check_range("presence_threshold", *presence_threshold, -1.0, 1.0)?;
            }
            StrategyConfig::Detector { confidence_cutoff, .. } => {
                check_range("confidence_cutoff", *confidence_cutoff as f64, 0.0, 1.0)?;
            }
        }

        let days = self.report.window_days;
        if !(1..=MAX_WINDOW_DAYS).contains(&days) {
            return Err(ConfigurationError::WindowOutOfRange {
                days,
                max: MAX_WINDOW_DAYS,
            });
        }
        Ok(())
    }

    /// Presence threshold to apply, if the strategy uses one.
    pub fn presence_threshold(&self) -> Option<f64> {
        match self.strategy {
            StrategyConfig::Difference {
                presence_check: true,
                presence_threshold,
                ..
            } => Some(presence_threshold),
            _ => None,
        }
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigurationError::ThresholdOutOfRange { name, value, min, max })
    }
}
