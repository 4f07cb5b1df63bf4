// THEORY:
// Every failure the inspection rig can hit falls into one of four buckets, and
// each bucket has a different blast radius:
//
// 1.  `ConfigurationError` is fatal. It is raised before the first frame is
//     read and the process exits with a readable message.
// 2.  `AcquisitionError` costs a single frame. `SourceClosed` is the one variant
//     that ends the loop, and it ends it cleanly.
// 3.  `ClassificationError` costs a single classification. The tick reports it
//     and the next frame is processed normally.
// 4.  `PersistenceError` costs a single write. The caller keeps its pending
//     result so a later trigger can retry the append.
//
// Malformed log lines are not errors at all; the aggregator counts them.

use std::path::PathBuf;

use crate::core_modules::roi::Roi;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("ROI {roi} does not fit inside a {frame_width}x{frame_height} frame")]
    InvalidRegion {
        roi: Roi,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("{name} must lie in {min}..={max}, got {value}")]
    ThresholdOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("report window must cover 1..={max} days, got {days}")]
    WindowOutOfRange { days: u32, max: u32 },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("frame dropped: {0}")]
    Dropped(String),

    #[error("frame is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    FrameSize {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("frame source closed")]
    SourceClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("detector call failed: {0}")]
    Detector(String),

    #[error("baseline image is empty")]
    EmptyBaseline,

    #[error("baseline image {path} could not be loaded: {source}")]
    Baseline {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to append to event log {path}: {source}")]
    LogAppend {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to save baseline image {path}: {source}")]
    BaselineSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to read event log {path}: {source}")]
    LogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Any recoverable failure a single tick can report.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
