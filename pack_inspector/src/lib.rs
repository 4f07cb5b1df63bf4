// THEORY:
// This file is the entry point of the `pack_inspector` library crate. It exposes
// the inspection pipeline and the log aggregator as the public API used by the
// rig binary and the reporting dashboard.
//
// The crate is split along the same lines as the data flow: `core_modules` holds
// the individual stages (ROI gate, classifiers, event log, aggregator), `pipeline`
// strings them together into a per-frame tick, `config` and `error` carry the
// ambient concerns shared by every stage.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use config::{InspectorConfig, ReportConfig, StrategyConfig};
pub use core_modules::aggregator::{Aggregation, LabelStats, LogSnapshot, MAX_WINDOW_DAYS, WindowStatus, aggregate};
pub use core_modules::baseline::BaselineStore;
pub use core_modules::classifier::{
    BoundingBox, Classification, Classifier, Detection, Detector, DetectorClassifier, DetectorInput, Diagnostic,
    DifferenceClassifier, Outcome,
};
pub use core_modules::event_log::{EventLogger, LogEntry, RecordResult};
pub use core_modules::roi::{Roi, RoiGate, RoiSample};
pub use core_modules::state::{ExpiringMessage, InspectionState};
pub use pipeline::{
    Command, CommandSource, FrameSource, InspectionPipeline, RunSummary, TickReport, TriggerPolicy, local_now, run,
};
