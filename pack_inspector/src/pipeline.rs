// THEORY:
// The `pipeline` module is the top-level API of the inspection engine. It wires the
// ROI gate, the active classifier, the event logger and the baseline store into a
// single per-frame `tick`, and `run` drives that tick from a frame source until the
// source closes or the operator quits.
//
// Key architectural principles:
// 1.  **Strict Sequence**: Acquire, classify, then log, one frame at a time. The
//     debounce guarantee (one line per verdict) depends on that ordering, so there
//     is no parallelism here at all.
// 2.  **Explicit State**: `tick` takes an `InspectionState` and returns the updated
//     one. The caller owns it; the pipeline keeps no hidden mutable verdicts.
// 3.  **Degrade, Don't Die**: A dropped frame, a failed detector call or a failed
//     append is logged, reported in the `TickReport`, and the loop moves on. Only a
//     closed source or an operator quit ends `run`.

use chrono::{NaiveDateTime, TimeDelta};
use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::InspectorConfig;
use crate::core_modules::baseline::BaselineStore;
use crate::core_modules::classifier::{Classification, Classifier, Outcome};
use crate::core_modules::event_log::{EventLogger, LogEntry, RecordResult};
use crate::core_modules::roi::RoiGate;
use crate::core_modules::state::{ExpiringMessage, InspectionState};
use crate::error::{AcquisitionError, ConfigurationError, InspectError};

/// When a verdict is written to the event log without an operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Only on `Command::Log`.
    #[default]
    Manual,
    /// Also whenever the outcome turns `Defective` after a non-defective frame.
    OnDefect,
}

/// Operator input, consumed between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Log,
    SetBaseline,
    Quit,
}

pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RgbImage, AcquisitionError>;
}

pub trait CommandSource {
    /// Returns the next pending command without blocking.
    fn poll(&mut self) -> Option<Command>;
}

impl CommandSource for std::sync::mpsc::Receiver<Command> {
    fn poll(&mut self) -> Option<Command> {
        self.try_recv().ok()
    }
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub classification: Option<Classification>,
    pub logged: Option<LogEntry>,
    pub baseline_saved: bool,
    pub errors: Vec<InspectError>,
    /// Operator-facing status text at the end of the tick.
    pub status: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub events_logged: u64,
    pub errors: u64,
    pub stopped_by_operator: bool,
}

pub struct InspectionPipeline {
    gate: RoiGate,
    mirror: bool,
    trigger: TriggerPolicy,
    classifier: Box<dyn Classifier>,
    logger: EventLogger,
    baselines: BaselineStore,
}

impl InspectionPipeline {
    pub fn new(config: &InspectorConfig, classifier: Box<dyn Classifier>) -> Result<Self, ConfigurationError> {
        let gate = RoiGate::new(config.roi, config.frame_width, config.frame_height)?;
        info!(
            roi = %config.roi,
            strategy = classifier.name(),
            trigger = ?config.trigger,
            "inspection pipeline ready"
        );
        Ok(Self {
            gate,
            mirror: config.mirror,
            trigger: config.trigger,
            classifier,
            logger: EventLogger::new(&config.log_path),
            baselines: BaselineStore::new(&config.baseline_path),
        })
    }

    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }

    /// Processes one frame and applies at most one operator command.
    pub fn tick(
        &mut self,
        frame: RgbImage,
        mut state: InspectionState,
        command: Option<Command>,
        now: NaiveDateTime,
    ) -> (TickReport, InspectionState) {
        let mut report = TickReport::default();
        state.expire(now);

        let frame = if self.mirror { imageops::flip_horizontal(&frame) } else { frame };
        let sample = match self.gate.sample(&frame) {
            Ok(sample) => sample,
            Err(err) => {
                warn!(%err, "frame skipped");
                report.errors.push(err.into());
                report.status = state.status_line(now).to_string();
                return (report, state);
            }
        };

        let previous = state.previous_outcome.take();
        match self.classifier.classify(&sample) {
            Ok(classification) => {
                debug!(outcome = classification.outcome.as_str(), "frame classified");
                state.previous_outcome = Some(classification.outcome);
                state.last_result = classification
                    .outcome
                    .is_loggable()
                    .then(|| classification.clone());
                report.classification = Some(classification);
            }
            Err(err) => {
                warn!(%err, "classification failed");
                state.previous_outcome = previous;
                state.last_error = Some(err.to_string());
                report.errors.push(err.into());
            }
        }

        let defective = state.previous_outcome == Some(Outcome::Defective);
        let became_defective = defective && previous != Some(Outcome::Defective);
        let auto_log =
            self.trigger == TriggerPolicy::OnDefect && defective && (became_defective || state.retry_pending);
        if command == Some(Command::Log) || auto_log {
            match self.logger.record(&mut state, now) {
                Ok(RecordResult::Logged(entry)) => {
                    state.retry_pending = false;
                    report.logged = Some(entry);
                }
                Ok(RecordResult::Skipped) => {}
                Err(err) => {
                    error!(%err, "event log append failed");
                    if auto_log {
                        state.retry_pending = true;
                    }
                    state.last_error = Some(err.to_string());
                    report.errors.push(err.into());
                }
            }
        }

        if command == Some(Command::SetBaseline) {
            match self.baselines.save(&sample.image) {
                Ok(()) => {
                    self.classifier.rebase(sample.image.clone());
                    state.ack = Some(ExpiringMessage::new("Baseline saved", now, TimeDelta::seconds(1)));
                    report.baseline_saved = true;
                }
                Err(err) => {
                    error!(%err, "baseline save failed");
                    state.last_error = Some(err.to_string());
                    report.errors.push(err.into());
                }
            }
        }

        report.status = state.status_line(now).to_string();
        (report, state)
    }
}

/// Local wall-clock time, the timestamp base of the event log.
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Drives `pipeline` until the source closes or a `Command::Quit` arrives.
pub fn run<S, C, K, R>(
    source: &mut S,
    pipeline: &mut InspectionPipeline,
    commands: &mut C,
    clock: K,
    mut on_tick: R,
) -> RunSummary
where
    S: FrameSource + ?Sized,
    C: CommandSource + ?Sized,
    K: Fn() -> NaiveDateTime,
    R: FnMut(&TickReport),
{
    let mut summary = RunSummary::default();
    let mut state = InspectionState::default();

    loop {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(AcquisitionError::SourceClosed) => {
                info!("frame source closed");
                break;
            }
            Err(err) => {
                warn!(%err, "frame skipped");
                summary.frames_dropped += 1;
                continue;
            }
        };

        let command = commands.poll();
        if command == Some(Command::Quit) {
            summary.stopped_by_operator = true;
            break;
        }

        let (report, next) = pipeline.tick(frame, state, command, clock());
        state = next;

        summary.frames_processed += 1;
        summary.errors += report.errors.len() as u64;
        if report.logged.is_some() {
            summary.events_logged += 1;
        }
        on_tick(&report);
    }

    info!(
        processed = summary.frames_processed,
        dropped = summary.frames_dropped,
        logged = summary.events_logged,
        "inspection loop finished"
    );
    summary
}
