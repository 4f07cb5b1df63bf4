// THEORY:
// The `event_log` module owns the only durable state in the system: a plain text
// file that grows one line per logged verdict. It has two halves that must agree
// on a single encoding:
//
// 1.  **Writing**: `EventLogger::record` appends the pending verdict from an
//     `InspectionState` and then clears it. A second trigger with nothing pending
//     is a no-op, so one verdict can never produce two lines. If the append fails
//     the pending verdict stays put and the next trigger retries it.
// 2.  **Reading**: `LogEntry::parse` turns a line back into an entry. It accepts the
//     current `<timestamp>, <label>(<confidence>)` form and the older
//     `<timestamp>, <free text>` form, where the text is kept as an opaque label.
//
// Each line goes out in a single `write_all` on a file opened for append, so a
// concurrent reader can at worst see an unterminated final line.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core_modules::state::{ExpiringMessage, InspectionState};
use crate::error::PersistenceError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ACK_LIFETIME_SECONDS: i64 = 1;

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: NaiveDateTime,
    pub label: String,
    pub confidence: Option<f64>,
}

impl LogEntry {
    /// Builds an entry ready for writing: sub-second precision is dropped and the
    /// label is flattened onto a single line. Without a confidence, a trailing
    /// `(<number>)` in the label is written as `[<number>]` so it cannot be read
    /// back as one.
    pub fn new(timestamp: NaiveDateTime, label: &str, confidence: Option<f64>) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        let confidence = confidence.filter(|c| c.is_finite());
        let mut label = sanitize_label(label);
        if confidence.is_none() {
            bracket_trailing_number(&mut label);
        }
        Self {
            timestamp,
            label,
            confidence,
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (timestamp, text) = line.split_once(", ")?;
        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let (label, confidence) = match split_confidence(text) {
            Some((label, confidence)) => (label, Some(confidence)),
            None => (text, None),
        };
        Some(Self {
            timestamp,
            label: label.to_string(),
            confidence,
        })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = self.timestamp.format(TIMESTAMP_FORMAT);
        match self.confidence {
            Some(confidence) => write!(f, "{timestamp}, {}({confidence:.2})", self.label),
            None => write!(f, "{timestamp}, {}", self.label),
        }
    }
}

/// Splits `label(0.87)` into its parts. The parenthetical only counts when it is
/// the last thing on the line and holds a finite number.
fn split_confidence(text: &str) -> Option<(&str, f64)> {
    let inner = text.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let confidence: f64 = inner[open + 1..].trim().parse().ok()?;
    let label = inner[..open].trim_end();
    if !confidence.is_finite() || label.is_empty() {
        return None;
    }
    Some((label, confidence))
}

fn sanitize_label(label: &str) -> String {
    label.replace(['\r', '\n'], " ").trim().to_string()
}

fn bracket_trailing_number(label: &mut String) {
    if split_confidence(label).is_none() {
        return;
    }
    if let Some(open) = label.rfind('(') {
        label.replace_range(open..open + 1, "[");
        label.pop();
        label.push(']');
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordResult {
    /// Nothing was pending; the trigger was ignored.
    Skipped,
    Logged(LogEntry),
}

/// Appends verdicts to the event log file.
#[derive(Debug, Clone)]
pub struct EventLogger {
    path: PathBuf,
}

impl EventLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LogEntry) -> Result<(), PersistenceError> {
        let line = format!("{entry}\n");
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|source| PersistenceError::LogAppend {
                path: self.path.clone(),
                source,
            })
    }

    /// Logs the pending verdict in `state`, at most once.
    pub fn record(&self, state: &mut InspectionState, now: NaiveDateTime) -> Result<RecordResult, PersistenceError> {
        let Some(pending) = state.last_result.as_ref().filter(|r| r.outcome.is_loggable()) else {
            debug!("log trigger ignored, nothing pending");
            return Ok(RecordResult::Skipped);
        };

        let entry = LogEntry::new(now, pending.log_label(), pending.confidence);
        self.append(&entry)?;

        info!(path = %self.path.display(), entry = %entry, "event logged");
        state.last_result = None;
        state.last_error = None;
        state.ack = Some(ExpiringMessage::new(
            format!("Logged at {}", entry.timestamp.format(TIMESTAMP_FORMAT)),
            now,
            TimeDelta::seconds(ACK_LIFETIME_SECONDS),
        ));
        Ok(RecordResult::Logged(entry))
    }
}
