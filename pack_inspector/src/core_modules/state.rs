// THEORY:
// The inspection loop carries a tiny amount of memory from one tick to the next:
// the verdict that is waiting to be logged, a short-lived acknowledgement for the
// operator, and the most recent error. All of it lives in `InspectionState`, which
// is passed into each tick and handed back out. Nothing is global, and nothing is
// mutated behind the loop's back by a timer.

use chrono::{NaiveDateTime, TimeDelta};

use crate::core_modules::classifier::{Classification, Outcome};

pub const IDLE_PROMPT: &str = "Press SPACE to log the current result, S to save a baseline, Q to quit";

/// A message that stops being shown once `expires_at` has passed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiringMessage {
    pub message: String,
    pub expires_at: NaiveDateTime,
}

impl ExpiringMessage {
    pub fn new(message: impl Into<String>, now: NaiveDateTime, lifetime: TimeDelta) -> Self {
        Self {
            message: message.into(),
            expires_at: now + lifetime,
        }
    }

    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Default)]
pub struct InspectionState {
    /// The latest loggable verdict that has not been written yet.
    pub last_result: Option<Classification>,
    /// Acknowledgement of the last successful append.
    pub ack: Option<ExpiringMessage>,
    /// Verdict of the previous frame, for edge-triggered logging.
    pub previous_outcome: Option<Outcome>,
    /// An automatic append failed; the next defective frame triggers again.
    pub retry_pending: bool,
    /// The most recent recoverable error, shown until the next one replaces it
    /// or an append succeeds.
    pub last_error: Option<String>,
}

impl InspectionState {
    /// Text for the operator overlay at `now`.
    pub fn status_line(&self, now: NaiveDateTime) -> &str {
        if let Some(ack) = self.ack.as_ref().filter(|a| a.is_active(now)) {
            return &ack.message;
        }
        match self.last_error.as_deref() {
            Some(error) => error,
            None => IDLE_PROMPT,
        }
    }

    /// Drops an acknowledgement whose time is up.
    pub fn expire(&mut self, now: NaiveDateTime) {
        if self.ack.as_ref().is_some_and(|a| !a.is_active(now)) {
            self.ack = None;
        }
    }
}
