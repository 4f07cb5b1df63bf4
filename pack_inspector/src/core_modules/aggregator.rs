// THEORY:
// The `aggregator` module is the read side of the event log. It never writes to
// the file and keeps nothing between calls: every request rescans the whole log
// and rebuilds the summary from scratch.
//
// Key architectural principles:
// 1.  **Snapshot Reads**: `LogSnapshot::read` reads the file to its end once and
//     works on those bytes. The logger may be appending at the same moment, so a
//     final line without its newline is treated as unfinished and skipped.
// 2.  **Skips Are Data**: A line that does not parse is counted in `parse_skips`
//     and the scan moves on. One corrupt line never costs the rest of the log.
// 3.  **No Data Is An Answer**: An empty log, a missing log, or a window with
//     nothing in it all produce an `Aggregation` with `WindowStatus::NoData`.
//     Errors are reserved for I/O failures.
// 4.  **Deterministic Output**: Buckets are ordered maps and the recent list is a
//     stable sort, so the same log and the same `now` always give the same result.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core_modules::event_log::LogEntry;
use crate::error::PersistenceError;

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_RECENT_LIMIT: usize = 10;
/// Longest window `aggregate` will cover; longer requests are clamped to it.
pub const MAX_WINDOW_DAYS: u32 = 3660;

/// Every parseable entry of the log in append order, plus the number of lines
/// that were skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSnapshot {
    pub entries: Vec<LogEntry>,
    pub parse_skips: usize,
}

impl LogSnapshot {
    /// Reads the log at `path`. A log that does not exist yet is an empty snapshot.
    pub fn read(path: &Path) -> Result<Self, PersistenceError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Self::from_bytes(&bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "event log not found, treating as empty");
                Ok(Self::default())
            }
            Err(source) => Err(PersistenceError::LogRead {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut snapshot = Self::default();
        let segments: Vec<&[u8]> = bytes.split(|b| *b == b'\n').collect();
        let last = segments.len() - 1;

        for (index, segment) in segments.into_iter().enumerate() {
            let line = match std::str::from_utf8(segment) {
                Ok(line) => line,
                Err(_) => {
                    snapshot.parse_skips += 1;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if index == last {
                // Unterminated: possibly still being written.
                snapshot.parse_skips += 1;
                continue;
            }
            match LogEntry::parse(line) {
                Some(entry) => snapshot.entries.push(entry),
                None => snapshot.parse_skips += 1,
            }
        }

        if snapshot.parse_skips > 0 {
            warn!(skipped = snapshot.parse_skips, "event log contains unparseable lines");
        }
        snapshot
    }

    pub fn valid_lines(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    NoData,
    Populated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    pub count: usize,
    /// Mean over the entries of this label that carry a confidence.
    pub mean_confidence: Option<f64>,
}

/// The summary handed to the reporting surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub status: WindowStatus,
    pub window_days: u32,
    pub window_start: NaiveDateTime,
    pub now: NaiveDateTime,
    pub total_count: usize,
    pub today_count: usize,
    pub distinct_label_count: usize,
    pub mean_confidence: Option<f64>,
    /// day -> label -> count, for stacked per-day charts.
    pub daily_by_label: BTreeMap<NaiveDate, BTreeMap<String, usize>>,
    pub daily_totals: BTreeMap<NaiveDate, usize>,
    /// Every calendar day the window touches, oldest first.
    pub day_axis: Vec<NaiveDate>,
    pub label_stats: BTreeMap<String, LabelStats>,
    /// Newest first.
    pub recent_entries: Vec<LogEntry>,
    pub valid_lines: usize,
    pub parse_skips: usize,
}

impl Aggregation {
    pub fn has_data(&self) -> bool {
        self.status == WindowStatus::Populated
    }

    pub fn daily_count(&self, day: NaiveDate, label: &str) -> usize {
        self.daily_by_label
            .get(&day)
            .and_then(|labels| labels.get(label))
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct MeanAccumulator {
    sum: f64,
    count: usize,
}

impl MeanAccumulator {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Summarizes the entries with `timestamp >= now - window_days`.
/// `window_days` is clamped to `MAX_WINDOW_DAYS`.
pub fn aggregate(snapshot: &LogSnapshot, window_days: u32, now: NaiveDateTime, recent_limit: usize) -> Aggregation {
    let window_days = window_days.min(MAX_WINDOW_DAYS);
    let window_start = now
        .checked_sub_signed(TimeDelta::days(window_days as i64))
        .unwrap_or(NaiveDateTime::MIN);
    let today = now.date();

    let in_window: Vec<&LogEntry> = snapshot
        .entries
        .iter()
        .filter(|entry| entry.timestamp >= window_start)
        .collect();

    let mut overall = MeanAccumulator::default();
    let mut per_label: BTreeMap<String, (usize, MeanAccumulator)> = BTreeMap::new();
    let mut daily_by_label: BTreeMap<NaiveDate, BTreeMap<String, usize>> = BTreeMap::new();
    let mut daily_totals: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    let mut labels: BTreeSet<&str> = BTreeSet::new();
    let mut today_count = 0;

    for entry in &in_window {
        let day = entry.timestamp.date();
        if day == today {
            today_count += 1;
        }
        overall.push(entry.confidence);
        labels.insert(entry.label.as_str());

        let (count, mean) = per_label.entry(entry.label.clone()).or_default();
        *count += 1;
        mean.push(entry.confidence);

        *daily_by_label
            .entry(day)
            .or_default()
            .entry(entry.label.clone())
            .or_default() += 1;
        *daily_totals.entry(day).or_default() += 1;
    }

    let label_stats = per_label
        .into_iter()
        .map(|(label, (count, mean))| {
            (
                label,
                LabelStats {
                    count,
                    mean_confidence: mean.mean(),
                },
            )
        })
        .collect();

    let mut recent_entries: Vec<LogEntry> = in_window.iter().map(|e| (*e).clone()).collect();
    recent_entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent_entries.truncate(recent_limit);

    let day_axis = window_start.date().iter_days().take_while(|d| *d <= today).collect();

    let total_count = in_window.len();
    Aggregation {
        status: if total_count == 0 {
            WindowStatus::NoData
        } else {
            WindowStatus::Populated
        },
        window_days,
        window_start,
        now,
        total_count,
        today_count,
        distinct_label_count: labels.len(),
        mean_confidence: overall.mean(),
        daily_by_label,
        daily_totals,
        day_axis,
        label_stats,
        recent_entries,
        valid_lines: snapshot.valid_lines(),
        parse_skips: snapshot.parse_skips,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(h, mi, 0).unwrap()
    }

    fn day(y: i32, mo: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap()
    }

    const SCENARIO: &str = "2024-06-01 09:00:00, scratch(0.91)\n\
                            2024-06-01 09:05:00, tearing(0.60)\n\
                            2024-05-20 09:00:00, scratch(0.99)\n";

    #[test]
    fn trailing_week_scenario() {
        let snapshot = LogSnapshot::from_bytes(SCENARIO.as_bytes());
        let summary = aggregate(&snapshot, 7, ts(2024, 6, 1, 10, 0), DEFAULT_RECENT_LIMIT);

        assert_eq!(summary.status, WindowStatus::Populated);
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.today_count, 2);
        assert_eq!(summary.distinct_label_count, 2);
        assert_eq!(summary.daily_count(day(2024, 6, 1), "scratch"), 1);
        assert_eq!(summary.daily_count(day(2024, 6, 1), "tearing"), 1);
        assert_eq!(summary.daily_count(day(2024, 5, 20), "scratch"), 0);
        assert_eq!(summary.daily_totals.get(&day(2024, 6, 1)), Some(&2));
        assert!((summary.mean_confidence.unwrap() - 0.755).abs() < 1e-9);
        assert_eq!(summary.label_stats["scratch"].count, 1);
        assert_eq!(summary.label_stats["scratch"].mean_confidence, Some(0.91));
        assert_eq!(summary.valid_lines, 3);
        assert_eq!(summary.parse_skips, 0);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let snapshot = LogSnapshot::from_bytes(SCENARIO.as_bytes());
        let now = ts(2024, 6, 1, 10, 0);
        assert_eq!(aggregate(&snapshot, 30, now, 10), aggregate(&snapshot, 30, now, 10));
    }

    #[test]
    fn empty_log_is_no_data_not_an_error() {
        let summary = aggregate(&LogSnapshot::from_bytes(b""), 7, ts(2024, 6, 1, 10, 0), 10);
        assert_eq!(summary.total_count, 0);
        assert_eq!(summary.status, WindowStatus::NoData);
        assert!(!summary.has_data());
        assert_eq!(summary.mean_confidence, None);
        assert!(summary.recent_entries.is_empty());
    }

    #[test]
    fn missing_log_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = LogSnapshot::read(&dir.path().join("absent.txt")).unwrap();
        assert_eq!(snapshot, LogSnapshot::default());
    }

    #[test]
    fn window_with_only_old_entries_is_no_data() {
        let snapshot = LogSnapshot::from_bytes(b"2024-01-01 09:00:00, scratch(0.5)\n");
        let summary = aggregate(&snapshot, 7, ts(2024, 6, 1, 10, 0), 10);
        assert_eq!(summary.status, WindowStatus::NoData);
        assert_eq!(summary.valid_lines, 1);
    }

    #[test]
    fn malformed_line_is_counted_and_skipped() {
        let log = "2024-06-01 09:00:00, scratch(0.91)\n\
                   this is not a log line\n\
                   2024-06-01 09:05:00, tearing(0.60)\n";
        let snapshot = LogSnapshot::from_bytes(log.as_bytes());
        assert_eq!(snapshot.valid_lines(), 2);
        assert_eq!(snapshot.parse_skips, 1);

        let summary = aggregate(&snapshot, 7, ts(2024, 6, 1, 10, 0), 10);
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.parse_skips, 1);
    }

    #[test]
    fn unterminated_final_line_is_a_skip() {
        let log = b"2024-06-01 09:00:00, scratch(0.91)\n2024-06-01 09:05:00, tear";
        let snapshot = LogSnapshot::from_bytes(log);
        assert_eq!(snapshot.valid_lines(), 1);
        assert_eq!(snapshot.parse_skips, 1);
    }

    #[test]
    fn invalid_utf8_and_blank_lines() {
        let mut log = b"2024-06-01 09:00:00, scratch(0.91)\n\n   \n".to_vec();
        log.extend_from_slice(&[0xff, 0xfe, b'\n']);
        log.extend_from_slice(b"2024-06-01 09:01:00, dent\r\n");
        let snapshot = LogSnapshot::from_bytes(&log);
        assert_eq!(snapshot.valid_lines(), 2);
        assert_eq!(snapshot.parse_skips, 1);
    }

    #[test]
    fn entries_without_confidence_count_but_do_not_skew_the_mean() {
        let log = "2024-06-01 09:00:00, scratch(0.80)\n\
                   2024-06-01 09:01:00, MeanDiff=31.20, Match=0.55\n";
        let summary = aggregate(&LogSnapshot::from_bytes(log.as_bytes()), 7, ts(2024, 6, 1, 10, 0), 10);
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.mean_confidence, Some(0.80));
        assert_eq!(summary.label_stats["MeanDiff=31.20, Match=0.55"].mean_confidence, None);
    }

    #[test]
    fn recent_entries_are_newest_first_with_stable_ties() {
        let log = "2024-06-01 09:00:00, a(0.10)\n\
                   2024-06-01 09:30:00, b(0.20)\n\
                   2024-06-01 09:30:00, c(0.30)\n\
                   2024-06-01 09:10:00, d(0.40)\n";
        let summary = aggregate(&LogSnapshot::from_bytes(log.as_bytes()), 7, ts(2024, 6, 1, 10, 0), 3);
        let labels: Vec<&str> = summary.recent_entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["b", "c", "d"]);
    }

    #[test]
    fn today_uses_the_calendar_date_of_now() {
        let log = "2024-05-31 23:59:59, scratch(0.50)\n\
                   2024-06-01 00:00:00, scratch(0.50)\n";
        let summary = aggregate(&LogSnapshot::from_bytes(log.as_bytes()), 7, ts(2024, 6, 1, 0, 30), 10);
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.today_count, 1);
    }

    #[test]
    fn window_boundary_is_inclusive_and_axis_spans_every_day() {
        let log = "2024-05-25 10:00:00, scratch(0.50)\n\
                   2024-05-25 09:59:59, scratch(0.50)\n";
        let summary = aggregate(&LogSnapshot::from_bytes(log.as_bytes()), 7, ts(2024, 6, 1, 10, 0), 10);
        assert_eq!(summary.total_count, 1);
        assert_eq!(summary.day_axis.len(), 8);
        assert_eq!(summary.day_axis.first(), Some(&day(2024, 5, 25)));
        assert_eq!(summary.day_axis.last(), Some(&day(2024, 6, 1)));
    }

    #[test]
    fn oversized_window_is_clamped() {
        let snapshot = LogSnapshot::from_bytes(SCENARIO.as_bytes());
        let now = ts(2024, 6, 1, 10, 0);
        for days in [MAX_WINDOW_DAYS + 1, 1_000_000, u32::MAX] {
            let summary = aggregate(&snapshot, days, now, 10);
            assert_eq!(summary.window_days, MAX_WINDOW_DAYS);
            assert_eq!(summary.total_count, 3);
            assert_eq!(summary.day_axis.len(), MAX_WINDOW_DAYS as usize + 1);
        }
    }

    #[test]
    fn window_reaching_before_the_calendar_starts_does_not_overflow() {
        let snapshot = LogSnapshot::from_bytes(SCENARIO.as_bytes());
        let now = NaiveDateTime::MIN + TimeDelta::days(3);
        let summary = aggregate(&snapshot, 30, now, 10);
        assert_eq!(summary.window_start, NaiveDateTime::MIN);
        assert_eq!(summary.day_axis.len(), 4);
    }
}
