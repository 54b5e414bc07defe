//! Error logging and aggregation.
//!
//! [`ErrorMonitor`] is the single place failures are recorded. Every record is
//! written to the durable daily log and appended to a bounded in-memory
//! history, which backs windowed summaries, repeated-error detection and the
//! troubleshooting report.
//!
//! The monitor is shared between callers by reference (typically inside an
//! `Arc`); history and file writes are each guarded by a mutex.

pub mod log_file;
pub mod report;

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorCode, ErrorContext, Severity};

pub use log_file::{DailyLog, LogFileInfo};
pub use report::{Priority, Recommendation, ReportMetadata, ReportThresholds, TroubleshootingReport};

/// Errors raised by monitor maintenance operations (export, log cleanup).
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// One recorded failure. Immutable once appended to the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
    /// Rendered cause chain of the original failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub recovery_attempted: bool,
    pub recovery_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_details: Option<String>,
}

impl HistoryEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(code: ErrorCode, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            timestamp: Utc::now(),
            code,
            message: message.into(),
            severity,
            context: None,
            cause: None,
            recovery_attempted: false,
            recovery_successful: false,
            recovery_details: None,
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_recovery(
        mut self,
        attempted: bool,
        successful: bool,
        details: Option<String>,
    ) -> Self {
        self.recovery_attempted = attempted;
        self.recovery_successful = attempted && successful;
        self.recovery_details = details;
        self
    }

    /// Copy of the entry with the context's stack trace removed.
    pub fn without_stack_trace(&self) -> Self {
        let mut entry = self.clone();
        if let Some(ctx) = entry.context.as_mut() {
            ctx.stack_trace = None;
        }
        entry
    }
}

/// Bounded FIFO of history entries; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct ErrorHistory {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl ErrorHistory {
    /// Creates an empty history. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends an entry, returning the evicted one if the history was full.
    pub fn push(&mut self, entry: HistoryEntry) -> Option<HistoryEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

/// Aggregate statistics over a trailing time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub time_period_hours: u32,
    pub total_errors: usize,
    pub error_counts: BTreeMap<ErrorCode, usize>,
    pub severity_counts: BTreeMap<Severity, usize>,
    pub recovery_attempted: usize,
    pub recovery_successful: usize,
    /// Successful recoveries over attempted recoveries, 0.0 when nothing was attempted.
    pub recovery_success_rate: f64,
    pub most_common_error: Option<ErrorCode>,
}

impl ErrorSummary {
    /// Summarises `entries`, which are assumed to be inside the window already.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a HistoryEntry>,
        time_period_hours: u32,
    ) -> Self {
        let mut error_counts = BTreeMap::new();
        let mut severity_counts = BTreeMap::new();
        let mut total_errors = 0;
        let mut recovery_attempted = 0;
        let mut recovery_successful = 0;

        for entry in entries {
            total_errors += 1;
            *error_counts.entry(entry.code).or_insert(0) += 1;
            *severity_counts.entry(entry.severity).or_insert(0) += 1;
            if entry.recovery_attempted {
                recovery_attempted += 1;
                if entry.recovery_successful {
                    recovery_successful += 1;
                }
            }
        }

        let recovery_success_rate = if recovery_attempted == 0 {
            0.0
        } else {
            recovery_successful as f64 / recovery_attempted as f64
        };
        // Highest count wins; ties go to the lower code.
        let most_common_error = error_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(code, _)| *code);

        Self {
            time_period_hours,
            total_errors,
            error_counts,
            severity_counts,
            recovery_attempted,
            recovery_successful,
            recovery_success_rate,
            most_common_error,
        }
    }

    pub fn count_for(&self, code: ErrorCode) -> usize {
        self.error_counts.get(&code).copied().unwrap_or(0)
    }

    pub fn count_for_severity(&self, severity: Severity) -> usize {
        self.severity_counts.get(&severity).copied().unwrap_or(0)
    }
}

/// A maximal run of identical consecutive codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatedErrorPattern {
    /// Always `repeated_error`.
    pub pattern_type: String,
    pub error_code: ErrorCode,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Patterns found in the history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPatterns {
    pub repeated_errors: Vec<RepeatedErrorPattern>,
    /// Entry count per UTC hour of day (0-23); hours without entries are omitted.
    pub hourly_distribution: BTreeMap<u32, usize>,
    pub peak_hour: Option<u32>,
}

impl ErrorPatterns {
    /// Scans `entries` in chronological order.
    ///
    /// Every maximal run of at least `min_run` identical consecutive codes is
    /// reported once, with its full length.
    pub fn detect(entries: &[HistoryEntry], min_run: usize) -> Self {
        let mut ordered: Vec<&HistoryEntry> = entries.iter().collect();
        ordered.sort_by_key(|e| e.timestamp);

        let mut repeated_errors = Vec::new();
        let mut run_start = 0;
        for i in 1..=ordered.len() {
            let run_ends = i == ordered.len() || ordered[i].code != ordered[run_start].code;
            if run_ends {
                let count = i - run_start;
                if count >= min_run.max(1) {
                    repeated_errors.push(RepeatedErrorPattern {
                        pattern_type: "repeated_error".to_string(),
                        error_code: ordered[run_start].code,
                        count,
                        first_seen: ordered[run_start].timestamp,
                        last_seen: ordered[i - 1].timestamp,
                    });
                }
                run_start = i;
            }
        }

        let mut hourly_distribution = BTreeMap::new();
        for entry in &ordered {
            *hourly_distribution.entry(entry.timestamp.hour()).or_insert(0) += 1;
        }
        let peak_hour = hourly_distribution
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(hour, _)| *hour);

        Self {
            repeated_errors,
            hourly_distribution,
            peak_hour,
        }
    }

    pub fn longest_run(&self) -> usize {
        self.repeated_errors.iter().map(|p| p.count).max().unwrap_or(0)
    }
}

/// Settings for an [`ErrorMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Directory of the durable log; `None` keeps everything in memory.
    pub log_dir: Option<PathBuf>,
    pub logger_name: String,
    pub history_capacity: usize,
    pub max_log_files: usize,
    /// Minimum run length reported as a repeated-error pattern.
    pub repeated_run_min: usize,
    /// Number of entries included in a report's `recent_errors`.
    pub recent_entries: usize,
    pub thresholds: ReportThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            logger_name: "initguard.errors".to_string(),
            history_capacity: 100,
            max_log_files: 30,
            repeated_run_min: 3,
            recent_entries: 10,
            thresholds: ReportThresholds::default(),
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_max_log_files(mut self, max: usize) -> Self {
        self.max_log_files = max;
        self
    }

    pub fn with_repeated_run_min(mut self, min: usize) -> Self {
        self.repeated_run_min = min;
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records failures and answers analytics queries over them.
#[derive(Debug)]
pub struct ErrorMonitor {
    config: MonitorConfig,
    history: Mutex<ErrorHistory>,
    log: Mutex<Option<DailyLog>>,
    degraded: AtomicBool,
}

impl ErrorMonitor {
    /// Creates a monitor, opening the durable log if a directory is configured.
    ///
    /// If the log directory cannot be created the monitor starts in degraded,
    /// in-memory-only mode instead of failing.
    pub fn new(config: MonitorConfig) -> Self {
        let mut degraded = false;
        let log = match &config.log_dir {
            Some(dir) => match DailyLog::open(dir, &config.logger_name, config.max_log_files) {
                Ok(log) => Some(log),
                Err(e) => {
                    tracing::warn!(
                        log_dir = %dir.display(),
                        error = %e,
                        "error log unavailable, keeping history in memory only"
                    );
                    degraded = true;
                    None
                }
            },
            None => None,
        };
        Self {
            history: Mutex::new(ErrorHistory::new(config.history_capacity)),
            log: Mutex::new(log),
            degraded: AtomicBool::new(degraded),
            config,
        }
    }

    /// Creates a monitor without a durable log.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(MonitorConfig::default().with_history_capacity(capacity))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.config.log_dir.as_deref()
    }

    /// True once a durable log write has failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Records one failure: a durable log line plus a history entry.
    ///
    /// Never fails. A durable log write error switches the monitor to
    /// in-memory-only mode.
    pub fn record(&self, entry: HistoryEntry) {
        let (operation, backend_type) = entry
            .context
            .as_ref()
            .map(|c| (c.operation.as_str(), c.backend_type.as_str()))
            .unwrap_or(("unknown", "unknown"));
        match entry.severity {
            Severity::Critical | Severity::High => tracing::error!(
                error_code = %entry.code,
                severity = %entry.severity,
                operation,
                backend_type,
                "{}",
                entry.message
            ),
            Severity::Medium => tracing::warn!(
                error_code = %entry.code,
                severity = %entry.severity,
                operation,
                backend_type,
                "{}",
                entry.message
            ),
            Severity::Low => tracing::info!(
                error_code = %entry.code,
                severity = %entry.severity,
                operation,
                backend_type,
                "{}",
                entry.message
            ),
        }

        {
            let mut log = lock(&self.log);
            if let Some(writer) = log.as_mut() {
                if let Err(e) = writer.append(&entry) {
                    tracing::warn!(
                        error = %e,
                        "failed to write error log, keeping history in memory only"
                    );
                    *log = None;
                    self.degraded.store(true, Ordering::SeqCst);
                }
            }
        }

        lock(&self.history).push(entry);
    }

    /// Appends an entry to the in-memory history only.
    pub fn push_entry(&self, entry: HistoryEntry) {
        lock(&self.history).push(entry);
    }

    /// Replaces the history with the entries in the durable log files,
    /// keeping the newest ones.
    ///
    /// Entries recorded earlier by this monitor are already in the log, so
    /// reloading never duplicates them. Without a log directory the history
    /// is left untouched. Returns the number of entries now in the history.
    pub fn load_history(&self) -> MonitorResult<usize> {
        let Some(dir) = self.log_dir() else {
            return Ok(self.len());
        };
        let entries = log_file::read_entries(dir)?;
        let mut history = lock(&self.history);
        history.clear();
        for entry in entries {
            history.push(entry);
        }
        Ok(history.len())
    }

    /// Snapshot of the history, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        lock(&self.history).iter().cloned().collect()
    }

    /// History entries no older than `window_hours` before `now`.
    ///
    /// A window reaching past the earliest representable time covers the
    /// whole history.
    pub fn entries_since(&self, window_hours: u32, now: DateTime<Utc>) -> Vec<HistoryEntry> {
        let cutoff = Duration::try_hours(i64::from(window_hours))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        lock(&self.history)
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.history).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summary of the trailing `window_hours` hours.
    pub fn summarize(&self, window_hours: u32) -> ErrorSummary {
        self.summarize_at(window_hours, Utc::now())
    }

    /// Summary of the `window_hours` hours before `now`.
    pub fn summarize_at(&self, window_hours: u32, now: DateTime<Utc>) -> ErrorSummary {
        let entries = self.entries_since(window_hours, now);
        ErrorSummary::from_entries(&entries, window_hours)
    }

    /// Repeated runs and hourly distribution over the whole history.
    pub fn detect_patterns(&self) -> ErrorPatterns {
        ErrorPatterns::detect(&self.entries(), self.config.repeated_run_min)
    }

    /// Clears the in-memory history.
    pub fn clear(&self) {
        lock(&self.history).clear();
        tracing::info!("error history cleared");
    }

    /// Deletes every durable log file. Returns the number of files removed.
    pub fn clear_logs(&self) -> MonitorResult<usize> {
        let mut log = lock(&self.log);
        let removed = match (log.as_mut(), self.log_dir()) {
            (Some(writer), _) => writer.remove_all()?,
            (None, Some(dir)) => log_file::remove_all(dir)?,
            (None, None) => 0,
        };
        Ok(removed)
    }

    /// Metadata of the durable log files, oldest first.
    pub fn log_files(&self) -> Vec<LogFileInfo> {
        self.log_dir().map(log_file::inventory).unwrap_or_default()
    }
}
