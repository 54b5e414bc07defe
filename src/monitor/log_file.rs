//! Durable, dated error log.
//!
//! One file per calendar day (UTC), one line per record:
//!
//! ```text
//! TIMESTAMP | LEVEL | LOGGER | MESSAGE | error_code=<code> | severity=<level> | operation=<op> | backend_type=<type>
//! ```
//!
//! A trailing `| recovery=<attempted|succeeded>` field is written when a
//! recovery was attempted. Files beyond the configured maximum are pruned,
//! oldest first.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::HistoryEntry;
use crate::error::{ErrorCode, ErrorContext, Severity};

/// File name prefix of the durable error logs.
pub const LOG_FILE_PREFIX: &str = "db_init_errors";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<ts>\S+) \| (?P<level>[A-Z]+) \| (?P<logger>[^|]*?) \| (?P<msg>.*?) \| error_code=(?P<code>\w+) \| severity=(?P<sev>\w+) \| operation=(?P<op>[^|]*?) \| backend_type=(?P<backend>[^|]*?)(?: \| recovery=(?P<rec>\w+))?(?: \|.*)?$",
        )
        .expect("log line regex is valid")
    })
}

fn file_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^{}_(?P<date>\d{{4}}-\d{{2}}-\d{{2}})\.log$",
            LOG_FILE_PREFIX
        ))
        .expect("log file name regex is valid")
    })
}

/// File name of the log for `date`.
pub fn log_file_name(date: NaiveDate) -> String {
    format!("{}_{}.log", LOG_FILE_PREFIX, date.format("%Y-%m-%d"))
}

/// Date encoded in a log file name, if it is one of ours.
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let captures = file_name_regex().captures(name)?;
    NaiveDate::parse_from_str(&captures["date"], "%Y-%m-%d").ok()
}

fn sanitize(field: &str) -> String {
    field
        .replace(['\n', '\r'], " ")
        .replace('|', "/")
        .trim()
        .to_string()
}

fn or_unknown(value: &str) -> String {
    let value = sanitize(value);
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value
    }
}

/// Formats one durable log line (without the trailing newline).
pub fn format_line(entry: &HistoryEntry, logger_name: &str) -> String {
    let (operation, backend) = match &entry.context {
        Some(ctx) => (or_unknown(&ctx.operation), or_unknown(&ctx.backend_type)),
        None => ("unknown".to_string(), "unknown".to_string()),
    };
    let mut line = format!(
        "{} | {} | {} | {} | error_code={} | severity={} | operation={} | backend_type={}",
        entry.timestamp.format(TIMESTAMP_FORMAT),
        entry.severity.log_level(),
        sanitize(logger_name),
        sanitize(&entry.message),
        entry.code,
        entry.severity,
        operation,
        backend,
    );
    if entry.recovery_attempted {
        let outcome = if entry.recovery_successful {
            "succeeded"
        } else {
            "attempted"
        };
        line.push_str(" | recovery=");
        line.push_str(outcome);
    }
    line
}

/// Parses a durable log line back into a history entry.
///
/// Returns `None` for lines that are not in the expected format.
pub fn parse_line(line: &str) -> Option<HistoryEntry> {
    let captures = line_regex().captures(line.trim_end())?;
    let timestamp = DateTime::parse_from_rfc3339(&captures["ts"])
        .ok()?
        .with_timezone(&Utc);
    let code: ErrorCode = captures["code"].parse().ok()?;
    let severity: Severity = captures["sev"].parse().ok()?;
    let operation = captures["op"].trim();
    let backend = captures["backend"].trim();

    let context = if operation == "unknown" && backend == "unknown" {
        None
    } else {
        let mut ctx = ErrorContext::new(backend, operation);
        ctx.created_at = timestamp;
        Some(ctx)
    };
    let recovery = captures.name("rec").map(|m| m.as_str());

    Some(HistoryEntry {
        timestamp,
        code,
        message: captures["msg"].to_string(),
        severity,
        context,
        cause: None,
        recovery_attempted: recovery.is_some(),
        recovery_successful: recovery == Some("succeeded"),
        recovery_details: None,
    })
}

/// Metadata about one durable log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFileInfo {
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// Lists the durable log files in `dir`, oldest first.
pub fn list_log_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = dir.join(format!("{}_*.log", LOG_FILE_PREFIX));
    let Some(pattern) = pattern.to_str() else {
        return Vec::new();
    };
    let Ok(paths) = glob::glob(pattern) else {
        return Vec::new();
    };
    let mut files: Vec<(NaiveDate, PathBuf)> = paths
        .filter_map(Result::ok)
        .filter_map(|path| {
            let date = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(date_from_file_name)?;
            Some((date, path))
        })
        .collect();
    files.sort();
    files.into_iter().map(|(_, path)| path).collect()
}

/// Collects size and modification time of every log file in `dir`.
pub fn inventory(dir: &Path) -> Vec<LogFileInfo> {
    list_log_files(dir)
        .into_iter()
        .filter_map(|path| {
            let metadata = fs::metadata(&path).ok()?;
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            Some(LogFileInfo {
                filename: path.file_name()?.to_string_lossy().into_owned(),
                path: path.display().to_string(),
                size_bytes: metadata.len(),
                modified,
            })
        })
        .collect()
}

/// Deletes the oldest log files so that at most `max_files` remain.
///
/// Returns the removed paths. Files that vanish concurrently are skipped.
pub fn prune(dir: &Path, max_files: usize) -> io::Result<Vec<PathBuf>> {
    let files = list_log_files(dir);
    let excess = files.len().saturating_sub(max_files);
    let mut removed = Vec::new();
    for path in files.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Reads every parseable entry from the log files in `dir`, oldest first.
pub fn read_entries(dir: &Path) -> io::Result<Vec<HistoryEntry>> {
    let mut entries = Vec::new();
    for path in list_log_files(dir) {
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for line in BufReader::new(file).lines() {
            if let Some(entry) = parse_line(&line?) {
                entries.push(entry);
            }
        }
    }
    entries.sort_by_key(|e| e.timestamp);
    Ok(entries)
}

/// Append-only writer rolling over to a new file every day.
#[derive(Debug)]
pub struct DailyLog {
    dir: PathBuf,
    logger_name: String,
    max_files: usize,
    current: Option<(NaiveDate, File)>,
}

impl DailyLog {
    /// Creates the log directory if needed.
    pub fn open(
        dir: impl Into<PathBuf>,
        logger_name: impl Into<String>,
        max_files: usize,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            logger_name: logger_name.into(),
            max_files,
            current: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends `entry` to the file of its day.
    pub fn append(&mut self, entry: &HistoryEntry) -> io::Result<()> {
        let date = entry.timestamp.date_naive();
        let needs_rollover = !matches!(&self.current, Some((current, _)) if *current == date);
        if needs_rollover {
            let path = self.dir.join(log_file_name(date));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.current = Some((date, file));
            let removed = prune(&self.dir, self.max_files.max(1))?;
            for path in removed {
                tracing::debug!(path = %path.display(), "pruned old error log");
            }
        }
        let line = format_line(entry, &self.logger_name);
        if let Some((_, file)) = self.current.as_mut() {
            writeln!(file, "{}", line)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Closes the current file and deletes every log file.
    pub fn remove_all(&mut self) -> io::Result<usize> {
        self.current = None;
        remove_all(&self.dir)
    }
}

/// Deletes every durable log file in `dir`.
pub fn remove_all(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    for path in list_log_files(dir) {
        match fs::remove_file(&path) {
            Ok(()) => count += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn entry(code: ErrorCode, severity: Severity) -> HistoryEntry {
        HistoryEntry::new(code, "connection refused", severity)
            .with_context(ErrorContext::new("postgresql", "connect"))
    }

    #[test]
    fn test_format_line_layout() {
        let mut e = entry(ErrorCode::ConnectionRefused, Severity::Critical);
        e.timestamp = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let line = format_line(&e, "initguard.errors");
        assert_eq!(
            line,
            "2026-03-01T12:30:00.000Z | CRITICAL | initguard.errors | connection refused | \
             error_code=CONNECTION_REFUSED | severity=critical | operation=connect | backend_type=postgresql"
        );
    }

    #[test]
    fn test_format_line_sanitizes_message() {
        let e = HistoryEntry::new(ErrorCode::Unknown, "a | b\nc", Severity::High);
        let line = format_line(&e, "x");
        assert!(line.contains("| a / b c |"));
        assert!(line.ends_with("operation=unknown | backend_type=unknown"));
    }

    #[test]
    fn test_parse_line_restores_entry() {
        let mut e = entry(ErrorCode::DatabaseFileLocked, Severity::Medium)
            .with_recovery(true, true, Some("removed sidecars".to_string()));
        e.context = Some(ErrorContext::new("sqlite", "init_schema"));
        let parsed = parse_line(&format_line(&e, "initguard.errors")).unwrap();

        assert_eq!(parsed.code, ErrorCode::DatabaseFileLocked);
        assert_eq!(parsed.severity, Severity::Medium);
        assert_eq!(parsed.message, "connection refused");
        assert!(parsed.recovery_attempted);
        assert!(parsed.recovery_successful);
        let ctx = parsed.context.unwrap();
        assert_eq!(ctx.backend_type, "sqlite");
        assert_eq!(ctx.operation, "init_schema");
        assert_eq!(
            parsed.timestamp.timestamp_millis(),
            e.timestamp.timestamp_millis()
        );
    }

    #[test]
    fn test_parse_line_without_context_or_recovery() {
        let e = HistoryEntry::new(ErrorCode::Unknown, "boom", Severity::High);
        let parsed = parse_line(&format_line(&e, "x")).unwrap();
        assert!(parsed.context.is_none());
        assert!(!parsed.recovery_attempted);
        assert!(parse_line("not a log line").is_none());
    }

    #[test]
    fn test_file_name_round_trip() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let name = log_file_name(date);
        assert_eq!(name, "db_init_errors_2026-10-15.log");
        assert_eq!(date_from_file_name(&name), Some(date));
        assert_eq!(date_from_file_name("other.log"), None);
    }

    #[test]
    fn test_append_writes_one_file_per_day() {
        let dir = TempDir::new().unwrap();
        let mut log = DailyLog::open(dir.path(), "initguard.errors", 10).unwrap();

        let mut first = entry(ErrorCode::ConnectionRefused, Severity::Critical);
        first.timestamp = Utc::now() - Duration::days(1);
        let second = entry(ErrorCode::ConnectionRefused, Severity::Critical);
        log.append(&first).unwrap();
        log.append(&second).unwrap();
        log.append(&second).unwrap();

        let files = list_log_files(dir.path());
        assert_eq!(files.len(), 2);
        let entries = read_entries(dir.path()).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].timestamp < entries[1].timestamp);
    }

    #[test]
    fn test_prune_removes_oldest_first() {
        let dir = TempDir::new().unwrap();
        for day in 1..=5 {
            let date = NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
            fs::write(dir.path().join(log_file_name(date)), "").unwrap();
        }
        fs::write(dir.path().join("unrelated.log"), "").unwrap();

        let removed = prune(dir.path(), 3).unwrap();
        assert_eq!(removed.len(), 2);
        let remaining: Vec<String> = list_log_files(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            remaining,
            vec![
                "db_init_errors_2026-01-03.log",
                "db_init_errors_2026-01-04.log",
                "db_init_errors_2026-01-05.log",
            ]
        );
        assert!(dir.path().join("unrelated.log").exists());
    }

    #[test]
    fn test_inventory_and_remove_all() {
        let dir = TempDir::new().unwrap();
        let mut log = DailyLog::open(dir.path(), "x", 10).unwrap();
        log.append(&entry(ErrorCode::DiskFull, Severity::Critical)).unwrap();

        let files = inventory(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].size_bytes > 0);
        assert!(files[0].filename.starts_with(LOG_FILE_PREFIX));

        assert_eq!(log.remove_all().unwrap(), 1);
        assert!(inventory(dir.path()).is_empty());
    }
}
