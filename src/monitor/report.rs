//! Troubleshooting report assembly and JSON export.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ErrorMonitor, ErrorPatterns, ErrorSummary, HistoryEntry, LogFileInfo, MonitorResult,
};
use crate::error::Severity;

/// Urgency of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// A rule-based suggestion derived from the analysed history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub category: String,
    pub title: String,
    pub description: String,
    pub action: String,
}

/// Thresholds driving the recommendation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportThresholds {
    /// More errors than this in the window triggers a connectivity review.
    pub high_error_threshold: usize,
    /// A recovery success rate below this (with attempts) triggers a review.
    pub recovery_rate_floor: f64,
    /// A repeated run longer than this triggers a root-cause investigation.
    pub repeated_run_alert: usize,
}

impl Default for ReportThresholds {
    fn default() -> Self {
        Self {
            high_error_threshold: 10,
            recovery_rate_floor: 0.5,
            repeated_run_alert: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub time_period_hours: u32,
    pub total_errors_analyzed: usize,
    pub include_stack_traces: bool,
}

/// Everything needed to troubleshoot recent initialization failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TroubleshootingReport {
    pub report_metadata: ReportMetadata,
    pub error_summary: ErrorSummary,
    pub error_patterns: ErrorPatterns,
    pub recent_errors: Vec<HistoryEntry>,
    pub recommendations: Vec<Recommendation>,
    pub log_files: Vec<LogFileInfo>,
}

/// Applies the recommendation rules, most urgent first.
pub fn recommendations(
    summary: &ErrorSummary,
    patterns: &ErrorPatterns,
    thresholds: &ReportThresholds,
) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if summary.count_for_severity(Severity::Critical) > 0 {
        recs.push(Recommendation {
            priority: Priority::Critical,
            category: "severity".to_string(),
            title: "Critical errors require immediate attention".to_string(),
            description: format!(
                "{} critical error(s) were recorded in the last {} hours.",
                summary.count_for_severity(Severity::Critical),
                summary.time_period_hours
            ),
            action: "Follow the manual verification steps for each critical error code"
                .to_string(),
        });
    }

    if summary.total_errors > thresholds.high_error_threshold {
        recs.push(Recommendation {
            priority: Priority::High,
            category: "connectivity".to_string(),
            title: "High error volume".to_string(),
            description: format!(
                "{} errors in the last {} hours exceeds the threshold of {}.",
                summary.total_errors, summary.time_period_hours, thresholds.high_error_threshold
            ),
            action: "Review database connectivity and server availability".to_string(),
        });
    }

    if summary.recovery_attempted > 0
        && summary.recovery_success_rate < thresholds.recovery_rate_floor
    {
        recs.push(Recommendation {
            priority: Priority::Medium,
            category: "recovery".to_string(),
            title: "Low automatic recovery success rate".to_string(),
            description: format!(
                "Only {:.0}% of {} recovery attempts succeeded.",
                summary.recovery_success_rate * 100.0,
                summary.recovery_attempted
            ),
            action: "Review the recovery mechanisms and their prerequisites".to_string(),
        });
    }

    for pattern in patterns
        .repeated_errors
        .iter()
        .filter(|p| p.count > thresholds.repeated_run_alert)
    {
        recs.push(Recommendation {
            priority: Priority::High,
            category: "pattern".to_string(),
            title: format!("Repeated {} errors", pattern.error_code),
            description: format!(
                "{} occurred {} times in a row.",
                pattern.error_code, pattern.count
            ),
            action: "Investigate the root cause instead of relying on retries".to_string(),
        });
    }

    recs.sort_by(|a, b| b.priority.cmp(&a.priority));
    recs
}

impl ErrorMonitor {
    /// Builds a troubleshooting report over the trailing `window_hours` hours.
    ///
    /// Stack traces are stripped from `recent_errors` unless `include_traces` is set.
    pub fn generate_report(
        &self,
        window_hours: u32,
        include_traces: bool,
    ) -> TroubleshootingReport {
        let now = Utc::now();
        let entries = self.entries_since(window_hours, now);
        let summary = ErrorSummary::from_entries(&entries, window_hours);
        let patterns = ErrorPatterns::detect(&entries, self.config.repeated_run_min);
        let recs = recommendations(&summary, &patterns, &self.config.thresholds);

        let skip = entries.len().saturating_sub(self.config.recent_entries);
        let recent_errors = entries[skip..]
            .iter()
            .map(|e| {
                if include_traces {
                    e.clone()
                } else {
                    e.without_stack_trace()
                }
            })
            .collect();

        TroubleshootingReport {
            report_metadata: ReportMetadata {
                generated_at: now,
                time_period_hours: window_hours,
                total_errors_analyzed: entries.len(),
                include_stack_traces: include_traces,
            },
            error_summary: summary,
            error_patterns: patterns,
            recent_errors,
            recommendations: recs,
            log_files: self.log_files(),
        }
    }

    /// Writes the report for `window_hours` as pretty JSON to `path`.
    ///
    /// The file is written to a temporary sibling first and renamed into place.
    pub fn export(&self, path: &Path, window_hours: u32) -> MonitorResult<TroubleshootingReport> {
        let report = self.generate_report(window_hours, false);
        write_report(&report, path)?;
        tracing::info!(path = %path.display(), window_hours, "exported error report");
        Ok(report)
    }
}

/// Serializes `report` to `path` atomically.
pub fn write_report(report: &TroubleshootingReport, path: &Path) -> MonitorResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = std::path::PathBuf::from(temp_name);

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ErrorContext};
    use crate::monitor::{MonitorConfig, RepeatedErrorPattern};
    use chrono::Duration;
    use tempfile::TempDir;

    fn summary_with(total: usize, critical: usize, attempted: usize, ok: usize) -> ErrorSummary {
        let mut entries = Vec::new();
        for i in 0..total {
            let severity = if i < critical {
                Severity::Critical
            } else {
                Severity::Low
            };
            let recovered = i < attempted;
            entries.push(
                HistoryEntry::new(ErrorCode::Unknown, "x", severity).with_recovery(
                    recovered,
                    i < ok,
                    None,
                ),
            );
        }
        ErrorSummary::from_entries(&entries, 24)
    }

    #[test]
    fn test_no_recommendations_for_quiet_history() {
        let recs = recommendations(
            &summary_with(2, 0, 0, 0),
            &ErrorPatterns::default(),
            &ReportThresholds::default(),
        );
        assert!(recs.is_empty());
    }

    #[test]
    fn test_all_rules_fire() {
        let patterns = ErrorPatterns {
            repeated_errors: vec![RepeatedErrorPattern {
                pattern_type: "repeated_error".to_string(),
                error_code: ErrorCode::ConnectionRefused,
                count: 7,
                first_seen: Utc::now(),
                last_seen: Utc::now(),
            }],
            ..Default::default()
        };
        let recs = recommendations(
            &summary_with(12, 1, 4, 1),
            &patterns,
            &ReportThresholds::default(),
        );
        let categories: Vec<&str> = recs.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(categories, vec!["severity", "connectivity", "pattern", "recovery"]);
        assert_eq!(recs[0].priority, Priority::Critical);
    }

    #[test]
    fn test_pattern_at_threshold_does_not_fire() {
        let patterns = ErrorPatterns {
            repeated_errors: vec![RepeatedErrorPattern {
                pattern_type: "repeated_error".to_string(),
                error_code: ErrorCode::DiskFull,
                count: 5,
                first_seen: Utc::now(),
                last_seen: Utc::now(),
            }],
            ..Default::default()
        };
        let recs = recommendations(
            &summary_with(5, 0, 0, 0),
            &patterns,
            &ReportThresholds::default(),
        );
        assert!(recs.is_empty());
    }

    #[test]
    fn test_report_strips_traces_and_limits_recent() {
        let monitor = ErrorMonitor::in_memory(100);
        for i in 0..15 {
            monitor.record(
                HistoryEntry::new(ErrorCode::SeedDataFailed, format!("e{}", i), Severity::Low)
                    .with_context(ErrorContext::new("sqlite", "seed").with_stack_trace("trace"))
                    .with_timestamp(Utc::now() - Duration::minutes(30 - i)),
            );
        }
        monitor.push_entry(
            HistoryEntry::new(ErrorCode::DiskFull, "old", Severity::Critical)
                .with_timestamp(Utc::now() - Duration::hours(48)),
        );

        let report = monitor.generate_report(24, false);
        assert_eq!(report.report_metadata.total_errors_analyzed, 15);
        assert_eq!(report.recent_errors.len(), 10);
        assert_eq!(report.recent_errors.last().unwrap().message, "e14");
        assert!(report
            .recent_errors
            .iter()
            .all(|e| e.context.as_ref().unwrap().stack_trace.is_none()));

        let with_traces = monitor.generate_report(24, true);
        assert!(with_traces.recent_errors[0]
            .context
            .as_ref()
            .unwrap()
            .stack_trace
            .is_some());
    }

    #[test]
    fn test_export_matches_summary() {
        let dir = TempDir::new().unwrap();
        let monitor = ErrorMonitor::new(MonitorConfig::new().with_log_dir(dir.path().join("logs")));
        for code in [
            ErrorCode::ConnectionRefused,
            ErrorCode::ConnectionRefused,
            ErrorCode::AuthenticationFailed,
        ] {
            monitor.record(HistoryEntry::new(code, "x", Severity::Critical));
        }

        let path = dir.path().join("out").join("report.json");
        monitor.export(&path, 24).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let summary = monitor.summarize(24);
        assert_eq!(
            value["error_summary"]["total_errors"].as_u64().unwrap() as usize,
            summary.total_errors
        );
        assert_eq!(
            value["error_summary"]["error_counts"]["CONNECTION_REFUSED"].as_u64(),
            Some(2)
        );
        assert_eq!(value["report_metadata"]["include_stack_traces"], false);
        assert_eq!(value["log_files"].as_array().unwrap().len(), 1);
        assert!(!dir.path().join("out").join("report.json.tmp").exists());
    }
}
