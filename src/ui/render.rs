//! Text rendering of analysis, resolution and diagnosis output.

use crate::error::ErrorCode;
use crate::monitor::{ErrorPatterns, ErrorSummary, Recommendation};
use crate::recovery::HandledResult;
use crate::resolution::{ErrorResolution, ResolutionCatalog};
use crate::ui::colors::Palette;

const RULE_WIDTH: usize = 60;

/// Renders library results as human-readable text.
#[derive(Debug, Clone, Copy)]
pub struct TextRenderer {
    palette: Palette,
}

impl TextRenderer {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    fn heading(&self, title: &str) -> String {
        let theme = self.palette.theme;
        format!(
            "{}\n{}\n",
            self.palette.bold(title, theme.heading),
            self.palette.paint(&"─".repeat(RULE_WIDTH), theme.muted)
        )
    }

    fn code(&self, code: ErrorCode) -> String {
        self.palette.paint(code.as_str(), self.palette.theme.code)
    }

    /// Summary, patterns and recommendations for `analyze --format text`.
    pub fn analysis(
        &self,
        summary: &ErrorSummary,
        patterns: &ErrorPatterns,
        recommendations: &[Recommendation],
    ) -> String {
        let theme = self.palette.theme;
        let mut out = self.heading(&format!(
            "Error analysis (last {} hours)",
            summary.time_period_hours
        ));

        if summary.total_errors == 0 {
            out.push_str(&self.palette.paint("No errors recorded.\n", theme.success));
            return out;
        }

        out.push_str(&format!("Total errors:       {}\n", summary.total_errors));
        if let Some(code) = summary.most_common_error {
            out.push_str(&format!("Most common error:  {}\n", self.code(code)));
        }
        let rate = format!("{:.0}%", summary.recovery_success_rate * 100.0);
        let rate_color = if summary.recovery_success_rate >= 0.5 {
            theme.success
        } else {
            theme.error
        };
        out.push_str(&format!(
            "Recoveries:         {}/{} succeeded ({})\n",
            summary.recovery_successful,
            summary.recovery_attempted,
            self.palette.paint(&rate, rate_color)
        ));

        out.push('\n');
        out.push_str(&self.heading("By error code"));
        let mut counts: Vec<_> = summary.error_counts.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (code, count) in counts {
            out.push_str(&format!("  {:>5}  {}\n", count, self.code(*code)));
        }

        out.push('\n');
        out.push_str(&self.heading("By severity"));
        for (severity, count) in summary.severity_counts.iter().rev() {
            out.push_str(&format!(
                "  {:>5}  {}\n",
                count,
                self.palette.paint(severity.as_str(), theme.severity(*severity))
            ));
        }

        if !patterns.repeated_errors.is_empty() {
            out.push('\n');
            out.push_str(&self.heading("Repeated errors"));
            for pattern in &patterns.repeated_errors {
                out.push_str(&format!(
                    "  {} x{}  {} .. {}\n",
                    self.code(pattern.error_code),
                    pattern.count,
                    pattern.first_seen.format("%Y-%m-%d %H:%M:%S"),
                    pattern.last_seen.format("%Y-%m-%d %H:%M:%S")
                ));
            }
        }
        if let Some(hour) = patterns.peak_hour {
            out.push_str(&self.palette.paint(
                &format!("\nPeak hour (UTC): {:02}:00\n", hour),
                theme.muted,
            ));
        }

        if !recommendations.is_empty() {
            out.push('\n');
            out.push_str(&self.heading("Recommendations"));
            for rec in recommendations {
                let label = format!("[{:?}]", rec.priority).to_uppercase();
                out.push_str(&format!(
                    "  {} {}\n      {}\n      -> {}\n",
                    self.palette.bold(&label, theme.priority(rec.priority)),
                    rec.title,
                    self.palette.paint(&rec.description, theme.muted),
                    rec.action
                ));
            }
        }
        out
    }

    /// Full guidance for one code.
    pub fn resolution(&self, resolution: &ErrorResolution) -> String {
        let theme = self.palette.theme;
        let mut out = self.heading(&format!(
            "{} ({}): {}",
            resolution.code.as_str(),
            resolution.code.number(),
            resolution.title
        ));
        out.push_str(&format!(
            "Severity: {}\n",
            self.palette
                .bold(resolution.severity.as_str(), theme.severity(resolution.severity))
        ));
        out.push_str(&format!("{}\n", resolution.description));

        if !resolution.steps.is_empty() {
            out.push_str("\nSteps:\n");
            for (i, step) in resolution.steps.iter().enumerate() {
                let mode = if step.automated { "automated" } else { "manual" };
                out.push_str(&format!(
                    "  {}. {} {}\n",
                    i + 1,
                    step.description,
                    self.palette.paint(
                        &format!(
                            "({}, {} risk, ~{})",
                            mode,
                            step.risk_level.as_str(),
                            step.estimated_time
                        ),
                        theme.muted
                    )
                ));
                if let Some(command) = &step.command {
                    out.push_str(&format!("     $ {}\n", self.palette.paint(command, theme.code)));
                }
            }
        }
        if !resolution.prevention_tips.is_empty() {
            out.push_str("\nPrevention:\n");
            for tip in &resolution.prevention_tips {
                out.push_str(&format!("  - {}\n", tip));
            }
        }
        if resolution.escalate {
            out.push_str(&self.palette.paint(
                "\nEscalation to a database administrator is recommended.\n",
                theme.warning,
            ));
        }
        out
    }

    /// One line per known code.
    pub fn code_index(&self, catalog: &ResolutionCatalog) -> String {
        let mut out = self.heading("Known error codes");
        for code in ErrorCode::ALL {
            let resolution = catalog.resolve(*code);
            out.push_str(&format!(
                "  {:>4}  {:<26} {:<9} {}\n",
                code.number(),
                code.as_str(),
                resolution.severity.as_str(),
                resolution.title
            ));
        }
        out
    }

    /// Outcome of `diagnose`.
    pub fn handled(&self, result: &HandledResult) -> String {
        let theme = self.palette.theme;
        let mut out = format!(
            "Classified as {} [{}] {}\n",
            self.bold_code(result.code),
            result.category,
            self.palette.paint(result.severity.as_str(), theme.severity(result.severity))
        );
        out.push_str(&format!("Message: {}\n\n", result.message));
        out.push_str(&self.resolution(&result.resolution));

        if let Some(recovery) = &result.recovery {
            let (label, color) = if recovery.success {
                ("Recovery succeeded", theme.success)
            } else {
                ("Recovery failed", theme.error)
            };
            out.push_str(&format!(
                "\n{}: {}\n",
                self.palette.bold(label, color),
                recovery.describe()
            ));
            for (key, value) in &recovery.details {
                out.push_str(&format!("  {}: {}\n", key, value));
            }
        }
        out
    }

    fn bold_code(&self, code: ErrorCode) -> String {
        self.palette.bold(code.as_str(), self.palette.theme.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;
    use crate::monitor::HistoryEntry;

    fn renderer() -> TextRenderer {
        TextRenderer::new(Palette::plain())
    }

    #[test]
    fn test_empty_analysis() {
        let entries: Vec<HistoryEntry> = Vec::new();
        let summary = ErrorSummary::from_entries(&entries, 24);
        let text = renderer().analysis(&summary, &ErrorPatterns::default(), &[]);
        assert!(text.contains("last 24 hours"));
        assert!(text.contains("No errors recorded."));
    }

    #[test]
    fn test_analysis_lists_codes_and_patterns() {
        let entries: Vec<HistoryEntry> = (0..3)
            .map(|_| HistoryEntry::new(ErrorCode::DiskFull, "disk full", Severity::Critical))
            .collect();
        let summary = ErrorSummary::from_entries(&entries, 24);
        let patterns = ErrorPatterns::detect(&entries, 3);
        let text = renderer().analysis(&summary, &patterns, &[]);
        assert!(text.contains("Total errors:       3"));
        assert!(text.contains("DISK_FULL x3"));
        assert!(text.contains("critical"));
    }

    #[test]
    fn test_code_index_covers_every_code() {
        let text = renderer().code_index(&ResolutionCatalog::new());
        for code in ErrorCode::ALL {
            assert!(text.contains(code.as_str()));
        }
    }

    #[test]
    fn test_resolution_shows_commands() {
        let catalog = ResolutionCatalog::new();
        let text = renderer().resolution(&catalog.resolve(ErrorCode::ConnectionRefused));
        assert!(text.contains("CONNECTION_REFUSED (1001)"));
        assert!(text.contains("Severity: critical"));
        assert!(text.contains("1. "));
    }
}
