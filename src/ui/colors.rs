//! 24-bit RGB color theme for terminal output.

use owo_colors::{OwoColorize, Rgb};

use crate::error::Severity;
use crate::monitor::Priority;

#[derive(Debug, Clone, Copy)]
pub struct Theme {
    /// Recovered / healthy - green (34, 197, 94)
    pub success: Rgb,
    /// Critical and failed - red (239, 68, 68)
    pub error: Rgb,
    /// High severity - orange (249, 115, 22)
    pub high: Rgb,
    /// Medium severity - yellow (234, 179, 8)
    pub warning: Rgb,
    /// Headings - blue (59, 130, 246)
    pub heading: Rgb,
    /// Secondary text - gray (107, 114, 128)
    pub muted: Rgb,
    /// Error codes - cyan (34, 211, 238)
    pub code: Rgb,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            success: Rgb(34, 197, 94),
            error: Rgb(239, 68, 68),
            high: Rgb(249, 115, 22),
            warning: Rgb(234, 179, 8),
            heading: Rgb(59, 130, 246),
            muted: Rgb(107, 114, 128),
            code: Rgb(34, 211, 238),
        }
    }
}

impl Theme {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn severity(&self, severity: Severity) -> Rgb {
        match severity {
            Severity::Low => self.muted,
            Severity::Medium => self.warning,
            Severity::High => self.high,
            Severity::Critical => self.error,
        }
    }

    pub fn priority(&self, priority: Priority) -> Rgb {
        match priority {
            Priority::Low => self.muted,
            Priority::Medium => self.warning,
            Priority::High => self.high,
            Priority::Critical => self.error,
        }
    }
}

/// A theme plus the decision whether to emit color at all.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub theme: Theme,
    enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Self {
            theme: Theme::default(),
            enabled,
        }
    }

    /// Colors unless `--no-color` was given or `NO_COLOR` is set.
    pub fn detect(no_color_flag: bool) -> Self {
        Self::new(!no_color_flag && std::env::var_os("NO_COLOR").is_none())
    }

    pub fn plain() -> Self {
        Self::new(false)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn paint(&self, text: &str, color: Rgb) -> String {
        if self.enabled {
            text.color(color).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn bold(&self, text: &str, color: Rgb) -> String {
        if self.enabled {
            text.color(color).bold().to_string()
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_palette_emits_no_escapes() {
        let palette = Palette::plain();
        assert_eq!(palette.paint("x", palette.theme.error), "x");
        assert_eq!(palette.bold("x", palette.theme.error), "x");
    }

    #[test]
    fn test_enabled_palette_emits_escapes() {
        let palette = Palette::new(true);
        assert!(palette.paint("x", palette.theme.error).contains("\x1b["));
    }

    #[test]
    fn test_no_color_flag_wins() {
        assert!(!Palette::detect(true).enabled());
    }
}
