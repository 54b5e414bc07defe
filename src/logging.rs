//! Diagnostic logging for the initguard binary.
//!
//! Events go to stderr so that `--format json` output on stdout stays
//! machine-readable. `RUST_LOG` takes precedence over the verbosity flags.
//! This is separate from the durable error log kept by the monitor.

use tracing_subscriber::{fmt, EnvFilter};

/// Minimum level of emitted diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Everything, including per-rule classifier events.
    Trace,
    /// Recovery and configuration details.
    Debug,
    /// Recorded failures and report writes.
    Info,
    /// Default: only problems are shown on the console.
    #[default]
    Warn,
    /// Only errors.
    Error,
    /// No diagnostics.
    Off,
}

impl LogLevel {
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl From<u8> for LogLevel {
    /// 0 = warn, 1 = info, 2 = debug, 3+ = trace.
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Settings for the stderr subscriber.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Prefix each event with a timestamp.
    pub with_timestamps: bool,
    /// Include the module path of each event.
    pub with_target: bool,
    /// Emit ANSI colour codes.
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            with_timestamps: true,
            with_target: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Enables or disables timestamps.
    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.with_timestamps = enabled;
        self
    }

    /// Enables or disables module paths.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Enables or disables ANSI colour.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// Configuration for `-v` repeated `verbosity` times.
    pub fn from_verbosity(verbosity: u8) -> Self {
        Self::default()
            .with_level(LogLevel::from(verbosity))
            .with_target(verbosity >= 2)
    }

    fn env_filter(&self) -> EnvFilter {
        if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(self.level.as_directive())
        }
    }
}

/// Installs the global stderr subscriber.
///
/// Calling it again after a subscriber is installed is a no-op.
///
/// # Examples
///
/// ```no_run
/// use initguard::logging::{init_logging, LoggingConfig, LogLevel};
///
/// init_logging(LoggingConfig::new().with_level(LogLevel::Debug).with_ansi(false));
/// ```
pub fn init_logging(config: LoggingConfig) {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(config.env_filter())
        .with_writer(std::io::stderr)
        .with_target(config.with_target)
        .with_ansi(config.with_ansi);

    let installed = if config.with_timestamps {
        subscriber.try_init()
    } else {
        subscriber.without_time().try_init()
    };
    if installed.is_err() {
        tracing::debug!("logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_verbosity() {
        assert_eq!(LogLevel::from(0), LogLevel::Warn);
        assert_eq!(LogLevel::from(1), LogLevel::Info);
        assert_eq!(LogLevel::from(2), LogLevel::Debug);
        assert_eq!(LogLevel::from(9), LogLevel::Trace);
    }

    #[test]
    fn test_from_verbosity_enables_target_when_debugging() {
        assert!(!LoggingConfig::from_verbosity(1).with_target);
        assert!(LoggingConfig::from_verbosity(2).with_target);
    }

    #[test]
    fn test_builder() {
        let config = LoggingConfig::new()
            .with_level(LogLevel::Off)
            .with_timestamps(false)
            .with_ansi(false);
        assert_eq!(config.level.as_directive(), "off");
        assert!(!config.with_timestamps);
        assert!(!config.with_ansi);
    }
}
