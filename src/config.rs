//! Layered configuration for initguard.
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `initguard.toml` in the working directory (or the file given with
//! `--config`), then `INITGUARD__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::monitor::{MonitorConfig, ReportThresholds};
use crate::recovery::{CommandScriptRunner, RecoveryDependencies, RuntimeSettings, StrategyConfig};

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "initguard.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "INITGUARD";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub log_dir: PathBuf,
    pub max_log_files: usize,
    pub logger_name: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs/db_init"),
            max_log_files: 30,
            logger_name: "initguard.errors".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    pub capacity: usize,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    pub default_window_hours: u32,
    pub repeated_run_min: usize,
    pub recent_entries: usize,
    pub high_error_threshold: usize,
    pub recovery_rate_floor: f64,
    pub repeated_run_alert: usize,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        let thresholds = ReportThresholds::default();
        Self {
            default_window_hours: 24,
            repeated_run_min: 3,
            recent_entries: 10,
            high_error_threshold: thresholds.high_error_threshold,
            recovery_rate_floor: thresholds.recovery_rate_floor,
            repeated_run_alert: thresholds.repeated_run_alert,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    pub backoff_base_ms: u64,
    pub backoff_attempts: u32,
    pub probe_timeout_secs: u64,
    pub lock_wait_ms: u64,
    pub default_database_file: String,
    pub init_scripts: Vec<PathBuf>,
    /// Interpreter used to run init scripts.
    pub script_interpreter: String,
}

impl Default for RecoverySection {
    fn default() -> Self {
        let strategy = StrategyConfig::default();
        Self {
            backoff_base_ms: strategy.backoff_base.as_millis() as u64,
            backoff_attempts: strategy.backoff_attempts,
            probe_timeout_secs: strategy.probe_timeout.as_secs(),
            lock_wait_ms: strategy.lock_wait.as_millis() as u64,
            default_database_file: strategy.default_database_file,
            init_scripts: strategy.init_scripts,
            script_interpreter: "sh".to_string(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitGuardConfig {
    pub logging: LoggingSection,
    pub history: HistorySection,
    pub analysis: AnalysisSection,
    pub recovery: RecoverySection,
}

impl InitGuardConfig {
    /// Loads the configuration.
    ///
    /// With `path` set the file must exist; otherwise `initguard.toml` in the
    /// current directory is used if present.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use initguard::config::InitGuardConfig;
    ///
    /// let config = InitGuardConfig::load(None)?;
    /// assert!(config.history.capacity > 0);
    /// # Ok::<(), initguard::config::ConfigError>(())
    /// ```
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                let path_str = path
                    .to_str()
                    .ok_or_else(|| ConfigError::InvalidPath(format!("{:?}", path)))?;
                if !path.exists() {
                    return Err(ConfigError::FileNotFound(path_str.to_string()));
                }
                builder = builder.add_source(File::with_name(path_str));
            }
            None => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: InitGuardConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parses a TOML document on top of the defaults, without environment overrides.
    pub fn from_toml_str(toml: &str) -> ConfigResult<Self> {
        let config = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let loaded: InitGuardConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.history.capacity == 0 {
            return Err(ConfigError::Invalid(
                "history.capacity must be at least 1".to_string(),
            ));
        }
        if self.analysis.repeated_run_min < 2 {
            return Err(ConfigError::Invalid(
                "analysis.repeated_run_min must be at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.analysis.recovery_rate_floor) {
            return Err(ConfigError::Invalid(format!(
                "analysis.recovery_rate_floor must be between 0 and 1, got {}",
                self.analysis.recovery_rate_floor
            )));
        }
        if self.recovery.backoff_attempts == 0 {
            return Err(ConfigError::Invalid(
                "recovery.backoff_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            log_dir: Some(self.logging.log_dir.clone()),
            logger_name: self.logging.logger_name.clone(),
            history_capacity: self.history.capacity,
            max_log_files: self.logging.max_log_files,
            repeated_run_min: self.analysis.repeated_run_min,
            recent_entries: self.analysis.recent_entries,
            thresholds: ReportThresholds {
                high_error_threshold: self.analysis.high_error_threshold,
                recovery_rate_floor: self.analysis.recovery_rate_floor,
                repeated_run_alert: self.analysis.repeated_run_alert,
            },
        }
    }

    pub fn strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            backoff_base: Duration::from_millis(self.recovery.backoff_base_ms),
            backoff_attempts: self.recovery.backoff_attempts,
            probe_timeout: Duration::from_secs(self.recovery.probe_timeout_secs),
            lock_wait: Duration::from_millis(self.recovery.lock_wait_ms),
            default_database_file: self.recovery.default_database_file.clone(),
            init_scripts: self.recovery.init_scripts.clone(),
        }
    }

    /// Default collaborators, with scripts run by the configured interpreter.
    pub fn recovery_dependencies(
        &self,
        settings: RuntimeSettings,
        working_dir: impl Into<PathBuf>,
    ) -> RecoveryDependencies {
        let working_dir = working_dir.into();
        let runner =
            CommandScriptRunner::new(&self.recovery.script_interpreter, working_dir.clone());
        RecoveryDependencies::new(settings, working_dir)
            .with_script_runner(std::sync::Arc::new(runner))
    }
}
