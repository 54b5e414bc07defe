//! Recovery handler registry and the failure-handling orchestrator.
//!
//! [`InitErrorHandler`] is the one entry point for failures coming out of the
//! initializer: it classifies the failure, looks up its resolution, optionally
//! runs the recovery strategy registered for the code, and records exactly one
//! history entry. It never fails and never panics because of a strategy.

pub mod strategies;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::detector::chain_text;
use crate::error::{
    BoxError, ErrorCategory, ErrorClassifier, ErrorCode, ErrorContext, InitError, Severity,
};
use crate::monitor::{ErrorMonitor, HistoryEntry};
use crate::resolution::{ErrorResolution, ResolutionCatalog};

pub use strategies::{
    CommandScriptRunner, ConnectionTimeoutRecovery, ConnectivityProbe, LockedDatabaseRecovery,
    MissingDatabaseFileRecovery, MissingUrlRecovery, RecoveryDependencies, RuntimeSettings,
    SchemaBootstrapRecovery, SchemaBootstrapper, ScriptRunner, StrategyConfig, TcpProbe,
};

/// Failures raised inside a recovery strategy.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The context lacks information the strategy needs.
    #[error("missing context: {0}")]
    MissingContext(String),

    /// A connectivity probe failed.
    #[error("probe failed: {0}")]
    Probe(String),

    /// An external collaborator (script, bootstrapper) failed.
    #[error("{0}")]
    Collaborator(String),
}

/// Outcome of one recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub success: bool,
    /// Name of the method that was tried (or succeeded).
    pub method: String,
    /// Strategy-specific details, e.g. attempts made or files removed.
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Why the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RecoveryResult {
    pub fn succeeded(method: impl Into<String>) -> Self {
        Self {
            success: true,
            method: method.into(),
            details: Map::new(),
            reason: None,
        }
    }

    pub fn failed(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            method: method.into(),
            details: Map::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    /// One-line description used in history entries.
    pub fn describe(&self) -> String {
        match (&self.reason, self.success) {
            (_, true) => format!("{} succeeded", self.method),
            (Some(reason), false) => format!("{} failed: {}", self.method, reason),
            (None, false) => format!("{} failed", self.method),
        }
    }
}

/// An automated remedy for one kind of failure.
///
/// Strategies must be idempotent: the same failure may be handed over again
/// on the next initialization attempt.
pub trait RecoveryStrategy: Send + Sync {
    /// Method name reported in [`RecoveryResult::method`].
    fn name(&self) -> &str;

    fn recover(
        &self,
        error: &InitError,
        context: Option<&ErrorContext>,
    ) -> Result<RecoveryResult, RecoveryError>;
}

/// Adapts a closure into a [`RecoveryStrategy`].
pub struct FnStrategy<F> {
    name: String,
    f: F,
}

impl<F> RecoveryStrategy for FnStrategy<F>
where
    F: Fn(&InitError, Option<&ErrorContext>) -> Result<RecoveryResult, RecoveryError>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn recover(
        &self,
        error: &InitError,
        context: Option<&ErrorContext>,
    ) -> Result<RecoveryResult, RecoveryError> {
        (self.f)(error, context)
    }
}

/// Code-keyed recovery strategies.
///
/// Registering a second strategy for a code replaces the first: the last
/// registration wins. Lookups are by exact code only; there is no fallback
/// from one strategy to another.
#[derive(Default)]
pub struct RecoveryRegistry {
    handlers: RwLock<HashMap<ErrorCode, Arc<dyn RecoveryStrategy>>>,
}

impl std::fmt::Debug for RecoveryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryRegistry")
            .field("codes", &self.codes())
            .finish()
    }
}

impl RecoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `strategy` for `code`, returning the strategy it replaced.
    pub fn register(
        &self,
        code: ErrorCode,
        strategy: Arc<dyn RecoveryStrategy>,
    ) -> Option<Arc<dyn RecoveryStrategy>> {
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code, strategy);
        if previous.is_some() {
            tracing::debug!(error_code = %code, "replaced recovery strategy");
        }
        previous
    }

    /// Registers a closure as the strategy for `code`.
    pub fn register_fn<F>(&self, code: ErrorCode, name: impl Into<String>, f: F)
    where
        F: Fn(&InitError, Option<&ErrorContext>) -> Result<RecoveryResult, RecoveryError>
            + Send
            + Sync
            + 'static,
    {
        self.register(
            code,
            Arc::new(FnStrategy {
                name: name.into(),
                f,
            }),
        );
    }

    pub fn get(&self, code: ErrorCode) -> Option<Arc<dyn RecoveryStrategy>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&code)
            .cloned()
    }

    pub fn contains(&self, code: ErrorCode) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&code)
    }

    /// Registered codes in numeric order.
    pub fn codes(&self) -> Vec<ErrorCode> {
        let mut codes: Vec<ErrorCode> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        codes.sort();
        codes
    }

    /// Registers the built-in strategies for their codes.
    pub fn register_defaults(&self, config: &StrategyConfig, deps: &RecoveryDependencies) {
        self.register(
            ErrorCode::ConnectionTimeout,
            Arc::new(ConnectionTimeoutRecovery::new(
                Arc::clone(&deps.probe),
                config.backoff_base,
                config.backoff_attempts,
                config.probe_timeout,
            )),
        );
        self.register(
            ErrorCode::DatabaseFileLocked,
            Arc::new(LockedDatabaseRecovery::new(config.lock_wait)),
        );
        self.register(
            ErrorCode::DatabaseFileNotFound,
            Arc::new(MissingDatabaseFileRecovery::new()),
        );
        self.register(
            ErrorCode::MissingDatabaseUrl,
            Arc::new(MissingUrlRecovery::new(
                deps.settings.clone(),
                deps.working_dir.clone(),
                config.default_database_file.clone(),
            )),
        );
        self.register(
            ErrorCode::TableNotFound,
            Arc::new(SchemaBootstrapRecovery::new(
                deps.working_dir.clone(),
                config.init_scripts.clone(),
                Arc::clone(&deps.script_runner),
                deps.bootstrapper.clone(),
                deps.settings.clone(),
            )),
        );
    }
}

/// Everything known about one handled failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandledResult {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub resolution: ErrorResolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
    pub timestamp: DateTime<Utc>,
}

impl HandledResult {
    /// True if a recovery ran and reported success.
    pub fn recovered(&self) -> bool {
        self.recovery.as_ref().is_some_and(|r| r.success)
    }
}

/// Classifies, resolves, recovers and records initialization failures.
///
/// Constructed once by the composition root and shared by reference.
#[derive(Debug)]
pub struct InitErrorHandler {
    classifier: ErrorClassifier,
    catalog: ResolutionCatalog,
    registry: RecoveryRegistry,
    monitor: Arc<ErrorMonitor>,
}

impl InitErrorHandler {
    /// Creates a handler with the built-in rules and catalog and no strategies.
    pub fn new(monitor: Arc<ErrorMonitor>) -> Self {
        Self::with_parts(
            ErrorClassifier::new(),
            ResolutionCatalog::new(),
            RecoveryRegistry::new(),
            monitor,
        )
    }

    pub fn with_parts(
        classifier: ErrorClassifier,
        catalog: ResolutionCatalog,
        registry: RecoveryRegistry,
        monitor: Arc<ErrorMonitor>,
    ) -> Self {
        Self {
            classifier,
            catalog,
            registry,
            monitor,
        }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn catalog(&self) -> &ResolutionCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &RecoveryRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<ErrorMonitor> {
        &self.monitor
    }

    /// See [`ErrorClassifier::classify`].
    pub fn classify<E>(&self, failure: E, context: Option<&ErrorContext>) -> (ErrorCode, InitError)
    where
        E: Into<BoxError>,
    {
        self.classifier.classify(failure, context)
    }

    /// See [`ResolutionCatalog::resolve`].
    pub fn resolve(&self, code: ErrorCode) -> ErrorResolution {
        self.catalog.resolve(code)
    }

    /// Registers a strategy for `code`; the last registration wins.
    pub fn register(&self, code: ErrorCode, strategy: Arc<dyn RecoveryStrategy>) {
        self.registry.register(code, strategy);
    }

    /// Handles one failure end to end.
    ///
    /// The failure is always recorded, even with `auto_recover` off. At most
    /// one recovery attempt is made, and any error or panic inside the
    /// strategy is turned into a failed [`RecoveryResult`].
    pub fn handle_failure<E>(
        &self,
        failure: E,
        context: Option<ErrorContext>,
        auto_recover: bool,
    ) -> HandledResult
    where
        E: Into<BoxError>,
    {
        let (code, error) = self.classifier.classify(failure, context.as_ref());
        let resolution = self.catalog.resolve(code);
        let severity = resolution.severity;

        let recovery = if auto_recover {
            self.registry
                .get(code)
                .map(|strategy| run_guarded(strategy.as_ref(), &error, context.as_ref()))
        } else {
            None
        };

        let mut entry = HistoryEntry::new(code, error.message.clone(), severity);
        if let Some(ctx) = &context {
            entry = entry.with_context(ctx.clone());
        }
        if let Some(source) = std::error::Error::source(&error) {
            entry = entry.with_cause(chain_text(source));
        }
        if let Some(result) = &recovery {
            entry = entry.with_recovery(true, result.success, Some(result.describe()));
        }
        let timestamp = entry.timestamp;
        self.monitor.record(entry);

        HandledResult {
            code,
            category: code.category(),
            severity,
            message: error.message,
            resolution,
            recovery,
            context,
            timestamp,
        }
    }
}

fn run_guarded(
    strategy: &dyn RecoveryStrategy,
    error: &InitError,
    context: Option<&ErrorContext>,
) -> RecoveryResult {
    let name = strategy.name().to_string();
    tracing::info!(error_code = %error.code, method = %name, "attempting recovery");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| strategy.recover(error, context)));
    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => RecoveryResult::failed(name, e.to_string()),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "recovery strategy panicked".to_string());
            RecoveryResult::failed(name, reason)
        }
    };
    if result.success {
        tracing::info!(error_code = %error.code, method = %result.method, "recovery succeeded");
    } else {
        tracing::warn!(
            error_code = %error.code,
            method = %result.method,
            reason = result.reason.as_deref().unwrap_or(""),
            "recovery failed"
        );
    }
    result
}
