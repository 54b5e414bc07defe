//! Built-in recovery strategies and the collaborators they drive.
//!
//! Each strategy is idempotent and tolerates "already gone" and
//! "already exists" conditions, so it can be re-run for the same failure or
//! run concurrently for the same path.

use std::fs::{self, OpenOptions};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;

use super::{RecoveryError, RecoveryResult, RecoveryStrategy};
use crate::error::{sqlite_path_from_url, ErrorContext, InitError};

/// Tunables of the built-in strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    /// Base of the exponential backoff; attempt `i` waits `base * 2^i`.
    pub backoff_base: Duration,
    pub backoff_attempts: u32,
    /// Timeout of each connectivity probe.
    pub probe_timeout: Duration,
    /// Wait before touching lock sidecar files.
    pub lock_wait: Duration,
    /// File name of the fallback SQLite database.
    pub default_database_file: String,
    /// Candidate initializer scripts, relative to the working directory.
    pub init_scripts: Vec<PathBuf>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_attempts: 3,
            probe_timeout: Duration::from_secs(10),
            lock_wait: Duration::from_secs(1),
            default_database_file: "app.db".to_string(),
            init_scripts: vec![
                PathBuf::from("scripts/init_db.sh"),
                PathBuf::from("init_db.sh"),
                PathBuf::from("scripts/init_db.py"),
            ],
        }
    }
}

/// Process-wide database settings shared with the initializer.
///
/// Cloning yields a handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSettings {
    database_url: Arc<RwLock<Option<String>>>,
}

impl RuntimeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database_url(url: impl Into<String>) -> Self {
        let settings = Self::new();
        settings.set_database_url(url);
        settings
    }

    pub fn database_url(&self) -> Option<String> {
        self.database_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_database_url(&self, url: impl Into<String>) {
        *self
            .database_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(url.into());
    }

    /// Publishes `url` unless a URL is already set; returns the effective URL.
    pub fn publish_default(&self, url: impl Into<String>) -> String {
        let mut guard = self
            .database_url
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.get_or_insert_with(|| url.into()).clone()
    }
}

/// Cheap check whether a backend is reachable.
pub trait ConnectivityProbe: Send + Sync {
    fn probe(&self, target: &str, timeout: Duration) -> Result<(), RecoveryError>;
}

/// Probes server backends with a TCP connect and file backends by opening the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl TcpProbe {
    fn default_port(scheme: &str) -> Option<u16> {
        let base = scheme.split('+').next().unwrap_or(scheme);
        match base {
            "postgres" | "postgresql" => Some(5432),
            "mysql" | "mariadb" => Some(3306),
            "mssql" | "sqlserver" => Some(1433),
            "oracle" => Some(1521),
            "mongodb" => Some(27017),
            "redis" => Some(6379),
            _ => None,
        }
    }

    /// Splits `scheme://[user[:pass]@]host[:port][/...]` into host and port.
    pub fn host_port(url: &str) -> Option<(String, u16)> {
        let (scheme, rest) = url.split_once("://")?;
        let authority = rest.split(['/', '?']).next()?;
        let host_port = authority.rsplit('@').next()?;
        if host_port.is_empty() {
            return None;
        }
        let default_port = Self::default_port(&scheme.to_ascii_lowercase());
        if let Some(stripped) = host_port.strip_prefix('[') {
            // [ipv6]:port
            let (host, tail) = stripped.split_once(']')?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().ok()?,
                None => default_port?,
            };
            return Some((host.to_string(), port));
        }
        match host_port.rsplit_once(':') {
            Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
            None => Some((host_port.to_string(), default_port?)),
        }
    }
}

impl ConnectivityProbe for TcpProbe {
    fn probe(&self, target: &str, timeout: Duration) -> Result<(), RecoveryError> {
        if let Some(path) = sqlite_path_from_url(target) {
            return OpenOptions::new()
                .read(true)
                .open(&path)
                .map(|_| ())
                .map_err(|e| RecoveryError::Probe(format!("{}: {}", path, e)));
        }
        let (host, port) = Self::host_port(target)
            .ok_or_else(|| RecoveryError::Probe(format!("cannot parse target {}", target)))?;
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| RecoveryError::Probe(format!("{}:{}: {}", host, port, e)))?
            .next()
            .ok_or_else(|| RecoveryError::Probe(format!("{}:{} did not resolve", host, port)))?;
        TcpStream::connect_timeout(&addr, timeout)
            .map(|_| ())
            .map_err(|e| RecoveryError::Probe(format!("{}: {}", addr, e)))
    }
}

/// Runs an external initializer script.
pub trait ScriptRunner: Send + Sync {
    fn run(&self, script: &Path) -> Result<(), RecoveryError>;
}

/// Runs scripts as `<interpreter> <script>` in a working directory.
#[derive(Debug, Clone)]
pub struct CommandScriptRunner {
    interpreter: String,
    working_dir: PathBuf,
}

impl CommandScriptRunner {
    pub fn new(interpreter: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            working_dir: working_dir.into(),
        }
    }
}

impl ScriptRunner for CommandScriptRunner {
    fn run(&self, script: &Path) -> Result<(), RecoveryError> {
        let status = Command::new(&self.interpreter)
            .arg(script)
            .current_dir(&self.working_dir)
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(RecoveryError::Collaborator(format!(
                "{} exited with {}",
                script.display(),
                status
            )))
        }
    }
}

/// Creates the schema straight from the application's data model.
///
/// Implemented by the host application. This is a destructive,
/// non-reversible operation and is not gated by environment.
pub trait SchemaBootstrapper: Send + Sync {
    /// Creates all tables; returns the names of the tables created.
    fn create_schema(&self, database_url: &str) -> Result<Vec<String>, RecoveryError>;
}

/// Collaborators handed to the built-in strategies by the composition root.
#[derive(Clone)]
pub struct RecoveryDependencies {
    pub settings: RuntimeSettings,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub script_runner: Arc<dyn ScriptRunner>,
    pub bootstrapper: Option<Arc<dyn SchemaBootstrapper>>,
    pub working_dir: PathBuf,
}

impl RecoveryDependencies {
    /// TCP probing, `sh` script runner and no schema bootstrapper.
    pub fn new(settings: RuntimeSettings, working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            settings,
            probe: Arc::new(TcpProbe),
            script_runner: Arc::new(CommandScriptRunner::new("sh", working_dir.clone())),
            bootstrapper: None,
            working_dir,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_script_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.script_runner = runner;
        self
    }

    pub fn with_bootstrapper(mut self, bootstrapper: Arc<dyn SchemaBootstrapper>) -> Self {
        self.bootstrapper = Some(bootstrapper);
        self
    }
}

fn required_path(context: Option<&ErrorContext>) -> Result<PathBuf, RecoveryError> {
    context
        .and_then(ErrorContext::database_path)
        .map(PathBuf::from)
        .ok_or_else(|| RecoveryError::MissingContext("database file path".to_string()))
}

/// Retries the connection with exponential backoff.
pub struct ConnectionTimeoutRecovery {
    probe: Arc<dyn ConnectivityProbe>,
    base_delay: Duration,
    max_attempts: u32,
    probe_timeout: Duration,
}

impl ConnectionTimeoutRecovery {
    pub fn new(
        probe: Arc<dyn ConnectivityProbe>,
        base_delay: Duration,
        max_attempts: u32,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            probe,
            base_delay,
            max_attempts: max_attempts.max(1),
            probe_timeout,
        }
    }

    /// Delay before attempt `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl RecoveryStrategy for ConnectionTimeoutRecovery {
    fn name(&self) -> &str {
        "connection_retry"
    }

    fn recover(
        &self,
        _error: &InitError,
        context: Option<&ErrorContext>,
    ) -> Result<RecoveryResult, RecoveryError> {
        let target = context
            .map(|c| c.extra("database_url").unwrap_or(c.connection.as_str()))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RecoveryError::MissingContext("connection descriptor".to_string()))?;

        let mut total_delay = Duration::ZERO;
        let mut last_error = String::new();
        for attempt in 0..self.max_attempts {
            let delay = self.delay_for(attempt);
            std::thread::sleep(delay);
            total_delay += delay;
            match self.probe.probe(target, self.probe_timeout) {
                Ok(()) => {
                    return Ok(RecoveryResult::succeeded(self.name())
                        .with_detail("attempts", attempt + 1)
                        .with_detail("total_delay_ms", total_delay.as_millis() as u64));
                }
                Err(e) => {
                    tracing::debug!(attempt = attempt + 1, error = %e, "connection probe failed");
                    last_error = e.to_string();
                }
            }
        }
        Ok(RecoveryResult::failed(
            self.name(),
            format!(
                "connection still failing after {} attempts: {}",
                self.max_attempts, last_error
            ),
        )
        .with_detail("attempts", self.max_attempts)
        .with_detail("total_delay_ms", total_delay.as_millis() as u64))
    }
}

/// Suffixes of the sidecar files kept next to a SQLite database.
pub const SIDECAR_SUFFIXES: [&str; 2] = ["-shm", "-wal"];

/// Removes stale lock sidecar files of a local database.
pub struct LockedDatabaseRecovery {
    wait: Duration,
}

impl LockedDatabaseRecovery {
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn is_accessible(path: &Path) -> bool {
    if path.exists() {
        OpenOptions::new().read(true).write(true).open(path).is_ok()
    } else {
        path.parent()
            .map(|p| p.as_os_str().is_empty() || p.is_dir())
            .unwrap_or(false)
    }
}

impl RecoveryStrategy for LockedDatabaseRecovery {
    fn name(&self) -> &str {
        "remove_lock_files"
    }

    fn recover(
        &self,
        _error: &InitError,
        context: Option<&ErrorContext>,
    ) -> Result<RecoveryResult, RecoveryError> {
        let path = required_path(context)?;
        std::thread::sleep(self.wait);

        let mut removed = Vec::new();
        for suffix in SIDECAR_SUFFIXES {
            let sidecar = sidecar_path(&path, suffix);
            match fs::remove_file(&sidecar) {
                Ok(()) => removed.push(Value::from(sidecar.display().to_string())),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(RecoveryError::Io(e)),
            }
        }

        let accessible = is_accessible(&path);
        let result = if accessible {
            RecoveryResult::succeeded(self.name())
        } else {
            RecoveryResult::failed(
                self.name(),
                format!("{} is still not accessible", path.display()),
            )
        };
        Ok(result
            .with_detail("path", path.display().to_string())
            .with_detail("removed_files", removed)
            .with_detail("accessible", accessible))
    }
}

/// Creates a missing database directory and an empty database file.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingDatabaseFileRecovery;

impl MissingDatabaseFileRecovery {
    pub fn new() -> Self {
        Self
    }
}

fn directory_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".initguard-write-test-{}", std::process::id()));
    let writable = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .is_ok();
    let _ = fs::remove_file(&probe);
    writable
}

impl RecoveryStrategy for MissingDatabaseFileRecovery {
    fn name(&self) -> &str {
        "create_database_file"
    }

    fn recover(
        &self,
        _error: &InitError,
        context: Option<&ErrorContext>,
    ) -> Result<RecoveryResult, RecoveryError> {
        let path = required_path(context)?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        if let Err(e) = fs::create_dir_all(&dir) {
            return Ok(RecoveryResult::failed(
                self.name(),
                format!("cannot create directory {}: {}", dir.display(), e),
            )
            .with_detail("failure_kind", "directory_not_writable"));
        }
        if !directory_writable(&dir) {
            return Ok(RecoveryResult::failed(
                self.name(),
                format!("directory {} is not writable", dir.display()),
            )
            .with_detail("failure_kind", "directory_not_writable"));
        }

        let existed = path.is_file();
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(_) => Ok(RecoveryResult::succeeded(self.name())
                .with_detail("directory", dir.display().to_string())
                .with_detail("path", path.display().to_string())
                .with_detail("file_created", !existed)),
            Err(e) => Ok(RecoveryResult::failed(
                self.name(),
                format!("cannot create {}: {}", path.display(), e),
            )
            .with_detail("failure_kind", "file_creation_failed")),
        }
    }
}

/// Falls back to a SQLite database in the working directory.
pub struct MissingUrlRecovery {
    settings: RuntimeSettings,
    working_dir: PathBuf,
    file_name: String,
}

impl MissingUrlRecovery {
    pub fn new(
        settings: RuntimeSettings,
        working_dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            working_dir: working_dir.into(),
            file_name: file_name.into(),
        }
    }

    /// URL of the fallback database.
    pub fn default_url(&self) -> String {
        format!(
            "sqlite:///{}",
            self.working_dir.join(&self.file_name).display()
        )
    }
}

impl RecoveryStrategy for MissingUrlRecovery {
    fn name(&self) -> &str {
        "default_database_url"
    }

    fn recover(
        &self,
        _error: &InitError,
        _context: Option<&ErrorContext>,
    ) -> Result<RecoveryResult, RecoveryError> {
        let url = self.settings.publish_default(self.default_url());
        tracing::info!(database_url = %url, "using fallback database URL");
        Ok(RecoveryResult::succeeded(self.name()).with_detail("database_url", url))
    }
}

/// Bootstraps a missing schema via an init script or the data model.
pub struct SchemaBootstrapRecovery {
    working_dir: PathBuf,
    scripts: Vec<PathBuf>,
    runner: Arc<dyn ScriptRunner>,
    bootstrapper: Option<Arc<dyn SchemaBootstrapper>>,
    settings: RuntimeSettings,
}

impl SchemaBootstrapRecovery {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        scripts: Vec<PathBuf>,
        runner: Arc<dyn ScriptRunner>,
        bootstrapper: Option<Arc<dyn SchemaBootstrapper>>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            scripts,
            runner,
            bootstrapper,
            settings,
        }
    }

    fn find_script(&self) -> Option<PathBuf> {
        self.scripts
            .iter()
            .map(|s| self.working_dir.join(s))
            .find(|p| p.is_file())
    }
}

impl RecoveryStrategy for SchemaBootstrapRecovery {
    fn name(&self) -> &str {
        "schema_bootstrap"
    }

    fn recover(
        &self,
        _error: &InitError,
        context: Option<&ErrorContext>,
    ) -> Result<RecoveryResult, RecoveryError> {
        let mut tried = Vec::new();

        if let Some(script) = self.find_script() {
            match self.runner.run(&script) {
                Ok(()) => {
                    return Ok(RecoveryResult::succeeded("init_script")
                        .with_detail("script", script.display().to_string()));
                }
                Err(e) => {
                    tracing::warn!(script = %script.display(), error = %e, "init script failed");
                    tried.push(format!("init_script: {}", e));
                }
            }
        } else {
            tried.push("init_script: no script found".to_string());
        }

        let url = self.settings.database_url().or_else(|| {
            context
                .map(|c| c.extra("database_url").unwrap_or(c.connection.as_str()).to_string())
                .filter(|u| !u.is_empty())
        });
        match (&self.bootstrapper, url) {
            (Some(bootstrapper), Some(url)) => {
                tracing::warn!("creating schema directly from data model metadata");
                match bootstrapper.create_schema(&url) {
                    Ok(tables) => {
                        return Ok(RecoveryResult::succeeded("metadata_create_all")
                            .with_detail("tables_created", tables));
                    }
                    Err(e) => tried.push(format!("metadata_create_all: {}", e)),
                }
            }
            (None, _) => tried.push("metadata_create_all: no schema bootstrapper".to_string()),
            (Some(_), None) => tried.push("metadata_create_all: no database URL".to_string()),
        }

        Ok(RecoveryResult::failed(self.name(), "no schema bootstrap method succeeded")
            .with_detail("tried", tried))
    }
}
