//! initguard - classification and recovery of database initialization failures.
//!
//! The library classifies raw failures raised while bringing a database up,
//! attaches remediation guidance, optionally runs an automated recovery, and
//! keeps a queryable history of what went wrong. The `initguard` binary is a
//! thin front end over the analysis and report functions.

pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod recovery;
pub mod resolution;
pub mod ui;

pub use error::{ErrorCategory, ErrorCode, ErrorContext, InitError, Severity};
pub use monitor::{ErrorMonitor, HistoryEntry};
pub use recovery::{HandledResult, InitErrorHandler, RecoveryResult, RecoveryStrategy};
pub use resolution::{ErrorResolution, ResolutionCatalog};
