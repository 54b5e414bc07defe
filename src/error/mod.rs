//! Error taxonomy and classification for database initialization failures.
//!
//! This module defines the closed set of error codes, the context captured
//! when a failure happens, and the rule-based classifier that maps raw
//! failures onto codes.

pub mod classification;
pub mod detector;

// Re-export main types for convenient access
pub use classification::{
    build_context, is_file_backend, mask_credentials, sqlite_path_from_url, BoxError,
    ContextFields, ErrorCategory, ErrorCode, ErrorContext, InitError, ParseErrorCodeError,
    RecoveryAction, Severity,
};
pub use detector::{BackendScope, ClassificationRule, ErrorClassifier};
