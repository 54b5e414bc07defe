//! Rule-based classifier for initialization failures.
//!
//! The classifier lower-cases the failure message (including every message in
//! its `source()` chain) and walks an ordered table of [`ClassificationRule`]s.
//! The first rule with a matching keyword wins, so rule order matters: the
//! categories overlap and the more specific rules must come first.

use std::error::Error as StdError;

use super::{BoxError, ErrorCategory, ErrorCode, ErrorContext, InitError};

/// Restricts a rule to certain kinds of backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendScope {
    /// The rule applies to every backend.
    Any,
    /// The rule applies only to file-backed stores, or when the backend is unknown.
    FileBackend,
}

/// One row of the classification table.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    code: ErrorCode,
    keywords: Vec<&'static str>,
    scope: BackendScope,
}

impl ClassificationRule {
    /// Creates a rule assigning `code` when any keyword is contained in the message.
    ///
    /// Keywords are matched against the lower-cased message, so they should
    /// be written in lower case.
    pub fn new(code: ErrorCode, keywords: &[&'static str]) -> Self {
        Self {
            code,
            keywords: keywords.to_vec(),
            scope: BackendScope::Any,
        }
    }

    /// Limits the rule to file-backed stores.
    pub fn file_backend_only(mut self) -> Self {
        self.scope = BackendScope::FileBackend;
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn keywords(&self) -> &[&'static str] {
        &self.keywords
    }

    pub fn scope(&self) -> BackendScope {
        self.scope
    }

    /// Returns the first keyword contained in `message`.
    pub fn find(&self, message: &str) -> Option<&'static str> {
        self.keywords.iter().copied().find(|kw| message.contains(kw))
    }

    fn applies_to(&self, context: Option<&ErrorContext>) -> bool {
        match self.scope {
            BackendScope::Any => true,
            BackendScope::FileBackend => match context {
                None => true,
                Some(ctx) => {
                    let backend = ctx.backend_type.trim();
                    backend.is_empty()
                        || backend.eq_ignore_ascii_case("unknown")
                        || ctx.is_file_backend()
                }
            },
        }
    }
}

/// Maps raw failures onto [`ErrorCode`]s using an ordered rule table.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the built-in rule table.
    pub fn new() -> Self {
        Self {
            rules: Self::default_rules(),
        }
    }

    /// Creates a classifier with a custom rule table.
    pub fn with_rules(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    fn default_rules() -> Vec<ClassificationRule> {
        vec![
            // Connection
            ClassificationRule::new(
                ErrorCode::ConnectionRefused,
                &["connection refused", "could not connect", "can't connect"],
            ),
            ClassificationRule::new(ErrorCode::ConnectionTimeout, &["timeout", "timed out"]),
            ClassificationRule::new(
                ErrorCode::AuthenticationFailed,
                &[
                    "authentication failed",
                    "password authentication",
                    "access denied for user",
                ],
            ),
            ClassificationRule::new(
                ErrorCode::HostUnreachable,
                &[
                    "could not translate host",
                    "host unreachable",
                    "no route to host",
                    "name or service not known",
                    "unknown host",
                ],
            ),
            // Configuration
            ClassificationRule::new(
                ErrorCode::MissingDatabaseUrl,
                &["database_url", "database url", "no database configured"],
            ),
            // Schema. Permission errors also name a relation, so they go first.
            ClassificationRule::new(
                ErrorCode::SchemaPermissionDenied,
                &[
                    "permission denied for schema",
                    "permission denied for table",
                    "permission denied for relation",
                    "permission denied to create",
                    "must be owner of",
                    "create command denied",
                ],
            ),
            ClassificationRule::new(
                ErrorCode::TableNotFound,
                &[
                    "no such table",
                    "doesn't exist",
                    "undefined table",
                    "undefinedtable",
                    "relation \"",
                ],
            ),
            // Filesystem
            ClassificationRule::new(
                ErrorCode::DatabaseFileNotFound,
                &["unable to open database file", "no such file or directory"],
            )
            .file_backend_only(),
            ClassificationRule::new(ErrorCode::DatabaseFileLocked, &["database is locked"])
                .file_backend_only(),
            ClassificationRule::new(
                ErrorCode::DiskFull,
                &["database or disk is full", "disk is full", "no space left"],
            )
            .file_backend_only(),
            // Migration
            ClassificationRule::new(ErrorCode::MigrationFailed, &["migration"]),
            // Seeding
            ClassificationRule::new(ErrorCode::AdminUserCreationFailed, &["admin user"]),
            ClassificationRule::new(ErrorCode::SeedDataFailed, &["seeding", "initial data"]),
        ]
    }

    /// Adds a rule at the end of the table.
    pub fn add_rule(&mut self, rule: ClassificationRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Returns the code for a message without wrapping anything.
    ///
    /// Falls back to [`ErrorCode::Unknown`] when no rule matches.
    pub fn code_for(&self, message: &str, context: Option<&ErrorContext>) -> ErrorCode {
        let lowered = message.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(context))
            .find(|rule| rule.find(&lowered).is_some())
            .map(|rule| rule.code)
            .unwrap_or(ErrorCode::Unknown)
    }

    /// Classifies a failure and wraps it.
    ///
    /// Never fails: unmatched failures are wrapped under
    /// [`ErrorCode::Unknown`]. The returned error keeps `failure` as its source
    /// and a copy of `context`.
    pub fn classify<E>(&self, failure: E, context: Option<&ErrorContext>) -> (ErrorCode, InitError)
    where
        E: Into<BoxError>,
    {
        let failure = failure.into();
        let text = chain_text(&*failure);
        let code = self.code_for(&text, context);
        tracing::debug!(error_code = %code, "classified failure");
        (code, InitError::wrap(code, failure, context.cloned()))
    }
}

/// Joins the messages of an error and all of its sources.
pub(crate) fn chain_text(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
