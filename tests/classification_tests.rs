//! Classification and resolution behaviour through the public API.

use std::fmt;
use std::io;

use initguard::error::{
    build_context, ContextFields, ErrorCategory, ErrorClassifier, ErrorCode, ErrorContext,
    RecoveryAction, Severity,
};
use initguard::resolution::ResolutionCatalog;

#[derive(Debug)]
struct DriverError {
    message: &'static str,
    source: io::Error,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[test]
fn test_connection_refused_scenario() {
    let classifier = ErrorClassifier::new();
    let catalog = ResolutionCatalog::new();
    let context = ErrorContext::new("postgresql", "connect");

    let (code, wrapped) = classifier.classify("connection refused", Some(&context));
    let resolution = catalog.resolve(code);

    assert_eq!(code, ErrorCode::ConnectionRefused);
    assert_eq!(code.category(), ErrorCategory::Connection);
    assert_eq!(resolution.severity, Severity::Critical);
    assert!(resolution.steps.len() >= 3);
    assert_eq!(resolution.steps[0].action, RecoveryAction::Manual);
    assert_eq!(wrapped.context.as_ref(), Some(&context));
}

#[test]
fn test_connection_refused_is_case_insensitive() {
    let classifier = ErrorClassifier::new();
    for message in [
        "CONNECTION REFUSED",
        "psql: error: Connection Refused (os error 111)",
        "upstream said: connection refused, giving up",
    ] {
        let (code, _) = classifier.classify(message, None);
        assert_eq!(code, ErrorCode::ConnectionRefused, "{}", message);
    }
}

#[test]
fn test_missing_url_scenario() {
    let (code, _) = ErrorClassifier::new().classify("DATABASE_URL missing", None);
    assert_eq!(code, ErrorCode::MissingDatabaseUrl);
    assert_eq!(code.category(), ErrorCategory::Configuration);
}

#[test]
fn test_classification_is_total() {
    let classifier = ErrorClassifier::new();
    for message in ["", "   ", "\u{1F4A5}", "something odd happened"] {
        let (code, wrapped) = classifier.classify(message, None);
        assert_eq!(code, ErrorCode::Unknown);
        assert_eq!(wrapped.code, ErrorCode::Unknown);
    }
}

#[test]
fn test_source_chain_is_classified() {
    let failure = DriverError {
        message: "pool initialisation failed",
        source: io::Error::new(io::ErrorKind::Other, "Operation timed out"),
    };
    let (code, wrapped) = ErrorClassifier::new().classify(failure, None);
    assert_eq!(code, ErrorCode::ConnectionTimeout);
    assert_eq!(wrapped.message, "pool initialisation failed");
    assert!(std::error::Error::source(&wrapped).is_some());
}

#[test]
fn test_filesystem_rules_respect_backend() {
    let classifier = ErrorClassifier::new();
    let sqlite = ErrorContext::new("sqlite", "connect");
    let postgres = ErrorContext::new("postgresql", "connect");

    let (code, _) = classifier.classify("database is locked", Some(&sqlite));
    assert_eq!(code, ErrorCode::DatabaseFileLocked);

    let (code, _) = classifier.classify("database is locked", Some(&postgres));
    assert_eq!(code, ErrorCode::Unknown);
}

#[test]
fn test_every_code_resolves() {
    let catalog = ResolutionCatalog::new();
    for code in ErrorCode::ALL {
        let resolution = catalog.resolve(*code);
        assert_eq!(resolution.code, *code);
        assert!(!resolution.title.is_empty());
        assert!(!resolution.steps.is_empty(), "{} has no steps", code);
    }
}

#[test]
fn test_critical_codes_start_with_manual_verification() {
    let catalog = ResolutionCatalog::new();
    for code in ErrorCode::ALL {
        let resolution = catalog.resolve(*code);
        if resolution.severity == Severity::Critical {
            assert!(
                resolution
                    .steps
                    .iter()
                    .any(|s| s.action == RecoveryAction::Manual && !s.automated),
                "{} lacks a manual step",
                code
            );
        }
    }
}

#[test]
fn test_unregistered_code_gets_default_resolution() {
    let resolution = ResolutionCatalog::empty().resolve(ErrorCode::HealthCheckFailed);
    assert_eq!(resolution.severity, Severity::High);
    assert!(resolution.escalate);
    assert!(resolution.steps.iter().all(|s| !s.automated));
}

#[test]
fn test_build_context_from_fields() {
    let context = build_context(
        ContextFields {
            backend_type: Some("sqlite".to_string()),
            connection: Some("sqlite:///data/app.db".to_string()),
            operation: Some("create_tables".to_string()),
            table: Some("users".to_string()),
            ..Default::default()
        },
        [("path", "/tmp/x.db")],
    );
    assert_eq!(context.table.as_deref(), Some("users"));
    assert_eq!(context.extra("path"), Some("/tmp/x.db"));
    assert_eq!(context.database_path().as_deref(), Some("/tmp/x.db"));
    assert_eq!(context.environment, "development");
}

#[test]
fn test_codes_parse_from_name_or_number() {
    assert_eq!("connection_refused".parse::<ErrorCode>().unwrap(), ErrorCode::ConnectionRefused);
    assert_eq!("1602".parse::<ErrorCode>().unwrap(), ErrorCode::DatabaseFileLocked);
    assert!("NOT_A_CODE".parse::<ErrorCode>().is_err());
}
