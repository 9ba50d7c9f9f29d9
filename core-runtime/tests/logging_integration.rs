//! Integration tests for logging configuration helpers

use bridge_traits::time::LogLevel;
use core_runtime::logging::{
    init_logging, redact_if_sensitive, redact_url_token, strip_path, LogFormat, LoggingConfig,
};

#[test]
fn test_logging_config_builder() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Debug)
        .with_pii_redaction(false)
        .with_spans(true)
        .with_target(false);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Debug);
    assert!(!config.redact_pii);
    assert!(config.enable_spans);
    assert!(!config.display_target);
}

#[test]
fn test_credentials_are_redacted() {
    assert_eq!(redact_if_sensitive("access_token", "eyJhbGci"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Authorization", "Bearer x"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("password", "hunter2"), "[REDACTED]");
}

#[test]
fn test_emails_are_partially_redacted() {
    let redacted = redact_if_sensitive("username", "reader@example.com");
    assert!(redacted.starts_with('r'));
    assert!(redacted.contains("[REDACTED]"));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_identifiers_pass_through() {
    assert_eq!(redact_if_sensitive("book_id", "li_8f2c"), "li_8f2c");
    assert_eq!(redact_if_sensitive("title", "The Hobbit"), "The Hobbit");
}

#[test]
fn test_cover_url_token_is_masked() {
    let url = "https://abs.example.com/api/items/li_1/cover?token=eyJhbGci";
    assert_eq!(
        redact_url_token(url),
        "https://abs.example.com/api/items/li_1/cover?token=[REDACTED]"
    );

    let two = "https://a/x?token=1&b=2&token=3";
    assert_eq!(
        redact_url_token(two),
        "https://a/x?token=[REDACTED]&b=2&token=[REDACTED]"
    );
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/data/downloads/li_1/Part 01.mp3"), "Part 01.mp3");
    assert_eq!(strip_path("C:\\Users\\reader\\Books\\ch1.m4b"), "ch1.m4b");
    assert_eq!(strip_path("ch1.m4b"), "ch1.m4b");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_init_logging_only_once() {
    let config = LoggingConfig::default().with_format(LogFormat::Compact);
    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());
}
