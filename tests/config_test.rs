//! Tests for config loading: TOML files, environment overrides, validation

use std::io::Write;
use std::path::PathBuf;

use serial_test::serial;
use tempfile::NamedTempFile;

use worldtally::config::{Config, Credentials};

const ENV_KEYS: &[&str] = &[
    "WORLDTALLY_BASE_URL",
    "WORLDTALLY_PAGE_COUNT",
    "WORLDTALLY_INTERVAL_SECS",
    "WORLDTALLY_DATA_DIR",
    "WORLDTALLY_WEBHOOK_URL",
    "WORLDTALLY_USERNAME",
    "WORLDTALLY_PASSWORD",
    "VRCHAT_USERNAME",
    "VRCHAT_PASSWORD",
    "IMMEDIATE_START",
    "PORT",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

fn toml_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_from_file_reads_sections() {
    clear_env();
    let file = toml_file(
        r#"
        [platform]
        base_url = "https://api.example.test/1"

        [harvest]
        orderings = ["heat"]
        page_size = 50
        page_count = 2

        [retry]
        max_attempts = 7

        [retry.rate_limited]
        base_delay_ms = 1000
        max_delay_ms = 9000
        backoff_multiplier = 1.5

        [scheduler]
        interval_secs = 1800
        immediate_start = false

        [storage]
        data_dir = "/srv/worldtally"
        "#,
    );

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.platform.base_url, "https://api.example.test/1");
    assert_eq!(config.harvest.orderings, vec!["heat".to_string()]);
    assert_eq!(config.harvest.page_size, 50);
    assert_eq!(config.retry.max_attempts, 7);
    assert_eq!(config.retry.rate_limited.max_delay_ms, 9000);
    assert_eq!(config.scheduler.interval_secs, 1800);
    assert!(!config.scheduler.immediate_start);
    assert_eq!(
        config.storage.state_dir(),
        PathBuf::from("/srv/worldtally/state")
    );
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let file = toml_file("[harvest]\npage_count = 2\n");
    std::env::set_var("WORLDTALLY_PAGE_COUNT", "9");
    std::env::set_var("WORLDTALLY_INTERVAL_SECS", "600");
    std::env::set_var("WORLDTALLY_DATA_DIR", "/var/lib/wt");
    std::env::set_var("IMMEDIATE_START", "false");
    std::env::set_var("PORT", "8088");
    std::env::set_var("WORLDTALLY_WEBHOOK_URL", "");

    let config = Config::from_file(file.path()).unwrap();
    clear_env();

    assert_eq!(config.harvest.page_count, 9);
    assert_eq!(config.scheduler.interval_secs, 600);
    assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/wt"));
    assert!(!config.scheduler.immediate_start);
    assert_eq!(config.server.bind_address.port(), 8088);
    assert!(
        config.notifications.webhook_url.is_none(),
        "empty URL disables the webhook"
    );
}

#[test]
#[serial]
fn test_unparsable_env_value_is_ignored() {
    clear_env();
    std::env::set_var("WORLDTALLY_PAGE_COUNT", "many");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(
        config.harvest.page_count,
        Config::default().harvest.page_count
    );
}

#[test]
#[serial]
fn test_credentials_prefer_own_prefix() {
    clear_env();
    std::env::set_var("VRCHAT_USERNAME", "legacy");
    std::env::set_var("VRCHAT_PASSWORD", "legacy-pass");
    std::env::set_var("WORLDTALLY_USERNAME", "current");

    let credentials = Credentials::from_env();
    clear_env();

    assert_eq!(credentials.username, "current");
    assert_eq!(credentials.password, "legacy-pass");
    assert!(credentials.is_complete());
}

#[test]
#[serial]
fn test_missing_credentials_are_incomplete() {
    clear_env();
    assert!(!Credentials::from_env().is_complete());
}

#[test]
fn test_malformed_toml_is_an_error() {
    let file = toml_file("[harvest\npage_size = ");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_missing_file_is_an_error() {
    let err = Config::from_file(std::path::Path::new("/nonexistent/worldtally.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_validation_rejects_bad_values() {
    let mut config = Config::default();
    config.platform.base_url = "ftp://example.test".into();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.retry.max_attempts = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.scheduler.interval_secs = 0;
    assert!(config.validate().is_err());
}
