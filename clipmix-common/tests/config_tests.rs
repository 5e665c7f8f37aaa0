//! Integration tests for engine configuration loading
//!
//! Covers file resolution priority (CLI > env > platform dir > defaults) and
//! per-key `CLIPMIX_*` environment overrides.
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate CLIPMIX_* variables are marked with #[serial].

use clipmix_common::config::{resolve_config_path, CONFIG_PATH_ENV};
use clipmix_common::{EngineConfig, Error};
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

const OVERRIDE_VARS: &[&str] = &[
    "CLIPMIX_SCHEDULE_AHEAD_SECS",
    "CLIPMIX_RESCHEDULE_INTERVAL_SECS",
    "CLIPMIX_MAX_RETRY_ATTEMPTS",
    "CLIPMIX_RETRY_BASE_DELAY_MS",
    "CLIPMIX_RETRY_MAX_DELAY_MS",
    "CLIPMIX_SEEK_THRESHOLD_SECS",
    "CLIPMIX_SAMPLE_RATE",
    "CLIPMIX_OUTPUT_DEVICE",
];

fn clear_env() {
    env::remove_var(CONFIG_PATH_ENV);
    for var in OVERRIDE_VARS {
        env::remove_var(var);
    }
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes()).expect("Failed to write config");
    file
}

#[test]
#[serial]
fn test_cli_path_takes_priority_over_env() {
    clear_env();
    let cli = write_config("schedule_ahead_secs = 2.0\n");
    let from_env = write_config("schedule_ahead_secs = 3.0\n");
    env::set_var(CONFIG_PATH_ENV, from_env.path());

    let resolved = resolve_config_path(Some(cli.path())).unwrap();
    assert_eq!(resolved, cli.path());

    let config = EngineConfig::load(Some(cli.path())).unwrap();
    assert_eq!(config.schedule_ahead_secs, 2.0);

    clear_env();
}

#[test]
#[serial]
fn test_env_path_used_without_cli() {
    clear_env();
    let from_env = write_config("reschedule_interval_secs = 0.1\n");
    env::set_var(CONFIG_PATH_ENV, from_env.path());

    let config = EngineConfig::load(None).unwrap();
    assert_eq!(config.reschedule_interval_secs, 0.1);
    assert_eq!(config.schedule_ahead_secs, 0.5);

    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    let file = write_config("max_retry_attempts = 5\nretry_base_delay_ms = 500\n");
    env::set_var("CLIPMIX_MAX_RETRY_ATTEMPTS", "7");
    env::set_var("CLIPMIX_OUTPUT_DEVICE", "Studio Monitors");

    let config = EngineConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.max_retry_attempts, 7);
    assert_eq!(config.retry_base_delay_ms, 500);
    assert_eq!(config.output_device.as_deref(), Some("Studio Monitors"));

    clear_env();
}

#[test]
#[serial]
fn test_unparseable_env_override_is_ignored() {
    clear_env();
    let file = write_config("");
    env::set_var("CLIPMIX_SAMPLE_RATE", "fast");

    let config = EngineConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.sample_rate, 48_000);

    clear_env();
}

#[test]
#[serial]
fn test_env_override_revalidated() {
    clear_env();
    let file = write_config("");
    env::set_var("CLIPMIX_RETRY_BASE_DELAY_MS", "60000");

    let err = EngineConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    clear_env();
}

#[test]
#[serial]
fn test_missing_cli_file_is_config_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");

    let err = EngineConfig::load(Some(&missing)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
