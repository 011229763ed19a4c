//! Integration tests for config file resolution and graceful degradation
//!
//! Uses serial_test to prevent environment variable races: every test that
//! touches MIXD_CONFIG is marked #[serial].

use mixd_common::config::{resolve_config_path, DaemonConfig, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_cli_path_wins_over_env() {
    let env_file = write_config("capacity = 3\n");
    let cli_file = write_config("capacity = 7\n");
    env::set_var(CONFIG_ENV_VAR, env_file.path());

    let config = DaemonConfig::load(Some(cli_file.path())).unwrap();
    assert_eq!(config.capacity, 7);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_file_is_used() {
    let env_file = write_config("capacity = 3\ntick_interval_ms = 20\nbridge_capacity_ms = 400\n");
    env::set_var(CONFIG_ENV_VAR, env_file.path());

    assert_eq!(resolve_config_path().as_deref(), Some(env_file.path()));
    let config = DaemonConfig::load(None).unwrap();
    assert_eq!(config.capacity, 3);
    assert_eq!(config.tick_interval_ms, 20);
    assert_eq!(config.bridge_capacity_ms, 400);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_pointing_to_missing_file_is_ignored() {
    let dir = TempDir::new().unwrap();
    env::set_var(CONFIG_ENV_VAR, dir.path().join("absent.toml"));

    // Falls through to platform lookup or defaults; never an error
    let config = DaemonConfig::load(None);
    assert!(config.is_ok());

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_cli_path_is_an_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = DaemonConfig::load(Some(&missing)).unwrap_err();
    assert!(err.to_string().contains("nope.toml"));
}

#[test]
fn test_full_file_round_trip_of_every_field() {
    let file = write_config(
        r#"
device = "USB Audio"
sample_rate = 48000
channels = 1
capacity = 4
tick_interval_ms = 5
bridge_capacity_ms = 120
sink_buffer_frames = 256
virtual_device_name = "Ringer"

[logging]
level = "trace"
file = "/tmp/mixd.log"
"#,
    );

    let config = DaemonConfig::from_file(file.path()).unwrap();
    assert_eq!(config.device.as_deref(), Some("USB Audio"));
    assert_eq!(config.sample_rate, 48000);
    assert_eq!(config.channels, 1);
    assert_eq!(config.capacity, 4);
    assert_eq!(config.tick_interval_ms, 5);
    assert_eq!(config.bridge_capacity_ms, 120);
    assert_eq!(config.sink_buffer_frames, Some(256));
    assert_eq!(config.virtual_device_name, "Ringer");
    assert_eq!(config.logging.level, "trace");
    assert_eq!(config.logging.file.as_deref(), Some(std::path::Path::new("/tmp/mixd.log")));
}
