//! Unit tests for configuration resolution and graceful degradation
//!
//! Tests that manipulate SKYFUSE_CONFIG are marked with #[serial] so they
//! run sequentially, not in parallel.

use serde::Deserialize;
use serial_test::serial;
use skyfuse_common::config::{load_or_default, resolve_config_path, CONFIG_ENV_VAR};
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
struct SampleConfig {
    port: u16,
    level: String,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            level: "info".to_string(),
        }
    }
}

#[test]
#[serial]
fn test_cli_argument_takes_priority_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let resolved = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")), "fusion.toml");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));
    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let resolved = resolve_config_path(None, "fusion.toml");
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));
    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
fn test_missing_file_yields_defaults() {
    let config: SampleConfig =
        load_or_default(Some(Path::new("/nonexistent/skyfuse/fusion.toml"))).unwrap();
    assert_eq!(config, SampleConfig::default());

    let config: SampleConfig = load_or_default(None).unwrap();
    assert_eq!(config, SampleConfig::default());
}

#[test]
fn test_partial_file_keeps_remaining_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port = 9000").unwrap();

    let config: SampleConfig = load_or_default(Some(file.path())).unwrap();
    assert_eq!(config.port, 9000);
    assert_eq!(config.level, "info");
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port = [not valid").unwrap();

    let result: skyfuse_common::Result<SampleConfig> = load_or_default(Some(file.path()));
    assert!(result.is_err());
}
