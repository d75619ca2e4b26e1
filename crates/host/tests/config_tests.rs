//! Integration tests for configuration parsing
//!
//! Covers:
//! - Minimal and full TOML files
//! - Defaults for omitted sections
//! - Save/load round trip through a temp directory
//! - Rejection of invalid values

use host::config::LinkConfig;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const MINIMAL_CONFIG: &str = r#"
[link]
log_level = "info"
"#;

const FULL_CONFIG: &str = r#"
[link]
log_level = "debug"
vendor_id = 1240
product_id = 223

[reader]
read_timeout_ms = 20
read_interval_ms = 10

[writer]
write_timeout_ms = 250

[events]
capacity = 32
"#;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("link.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_minimal_config_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, MINIMAL_CONFIG);

    let config = LinkConfig::load(Some(path)).unwrap();
    assert_eq!(config, LinkConfig::default());
}

#[test]
fn test_empty_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let config = LinkConfig::load(Some(path)).unwrap();
    assert_eq!(config, LinkConfig::default());
}

#[test]
fn test_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, FULL_CONFIG);

    let config = LinkConfig::load(Some(path)).unwrap();
    assert_eq!(config.link.log_level, "debug");
    assert_eq!(config.target(), Some((0x04d8, 0x00df)));

    let reader = config.reader_settings();
    assert_eq!(reader.read_timeout, Duration::from_millis(20));
    assert_eq!(reader.read_interval, Duration::from_millis(10));
    assert_eq!(config.write_timeout(), Duration::from_millis(250));
    assert_eq!(config.events.capacity, 32);
}

#[test]
fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("link.toml");

    let mut config = LinkConfig::default();
    config.link.vendor_id = Some(0x04d8);
    config.link.product_id = Some(0x00df);
    config.events.capacity = 8;

    config.save(&path).unwrap();
    assert!(path.exists());

    let loaded = LinkConfig::load(Some(path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = LinkConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_malformed_toml_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[reader\nread_timeout_ms = ");

    let err = LinkConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("Cannot parse"));
}

#[test]
fn test_invalid_values_rejected() {
    let dir = TempDir::new().unwrap();

    for content in [
        "[reader]\nread_timeout_ms = 0\n",
        "[reader]\nread_interval_ms = 0\n",
        "[writer]\nwrite_timeout_ms = 0\n",
        "[events]\ncapacity = 0\n",
        "[link]\nvendor_id = 1240\n",
    ] {
        let path = write_config(&dir, content);
        assert!(
            LinkConfig::load(Some(path)).is_err(),
            "accepted invalid config: {content}"
        );
    }
}
