// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use barcode_scanner::Config;
use barcode_scanner::backends::camera::types::{LensFacing, Resolution};
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.scan.minimum_barcode_width_percent, 50);
    assert_eq!(config.scan.reticle_width_percent, 80);
    assert_eq!(config.scan.reticle_height_percent, 35);
    assert!(
        config.scan.delay_loading_barcode_result,
        "Result delay should be enabled by default"
    );
    assert!(
        !config.scan.enable_barcode_size_check,
        "Size check should be disabled by default"
    );
    assert_eq!(config.user_size_pair(LensFacing::Back), None);
}

#[test]
fn test_partial_config_uses_defaults() {
    let file = write_config(
        r#"{
            "scan": { "enable_barcode_size_check": true },
            "rear_camera": { "preview_size": "1280x720" }
        }"#,
    );

    let config = Config::load_from(file.path()).unwrap();
    assert!(config.scan.enable_barcode_size_check);
    assert_eq!(config.scan.reticle_width_percent, 80);
    assert_eq!(config.buffer_count, Config::default().buffer_count);
    assert_eq!(
        config.user_size_pair(LensFacing::Back).map(|c| c.preview),
        Some(Resolution::new(1280, 720))
    );
    assert_eq!(config.user_size_pair(LensFacing::Front), None);
}

#[test]
fn test_invalid_percentage_rejected() {
    let file = write_config(r#"{ "scan": { "reticle_height_percent": 150 } }"#);
    assert!(Config::load_from(file.path()).is_err());
}

#[test]
fn test_too_few_buffers_rejected() {
    let file = write_config(r#"{ "buffer_count": 1 }"#);
    assert!(Config::load_from(file.path()).is_err());

    // Two buffers cannot replace a waiting frame while another is processed
    let file = write_config(r#"{ "buffer_count": 2 }"#);
    assert!(matches!(
        Config::load_from(file.path()),
        Err(barcode_scanner::AppError::Config(_))
    ));

    let file = write_config(r#"{ "buffer_count": 3 }"#);
    assert_eq!(Config::load_from(file.path()).unwrap().buffer_count, 3);
}

#[test]
fn test_malformed_json_rejected() {
    let file = write_config("{ not json");
    assert!(Config::load_from(file.path()).is_err());
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load_from(&dir.path().join("config.json"));
    assert!(matches!(result, Err(barcode_scanner::AppError::Io(_))));
}
