// SPDX-License-Identifier: MPL-2.0

//! Integration tests for recorder settings

use dualcam::pipelines::dual::{CameraFacing, PipPosition, PipSize};
use dualcam::{AppError, RecorderSettings};
use std::path::PathBuf;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dualcam-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[test]
fn test_settings_default() {
    let settings = RecorderSettings::default();

    assert_eq!((settings.width, settings.height), (1920, 1080));
    assert_eq!(settings.framerate, 30);
    assert!(settings.audio.enabled, "Audio should be recorded by default");
    assert_eq!(settings.pip.primary, CameraFacing::Back);
    assert!(settings.validate().is_ok());
}

#[test]
fn test_settings_save_and_load() {
    let dir = scratch_dir("roundtrip");
    // Parent directories are created on save
    let path = dir.join("nested").join("settings.json");

    let mut settings = RecorderSettings::default();
    settings.framerate = 24;
    settings.bitrate_kbps = Some(6_000);
    settings.audio.enabled = false;
    settings.pip = settings
        .pip
        .with_primary(CameraFacing::Front)
        .with_position(PipPosition::TopLeft)
        .with_size(PipSize::Large)
        .with_border(false);

    settings.save(&path).unwrap();
    let loaded = RecorderSettings::load(&path).unwrap();
    assert_eq!(loaded, settings);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = scratch_dir("partial");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("settings.json");
    std::fs::write(&path, r#"{ "framerate": 60, "pip": { "size": "Small" } }"#).unwrap();

    let loaded = RecorderSettings::load(&path).unwrap();
    assert_eq!(loaded.framerate, 60);
    assert_eq!(loaded.pip.size, PipSize::Small);
    assert_eq!(loaded.width, RecorderSettings::default().width);
    assert_eq!(loaded.pip.position, PipPosition::BottomRight);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_invalid_file_is_config_error() {
    let dir = scratch_dir("invalid");
    std::fs::create_dir_all(&dir).unwrap();

    let garbage = dir.join("garbage.json");
    std::fs::write(&garbage, "not json").unwrap();
    assert!(matches!(
        RecorderSettings::load(&garbage),
        Err(AppError::Config(_))
    ));

    // Parses but fails validation
    let odd = dir.join("odd.json");
    std::fs::write(&odd, r#"{ "width": 641 }"#).unwrap();
    assert!(matches!(RecorderSettings::load(&odd), Err(AppError::Config(_))));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = scratch_dir("missing");
    let path = dir.join("settings.json");

    let loaded = RecorderSettings::load_or_default(&path).unwrap();
    assert_eq!(loaded, RecorderSettings::default());
    assert!(RecorderSettings::load(&path).is_err());
}

#[test]
fn test_encoding_config_follows_settings() {
    let mut settings = RecorderSettings::default();
    let config = settings.encoding_config();
    assert_eq!(config.bitrate_kbps, settings.video_bitrate_kbps());
    assert!(config.audio.is_some());

    settings.audio.enabled = false;
    settings.bitrate_kbps = Some(3_000);
    let config = settings.encoding_config();
    assert_eq!(config.bitrate_kbps, 3_000);
    assert!(config.audio.is_none());
}
