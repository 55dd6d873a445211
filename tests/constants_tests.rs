// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use dualcam::constants::{
    BitratePreset, ResolutionTier, format_bitrate, get_resolution_tier, timing,
};

#[test]
fn test_bitrate_preset_values() {
    // Test that all presets exist (Low, Medium, High)
    assert_eq!(BitratePreset::ALL.len(), 3);
}

#[test]
fn test_bitrate_preset_ordering() {
    let mut prev_bitrate = 0u32;
    for preset in BitratePreset::ALL {
        let bitrate = preset.bitrate_kbps(1920, 1080);
        assert!(
            bitrate > prev_bitrate,
            "Presets should be ordered from lowest to highest"
        );
        prev_bitrate = bitrate;
    }
}

#[test]
fn test_bitrate_scales_with_resolution() {
    let hd_bitrate = BitratePreset::Medium.bitrate_kbps(1280, 720);
    let fhd_bitrate = BitratePreset::Medium.bitrate_kbps(1920, 1080);
    let uhd_bitrate = BitratePreset::Medium.bitrate_kbps(3840, 2160);

    assert!(hd_bitrate < fhd_bitrate);
    assert!(fhd_bitrate < uhd_bitrate);
}

#[test]
fn test_portrait_output_uses_long_edge() {
    assert_eq!(
        BitratePreset::High.bitrate_kbps(1080, 1920),
        BitratePreset::High.bitrate_kbps(1920, 1080)
    );
    assert_eq!(get_resolution_tier(720), ResolutionTier::SD);
    assert_eq!(get_resolution_tier(1280), ResolutionTier::HD);
}

#[test]
fn test_bitrate_preset_display_names() {
    for preset in BitratePreset::ALL {
        assert!(!preset.display_name().is_empty());
    }
}

#[test]
fn test_format_bitrate() {
    assert_eq!(format_bitrate(8_000), "8 Mbps");
    assert_eq!(format_bitrate(2_500), "2.5 Mbps");
}

#[test]
fn test_snapshot_timing_defaults() {
    assert!(timing::SNAPSHOT_INITIAL_DELAY < timing::SNAPSHOT_INTERVAL);
    assert!(timing::SNAPSHOT_INTERVAL < timing::SNAPSHOT_ATTEMPT_TIMEOUT);
    assert!(timing::SNAPSHOT_SETTLE_FRAMES > 0);
}
