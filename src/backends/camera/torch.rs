// SPDX-License-Identifier: GPL-3.0-only

//! Torch LED control via Linux sysfs
//!
//! Camera LEDs show up at `/sys/class/leds/*:flash` or `*:torch`. Writing
//! the `brightness` file drives them in torch mode, which stays on until
//! written back to zero.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const LEDS_DIR: &str = "/sys/class/leds";

/// A torch-capable LED
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorchLed {
    path: PathBuf,
    max_brightness: u32,
    name: String,
}

impl TorchLed {
    /// Writable camera LEDs on this machine
    pub fn discover() -> Vec<TorchLed> {
        Self::discover_in(Path::new(LEDS_DIR))
    }

    /// Writable camera LEDs under `leds_dir`, sorted by name
    pub fn discover_in(leds_dir: &Path) -> Vec<TorchLed> {
        let Ok(entries) = std::fs::read_dir(leds_dir) else {
            warn!(path = %leds_dir.display(), "Cannot read LED directory, torch disabled");
            return Vec::new();
        };

        let mut leds = Vec::new();

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name_str) = name.to_str() else {
                continue;
            };

            if !name_str.ends_with(":flash") && !name_str.ends_with(":torch") {
                continue;
            }

            let led_path = entry.path();
            let max_brightness_path = led_path.join("max_brightness");

            let max_brightness = match std::fs::read_to_string(&max_brightness_path) {
                Ok(s) => match s.trim().parse::<u32>() {
                    Ok(v) if v > 0 => v,
                    _ => {
                        warn!(
                            path = %max_brightness_path.display(),
                            "Invalid max_brightness value"
                        );
                        continue;
                    }
                },
                Err(e) => {
                    warn!(
                        path = %max_brightness_path.display(),
                        error = %e,
                        "Cannot read max_brightness"
                    );
                    continue;
                }
            };

            let brightness_path = led_path.join("brightness");
            if let Err(e) = std::fs::OpenOptions::new()
                .write(true)
                .open(&brightness_path)
            {
                warn!(
                    path = %brightness_path.display(),
                    error = %e,
                    "Torch LED found but not writable"
                );
                continue;
            }

            info!(name = name_str, max_brightness, "Discovered torch LED");

            leds.push(TorchLed {
                path: led_path,
                max_brightness,
                name: name_str.to_string(),
            });
        }

        leds.sort_by(|a, b| a.name.cmp(&b.name));
        leds
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full brightness when `on`, zero otherwise
    pub fn set(&self, on: bool) -> io::Result<()> {
        let value = if on { self.max_brightness } else { 0 };
        std::fs::write(self.path.join("brightness"), value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("dualcam-leds-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn add_led(dir: &Path, name: &str, max: &str) -> PathBuf {
        let led = dir.join(name);
        std::fs::create_dir_all(&led).unwrap();
        std::fs::write(led.join("max_brightness"), max).unwrap();
        std::fs::write(led.join("brightness"), "0").unwrap();
        led
    }

    #[test]
    fn test_discover_matches_camera_leds() {
        let dir = scratch("discover");
        add_led(&dir, "white:torch", "255\n");
        add_led(&dir, "white:flash", "1000\n");
        add_led(&dir, "input3::capslock", "1\n");
        add_led(&dir, "yellow:flash", "0\n");

        let leds = TorchLed::discover_in(&dir);
        let names: Vec<&str> = leds.iter().map(|led| led.name()).collect();
        assert_eq!(names, vec!["white:flash", "white:torch"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_set_writes_brightness() {
        let dir = scratch("set");
        let path = add_led(&dir, "white:flash", "750");

        let leds = TorchLed::discover_in(&dir);
        leds[0].set(true).unwrap();
        assert_eq!(std::fs::read_to_string(path.join("brightness")).unwrap(), "750");
        leds[0].set(false).unwrap();
        assert_eq!(std::fs::read_to_string(path.join("brightness")).unwrap(), "0");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_directory() {
        assert!(TorchLed::discover_in(Path::new("/nonexistent/leds")).is_empty());
    }
}
