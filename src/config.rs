// SPDX-License-Identifier: GPL-3.0-only

//! User preferences
//!
//! Read from `config.json` in the user's configuration directory. The
//! scanner never writes this file; missing fields take their defaults.

use crate::backends::camera::types::{LensFacing, Resolution, SizeCandidate};
use crate::constants::{DETECTOR_MAX_DIMENSION, FRAME_BUFFER_COUNT, MIN_FRAME_BUFFER_COUNT, defaults};
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory name under the user configuration directory
pub const CONFIG_DIR_NAME: &str = "barcode-scanner";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Preferences that shape the detection workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPreferences {
    /// Minimum barcode width as a percentage of the reticle width
    pub minimum_barcode_width_percent: u32,
    /// Reticle width as a percentage of the view width
    pub reticle_width_percent: u32,
    /// Reticle height as a percentage of the view height
    pub reticle_height_percent: u32,
    /// Play the searching animation before showing the result
    pub delay_loading_barcode_result: bool,
    /// Require the barcode to fill enough of the reticle
    pub enable_barcode_size_check: bool,
}

impl Default for ScanPreferences {
    fn default() -> Self {
        Self {
            minimum_barcode_width_percent: defaults::MINIMUM_BARCODE_WIDTH_PERCENT,
            reticle_width_percent: defaults::RETICLE_WIDTH_PERCENT,
            reticle_height_percent: defaults::RETICLE_HEIGHT_PERCENT,
            delay_loading_barcode_result: defaults::DELAY_LOADING_BARCODE_RESULT,
            enable_barcode_size_check: defaults::ENABLE_BARCODE_SIZE_CHECK,
        }
    }
}

impl ScanPreferences {
    fn validate(&self) -> AppResult<()> {
        let percentages = [
            ("minimum_barcode_width_percent", self.minimum_barcode_width_percent),
            ("reticle_width_percent", self.reticle_width_percent),
            ("reticle_height_percent", self.reticle_height_percent),
        ];
        for (name, value) in percentages {
            if !(1..=100).contains(&value) {
                return Err(AppError::Config(format!(
                    "{} must be between 1 and 100, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// User selected sizes for one camera, as `"WIDTHxHEIGHT"` strings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSizeSettings {
    pub preview_size: Option<String>,
    pub picture_size: Option<String>,
}

impl CameraSizeSettings {
    /// Parsed preview/picture pair
    ///
    /// `None` unless the preview size is set, and `None` if either string is
    /// malformed.
    pub fn size_pair(&self) -> Option<SizeCandidate> {
        let preview: Resolution = self.preview_size.as_deref()?.parse().ok()?;
        let picture = match self.picture_size.as_deref() {
            Some(s) => Some(s.parse::<Resolution>().ok()?),
            None => None,
        };
        Some(SizeCandidate::new(preview, picture))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanPreferences,
    /// Sizes for back facing (and external) cameras
    pub rear_camera: CameraSizeSettings,
    pub front_camera: CameraSizeSettings,
    /// Largest side of the image handed to the QR detector
    pub detector_max_dimension: u32,
    /// Frame buffers owned by a capture source
    pub buffer_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan: ScanPreferences::default(),
            rear_camera: CameraSizeSettings::default(),
            front_camera: CameraSizeSettings::default(),
            detector_max_dimension: DETECTOR_MAX_DIMENSION,
            buffer_count: FRAME_BUFFER_COUNT,
        }
    }
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            debug!("No configuration directory, using defaults");
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring invalid configuration");
                Self::default()
            }
        }
    }

    /// Load and validate a configuration file
    pub fn load_from(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.scan.validate()?;
        if config.buffer_count < MIN_FRAME_BUFFER_COUNT {
            return Err(AppError::Config(format!(
                "buffer_count must be at least {}, got {}",
                MIN_FRAME_BUFFER_COUNT, config.buffer_count
            )));
        }
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// User selected size pair for a camera facing `facing`
    pub fn user_size_pair(&self, facing: LensFacing) -> Option<SizeCandidate> {
        match facing {
            LensFacing::Front => self.front_camera.size_pair(),
            LensFacing::Back | LensFacing::External => self.rear_camera.size_pair(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_pair_requires_valid_strings() {
        let settings = CameraSizeSettings {
            preview_size: Some("1280x720".into()),
            picture_size: Some("3840x2160".into()),
        };
        assert_eq!(
            settings.size_pair(),
            Some(SizeCandidate::new(
                Resolution::new(1280, 720),
                Some(Resolution::new(3840, 2160))
            ))
        );

        let bad_picture = CameraSizeSettings {
            preview_size: Some("1280x720".into()),
            picture_size: Some("huge".into()),
        };
        assert_eq!(bad_picture.size_pair(), None);
        assert_eq!(CameraSizeSettings::default().size_pair(), None);
    }

    #[test]
    fn test_user_size_by_facing() {
        let config = Config {
            front_camera: CameraSizeSettings {
                preview_size: Some("640x480".into()),
                picture_size: None,
            },
            ..Default::default()
        };
        assert_eq!(
            config.user_size_pair(LensFacing::Front).map(|c| c.preview),
            Some(Resolution::new(640, 480))
        );
        assert_eq!(config.user_size_pair(LensFacing::Back), None);
    }

    #[test]
    fn test_percentage_validation() {
        let mut prefs = ScanPreferences::default();
        assert!(prefs.validate().is_ok());
        prefs.reticle_width_percent = 0;
        assert!(matches!(prefs.validate(), Err(AppError::Config(_))));
    }
}
