use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    preprocess::{PreprocessOptions, MAX_CORRECTION_WINDOW, MAX_MARGIN, MAX_RESIZE_FACTOR},
    tesseract::OcrConfig,
    ConfigError,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub preprocess: PreprocessOptions,
    pub ocr: OcrConfig,
    /// Where to keep captures and lookups for inspection. Off when unset.
    pub debug_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Half the side of the square captured around the anchor.
    pub radius: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { radius: 150 }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_settings(self.capture.radius, &self.preprocess)
    }
}

/// Largest accepted capture radius.
pub const MAX_RADIUS: u32 = 1 << 15;

pub(crate) fn validate_settings(radius: u32, options: &PreprocessOptions) -> Result<(), ConfigError> {
    check_range("radius", radius, MAX_RADIUS)?;
    check_range("resize_factor", options.resize_factor, MAX_RESIZE_FACTOR)?;
    check_range(
        "correction_window",
        options.correction_window,
        MAX_CORRECTION_WINDOW,
    )?;
    if options.margin > MAX_MARGIN {
        return Err(ConfigError::Invalid(format!(
            "margin must be at most {MAX_MARGIN}, got {}",
            options.margin
        )));
    }
    Ok(())
}

fn check_range(name: &str, value: u32, max: u32) -> Result<(), ConfigError> {
    if !(1..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be between 1 and {max}, got {value}"
        )));
    }
    Ok(())
}
