//! Solver configuration.
//!
//! Defaults reproduce the behaviour expected by the rest of the crate, so most
//! callers never build a [`ProjectionConfig`] themselves. It can be loaded from
//! YAML or JSON to tune the inverse solve in batch jobs.

use crate::camera::CameraModelError;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Options of the per-point least-squares inverse (undistortion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortOptions {
    /// Levenberg-Marquardt iteration cap for a single point.
    pub max_iterations: usize,
    /// Largest accepted pixel residual `|distort(p) - observed|` after the solve.
    pub tolerance_px: f64,
    /// Absolute cost decrease below which the solver stops.
    pub min_abs_decrease: f64,
    /// Relative cost decrease below which the solver stops.
    pub min_rel_decrease: f64,
}

impl Default for UndistortOptions {
    fn default() -> Self {
        UndistortOptions {
            max_iterations: 100,
            tolerance_px: 1e-3,
            min_abs_decrease: 1e-14,
            min_rel_decrease: 1e-12,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub undistort: UndistortOptions,
}

impl ProjectionConfig {
    /// Loads a configuration, choosing JSON for `.json` files and YAML otherwise.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`] if the file cannot be read.
    /// * [`CameraModelError::YamlError`] / [`CameraModelError::JsonError`] on malformed content.
    /// * [`CameraModelError::InvalidParams`] if a value is out of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CameraModelError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: ProjectionConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        config.validate()?;
        info!("Loaded projection config from {}", path.display());
        Ok(config)
    }

    pub fn save_to_yaml(&self, path: impl AsRef<Path>) -> Result<(), CameraModelError> {
        let yaml_string = serde_yaml::to_string(self)?;
        let mut file = fs::File::create(path.as_ref())?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CameraModelError> {
        if self.undistort.max_iterations == 0 {
            return Err(CameraModelError::InvalidParams(
                "undistort.max_iterations must be positive".to_string(),
            ));
        }
        if !(self.undistort.tolerance_px > 0.0) {
            return Err(CameraModelError::InvalidParams(
                "undistort.tolerance_px must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
