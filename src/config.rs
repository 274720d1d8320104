use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::{Interpolation, LengthUnit, SortBy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

/// Interaction and presentation settings of a viewer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// HU added to the window width per pixel of horizontal drag.
    pub window_width_sensitivity: f64,
    /// HU added to the window level per pixel of vertical drag.
    pub window_level_sensitivity: f64,
    pub zoom_min: f64,
    pub zoom_max: f64,
    /// Relative zoom change per pixel of vertical drag; dragging up zooms in.
    pub zoom_drag_sensitivity: f64,
    pub wheel_zoom_in: f64,
    pub wheel_zoom_out: f64,
    pub label_char_width: f64,
    pub label_padding: f64,
    pub label_height: f64,
    pub length_unit: LengthUnit,
    pub sort_by: SortBy,
    pub mpr_interpolation: Interpolation,
    /// Manual correction applied on top of pixel spacing.
    pub calibration_factor: Option<f64>,
    /// Side of the square magnifier output, in pixels.
    pub magnifier_size: u32,
    pub magnifier_factor: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            window_width_sensitivity: 1.0,
            window_level_sensitivity: 1.0,
            zoom_min: 0.1,
            zoom_max: 5.0,
            zoom_drag_sensitivity: 0.01,
            wheel_zoom_in: 1.1,
            wheel_zoom_out: 0.9,
            label_char_width: 7.0,
            label_padding: 4.0,
            label_height: 20.0,
            length_unit: LengthUnit::Millimeter,
            sort_by: SortBy::InstanceNumber,
            mpr_interpolation: Interpolation::None,
            calibration_factor: None,
            magnifier_size: 160,
            magnifier_factor: 2,
        }
    }
}

impl ViewerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.zoom_min > 0.0 && self.zoom_min <= self.zoom_max) {
            return Err(ConfigError::Invalid("zoom range must satisfy 0 < zoom_min <= zoom_max"));
        }
        if !(self.wheel_zoom_in > 0.0 && self.wheel_zoom_out > 0.0) {
            return Err(ConfigError::Invalid("wheel zoom factors must be positive"));
        }
        if self.label_height <= 0.0 || self.label_char_width < 0.0 || self.label_padding < 0.0 {
            return Err(ConfigError::Invalid("label metrics must be non-negative"));
        }
        if self.magnifier_factor == 0 {
            return Err(ConfigError::Invalid("magnifier factor must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            ViewerConfig::from_json_str(r#"{ "zoom_max": 8.0, "length_unit": "Centimeter" }"#)
                .unwrap();
        assert_eq!(config.zoom_max, 8.0);
        assert_eq!(config.length_unit, LengthUnit::Centimeter);
        assert_eq!(config.zoom_min, 0.1);
        assert_eq!(config.wheel_zoom_out, 0.9);
    }

    #[test]
    fn test_invalid_zoom_range_rejected() {
        let err = ViewerConfig::from_json_str(r#"{ "zoom_min": 0.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_default_round_trips_through_json() {
        let json = serde_json::to_string(&ViewerConfig::default()).unwrap();
        assert_eq!(ViewerConfig::from_json_str(&json).unwrap(), ViewerConfig::default());
    }
}
