use serde::{Deserialize, Serialize};

/// The three orthogonal planes of a volume. Also names the projection
/// direction of a MIP: `Axial` projects along z (superior view), `Coronal`
/// along y (anterior view) and `Sagittal` along x (lateral view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Bilinear(Processor),
    // TODO: trilinear resampling for oblique planes
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Processor {
    CPU,
}

/// Ordering key used when assembling a slice stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortBy {
    #[default]
    InstanceNumber,
    SlicePosition,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhotometricInterpretation {
    Monochrome1,
    #[default]
    Monochrome2,
}

impl PhotometricInterpretation {
    /// Parses the DICOM code string. Anything that is not MONOCHROME1 is
    /// rendered as MONOCHROME2.
    pub fn from_code(code: &str) -> Self {
        if code.trim().eq_ignore_ascii_case("MONOCHROME1") {
            Self::Monochrome1
        } else {
            Self::Monochrome2
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthUnit {
    #[default]
    Millimeter,
    Centimeter,
}

impl LengthUnit {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Millimeter => "mm",
            Self::Centimeter => "cm",
        }
    }

    /// Divisor applied to a length in millimetres.
    pub fn length_divisor(self) -> f64 {
        match self {
            Self::Millimeter => 1.0,
            Self::Centimeter => 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectionMode {
    #[default]
    Maximum,
    Minimum,
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPreset {
    Brain,
    Abdomen,
    Lung,
    Bone,
    Mediastinum,
}
