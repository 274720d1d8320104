//! Conversion of stored samples to display intensities.
//!
//! Raw samples are first rescaled to Hounsfield units (`HU = raw * slope +
//! intercept`), then mapped linearly through the window
//! `[center - width / 2, center + width / 2]` onto `0..=255`. MONOCHROME1 data
//! is flipped, and the user invert flag flips again, so the two compose.

use image::{ImageBuffer, RgbaImage};
use ndarray::ArrayView2;
use rayon::prelude::*;

use crate::enums::{PhotometricInterpretation, WindowPreset};
use crate::slice::Slice;

/// Modality rescale from stored value to HU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Rescale {
    pub const IDENTITY: Rescale = Rescale {
        slope: 1.0,
        intercept: 0.0,
    };

    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    #[inline]
    pub fn apply(&self, raw: i32) -> f64 {
        f64::from(raw) * self.slope + self.intercept
    }
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: -1024.0,
        }
    }
}

/// Window center/width in HU. The width is never below 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowLevel {
    center: f64,
    width: f64,
}

impl WindowLevel {
    pub const MIN_WIDTH: f64 = 1.0;

    pub fn new(center: f64, width: f64) -> Self {
        Self {
            center,
            width: width.max(Self::MIN_WIDTH),
        }
    }

    /// Window spanning `[min, max]`.
    pub fn from_range(min: f64, max: f64) -> Self {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        Self::new((lo + hi) / 2.0, hi - lo)
    }

    pub fn preset(preset: WindowPreset) -> Self {
        match preset {
            WindowPreset::Brain => Self::new(40.0, 80.0),
            WindowPreset::Abdomen => Self::new(40.0, 400.0),
            WindowPreset::Lung => Self::new(-600.0, 1500.0),
            WindowPreset::Bone => Self::new(400.0, 1800.0),
            WindowPreset::Mediastinum => Self::new(50.0, 350.0),
        }
    }

    pub fn center(&self) -> f64 {
        self.center
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Shifts width and level by the given deltas, keeping width >= 1.
    pub fn adjusted(&self, width_delta: f64, level_delta: f64) -> Self {
        Self::new(self.center + level_delta, self.width + width_delta)
    }

    /// `(window_min, window_max)`
    pub fn bounds(&self) -> (f64, f64) {
        let half = self.width / 2.0;
        (self.center - half, self.center + half)
    }
}

impl Default for WindowLevel {
    fn default() -> Self {
        Self {
            center: 40.0,
            width: 400.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityTransformer {
    pub rescale: Rescale,
    pub window: WindowLevel,
    pub photometric: PhotometricInterpretation,
    pub invert: bool,
}

impl IntensityTransformer {
    pub fn new(
        rescale: Rescale,
        window: WindowLevel,
        photometric: PhotometricInterpretation,
        invert: bool,
    ) -> Self {
        Self {
            rescale,
            window,
            photometric,
            invert,
        }
    }

    /// Transformer for a slice using its own rescale and photometric
    /// interpretation with the given window.
    pub fn for_slice(slice: &Slice, window: WindowLevel, invert: bool) -> Self {
        let metadata = slice.metadata();
        Self::new(
            metadata.rescale,
            window,
            metadata.photometric_interpretation,
            invert,
        )
    }

    /// Transformer for values that are already in HU (volume planes and
    /// projections).
    pub fn for_hu(window: WindowLevel, invert: bool) -> Self {
        Self::new(
            Rescale::IDENTITY,
            window,
            PhotometricInterpretation::Monochrome2,
            invert,
        )
    }

    #[inline]
    pub fn hu(&self, raw: i32) -> f64 {
        self.rescale.apply(raw)
    }

    #[inline]
    pub fn display(&self, raw: i32) -> u8 {
        self.display_from_hu(self.hu(raw))
    }

    #[inline]
    pub fn display_from_hu(&self, hu: f64) -> u8 {
        let (window_min, window_max) = self.window.bounds();
        let mut value = if hu.is_nan() || hu <= window_min {
            0
        } else if hu >= window_max {
            255
        } else {
            ((hu - window_min) / (window_max - window_min) * 255.0)
                .round()
                .clamp(0.0, 255.0) as u8
        };
        if self.photometric == PhotometricInterpretation::Monochrome1 {
            value = 255 - value;
        }
        if self.invert {
            value = 255 - value;
        }
        value
    }

    /// Windowed RGBA raster of a grid of HU values laid out `[row, column]`.
    pub fn render_hu(&self, values: ArrayView2<'_, f32>) -> Option<RgbaImage> {
        let (height, width) = values.dim();
        let values = values.as_standard_layout();
        let source = values.as_slice()?;
        let mut rgba = vec![0u8; source.len() * 4];
        rgba.par_chunks_mut(4)
            .zip(source.par_iter())
            .for_each(|(pixel, &hu)| {
                let gray = self.display_from_hu(f64::from(hu));
                pixel.copy_from_slice(&[gray, gray, gray, 255]);
            });
        ImageBuffer::from_raw(width as u32, height as u32, rgba)
    }

    /// Windowed RGBA raster of raw stored samples.
    pub fn render_raw(&self, samples: ArrayView2<'_, i32>) -> Option<RgbaImage> {
        let (height, width) = samples.dim();
        let samples = samples.as_standard_layout();
        let source = samples.as_slice()?;
        let mut rgba = vec![0u8; source.len() * 4];
        rgba.par_chunks_mut(4)
            .zip(source.par_iter())
            .for_each(|(pixel, &raw)| {
                let gray = self.display(raw);
                pixel.copy_from_slice(&[gray, gray, gray, 255]);
            });
        ImageBuffer::from_raw(width as u32, height as u32, rgba)
    }

    pub fn render_slice(&self, slice: &Slice) -> Option<RgbaImage> {
        self.render_raw(slice.samples())
    }
}
