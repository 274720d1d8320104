use std::fmt;

use ndarray::{Array2, ArrayView2};
use thiserror::Error;

use crate::enums::PhotometricInterpretation;
use crate::intensity::{Rescale, WindowLevel};

/// Identifier of a single image (instance) as known to the data provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub String);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ImageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Physical size of one pixel step, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSpacing {
    pub x: f64,
    pub y: f64,
}

impl PixelSpacing {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x > 0.0 && self.y > 0.0
    }
}

impl Default for PixelSpacing {
    fn default() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

/// Metadata accompanying a decoded slice. Defaults are the values used when
/// the provider omits a field.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceMetadata {
    pub rows: usize,
    pub columns: usize,
    pub pixel_spacing: PixelSpacing,
    pub slice_thickness: f64,
    pub rescale: Rescale,
    pub window: WindowLevel,
    pub photometric_interpretation: PhotometricInterpretation,
    pub instance_number: Option<i32>,
    pub slice_position: Option<f64>,
}

impl Default for SliceMetadata {
    fn default() -> Self {
        Self {
            rows: 0,
            columns: 0,
            pixel_spacing: PixelSpacing::default(),
            slice_thickness: 1.0,
            rescale: Rescale::default(),
            window: WindowLevel::default(),
            photometric_interpretation: PhotometricInterpretation::default(),
            instance_number: None,
            slice_position: None,
        }
    }
}

#[derive(Debug, Error)]
#[error("sample buffer holds {found} values, expected {rows}x{columns}")]
pub struct SampleCountError {
    pub rows: usize,
    pub columns: usize,
    pub found: usize,
}

/// A decoded 2D grid of raw stored samples. Immutable once built.
#[derive(Debug, Clone)]
pub struct Slice {
    id: ImageId,
    metadata: SliceMetadata,
    samples: Array2<i32>,
}

impl Slice {
    /// Wraps a row-major sample buffer. `metadata.rows`/`columns` give the
    /// shape.
    pub fn new(
        id: ImageId,
        metadata: SliceMetadata,
        samples: Vec<i32>,
    ) -> Result<Self, SampleCountError> {
        let (rows, columns) = (metadata.rows, metadata.columns);
        let found = samples.len();
        let samples = Array2::from_shape_vec((rows, columns), samples).map_err(|_| {
            SampleCountError {
                rows,
                columns,
                found,
            }
        })?;
        Ok(Self {
            id,
            metadata,
            samples,
        })
    }

    pub fn from_array(id: ImageId, mut metadata: SliceMetadata, samples: Array2<i32>) -> Self {
        let (rows, columns) = samples.dim();
        metadata.rows = rows;
        metadata.columns = columns;
        Self {
            id,
            metadata,
            samples,
        }
    }

    pub fn id(&self) -> &ImageId {
        &self.id
    }

    pub fn metadata(&self) -> &SliceMetadata {
        &self.metadata
    }

    pub fn width(&self) -> usize {
        self.metadata.columns
    }

    pub fn height(&self) -> usize {
        self.metadata.rows
    }

    /// Raw samples, indexed `[row, column]`.
    pub fn samples(&self) -> ArrayView2<'_, i32> {
        self.samples.view()
    }

    pub fn raw_at(&self, x: usize, y: usize) -> Option<i32> {
        self.samples.get((y, x)).copied()
    }

    pub fn hu_at(&self, x: usize, y: usize) -> Option<f64> {
        self.raw_at(x, y).map(|raw| self.metadata.rescale.apply(raw))
    }

    /// Hounsfield values for the whole slice.
    pub fn hu(&self) -> Array2<f32> {
        let rescale = self.metadata.rescale;
        self.samples.mapv(|raw| rescale.apply(raw) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_sample_count() {
        let metadata = SliceMetadata {
            rows: 2,
            columns: 3,
            ..Default::default()
        };
        let err = Slice::new("a".into(), metadata, vec![0; 5]).unwrap_err();
        assert_eq!(err.found, 5);
    }

    #[test]
    fn test_hu_uses_rescale() {
        let metadata = SliceMetadata {
            rows: 1,
            columns: 2,
            rescale: Rescale::new(2.0, -1024.0),
            ..Default::default()
        };
        let slice = Slice::new("a".into(), metadata, vec![512, 1000]).unwrap();
        assert_eq!(slice.hu_at(0, 0), Some(0.0));
        assert_eq!(slice.hu_at(1, 0), Some(976.0));
        assert_eq!(slice.hu_at(2, 0), None);
    }

    #[test]
    fn test_metadata_defaults() {
        let metadata = SliceMetadata::default();
        assert_eq!(metadata.pixel_spacing, PixelSpacing::new(1.0, 1.0));
        assert_eq!(metadata.rescale, Rescale::new(1.0, -1024.0));
        assert_eq!(metadata.window, WindowLevel::new(40.0, 400.0));
    }
}
