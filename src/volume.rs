use crate::enums::{Interpolation, Orientation};
use crate::intensity::IntensityTransformer;
use crate::interpolator::Interpolator;
use crate::slice::ImageId;

use image::RgbaImage;
use log::debug;
use ndarray::{Array2, Array3, ArrayView2, s};

/// A stack of same-shaped slices as a voxel grid of HU values.
///
/// The data is laid out `(depth, height, width)` in standard order, so the
/// flat index of voxel `(x, y, z)` is `z * W * H + y * W + x`.
#[derive(Debug, Clone, Default)]
pub struct Volume {
    pub data: Array3<f32>,
    /// Voxel spacing `(x, y, z)` in mm.
    pub spacing: (f32, f32, f32),
    pub interpolated_dim: (usize, usize, usize),
    slice_ids: Vec<ImageId>,
}

impl Volume {
    pub fn new(data: Array3<f32>, spacing: (f32, f32, f32), slice_ids: Vec<ImageId>) -> Self {
        let original_dim = data.dim();
        Self {
            data,
            spacing,
            interpolated_dim: Interpolator::get_isotropic_dimensions(spacing, original_dim),
            slice_ids,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get the dimensions as `(x, y, z)`, i.e. (width, height, depth)
    pub fn dims_xyz(&self) -> (usize, usize, usize) {
        let (depth, height, width) = self.data.dim();
        (width, height, depth)
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Ids of the slices in volume order.
    pub fn slice_ids(&self) -> &[ImageId] {
        &self.slice_ids
    }

    /// Flat voxel index of `(x, y, z)`.
    pub fn voxel_index(&self, x: usize, y: usize, z: usize) -> usize {
        let (_, height, width) = self.data.dim();
        z * width * height + y * width + x
    }

    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Option<f32> {
        self.data.get((z, y, x)).copied()
    }

    /// Number of planes available along the given orientation.
    pub fn axis_len(&self, orientation: Orientation) -> usize {
        let (depth, height, width) = self.data.dim();
        match orientation {
            Orientation::Axial => depth,
            Orientation::Coronal => height,
            Orientation::Sagittal => width,
        }
    }

    /// Clamps an index to the valid plane range of `orientation`.
    pub fn clamp_index(&self, index: usize, orientation: Orientation) -> usize {
        let last = self.axis_len(orientation).saturating_sub(1);
        if index > last {
            debug!("{orientation:?} index {index} clamped to {last}");
        }
        index.min(last)
    }

    /// Plane of `orientation` at `index`, clamped to the valid range.
    ///
    /// Axial planes are `(height, width)`, coronal planes `(depth, width)`
    /// and sagittal planes `(depth, height)`, all indexed `[row, column]`.
    pub fn get_slice_from_axis(&self, index: usize, orientation: Orientation) -> ArrayView2<'_, f32> {
        let index = self.clamp_index(index, orientation);
        match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![.., .., index]),
        }
    }

    pub fn extract_axial(&self, index: usize) -> ArrayView2<'_, f32> {
        self.get_slice_from_axis(index, Orientation::Axial)
    }

    pub fn extract_sagittal(&self, index: usize) -> ArrayView2<'_, f32> {
        self.get_slice_from_axis(index, Orientation::Sagittal)
    }

    pub fn extract_coronal(&self, index: usize) -> ArrayView2<'_, f32> {
        self.get_slice_from_axis(index, Orientation::Coronal)
    }

    /// Output `(height, width)` of an aspect-corrected plane.
    fn get_output_dimensions(&self, orientation: Orientation) -> (usize, usize) {
        let (depth, height, width) = self.interpolated_dim;
        match orientation {
            // Looking down Z-axis: X is width, Y is height
            Orientation::Axial => (height, width),
            // Looking down Y-axis: X is width, Z is height
            Orientation::Coronal => (depth, width),
            // Looking down X-axis: Y is width, Z is height
            Orientation::Sagittal => (depth, height),
        }
    }

    /// The plane at `index`, resampled for physical aspect ratio when
    /// requested. Axial planes are never resampled.
    pub fn plane(
        &self,
        index: usize,
        orientation: Orientation,
        interpolation: Interpolation,
    ) -> Array2<f32> {
        let slice = self.get_slice_from_axis(index, orientation);
        match interpolation {
            Interpolation::None => slice.to_owned(),
            Interpolation::Bilinear(_) if matches!(orientation, Orientation::Axial) => {
                slice.to_owned()
            }
            Interpolation::Bilinear(_) => {
                let (height, width) = self.get_output_dimensions(orientation);
                Interpolator::resample(&slice, height, width)
            }
        }
    }

    /// Windowed raster of the plane at `index`.
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        interpolation: Interpolation,
        transformer: &IntensityTransformer,
    ) -> Option<RgbaImage> {
        let plane = self.plane(index, orientation, interpolation);
        transformer.render_hu(plane.view())
    }

    /// Smallest and largest HU in the volume.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.data.iter().copied().fold(None, |acc, value| match acc {
            None => Some((value, value)),
            Some((min, max)) => Some((min.min(value), max.max(value))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Processor;
    use crate::intensity::WindowLevel;

    /// Voxel value encodes its position: `z * 100 + y * 10 + x`.
    fn coded_volume() -> Volume {
        let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        Volume::new(data, (1.0, 1.0, 2.0), Vec::new())
    }

    #[test]
    fn test_dims_xyz() {
        assert_eq!(coded_volume().dims_xyz(), (5, 4, 3));
    }

    #[test]
    fn test_flat_layout() {
        let volume = coded_volume();
        let flat = volume.data.as_slice().unwrap();
        let index = volume.voxel_index(2, 3, 1);
        assert_eq!(index, 1 * 5 * 4 + 3 * 5 + 2);
        assert_eq!(flat[index], 132.0);
    }

    #[test]
    fn test_extract_shapes_and_values() {
        let volume = coded_volume();

        let axial = volume.extract_axial(1);
        assert_eq!(axial.dim(), (4, 5));
        assert_eq!(axial[[2, 3]], 123.0);

        let sagittal = volume.extract_sagittal(4);
        assert_eq!(sagittal.dim(), (3, 4));
        assert_eq!(sagittal[[2, 1]], 214.0);

        let coronal = volume.extract_coronal(2);
        assert_eq!(coronal.dim(), (3, 5));
        assert_eq!(coronal[[1, 3]], 123.0);
    }

    #[test]
    fn test_out_of_range_index_clamps() {
        let volume = coded_volume();
        assert_eq!(volume.extract_axial(99), volume.extract_axial(2));
        assert_eq!(volume.extract_sagittal(99), volume.extract_sagittal(4));
        assert_eq!(volume.extract_coronal(99), volume.extract_coronal(3));
    }

    #[test]
    fn test_bilinear_plane_preserves_aspect() {
        let volume = coded_volume();
        let plane = volume.plane(0, Orientation::Coronal, Interpolation::Bilinear(Processor::CPU));
        // depth 3 at 2mm becomes 6 rows at 1mm
        assert_eq!(plane.dim(), (6, 5));
        let axial = volume.plane(0, Orientation::Axial, Interpolation::Bilinear(Processor::CPU));
        assert_eq!(axial.dim(), (4, 5));
    }

    #[test]
    fn test_get_image_from_axis() {
        let volume = coded_volume();
        let transformer = IntensityTransformer::for_hu(WindowLevel::from_range(0.0, 255.0), false);
        let image = volume
            .get_image_from_axis(0, Orientation::Sagittal, Interpolation::None, &transformer)
            .unwrap();
        assert_eq!(image.dimensions(), (4, 3));
    }

    #[test]
    fn test_value_range() {
        assert_eq!(coded_volume().value_range(), Some((0.0, 234.0)));
    }
}
