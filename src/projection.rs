//! Intensity projections through a [`Volume`].
//!
//! Every call scans all voxels along the projection axis; nothing is cached
//! between calls. The output plane has the same shape as the orthogonal plane
//! of the same orientation.

use log::info;
use ndarray::{Array2, Axis, Zip};
use web_time::Instant;

use crate::enums::{Orientation, ProjectionMode};
use crate::volume::Volume;

impl Volume {
    fn projection_axis(orientation: Orientation) -> Axis {
        match orientation {
            Orientation::Axial => Axis(0),
            Orientation::Coronal => Axis(1),
            Orientation::Sagittal => Axis(2),
        }
    }

    /// Projects the volume along the normal of `orientation`.
    pub fn project(&self, orientation: Orientation, mode: ProjectionMode) -> Array2<f32> {
        let start = Instant::now();
        let axis = Self::projection_axis(orientation);
        let (depth, height, width) = self.dim();
        let shape = match orientation {
            Orientation::Axial => (height, width),
            Orientation::Coronal => (depth, width),
            Orientation::Sagittal => (depth, height),
        };

        let mut projection = Array2::<f32>::zeros(shape);
        Zip::from(&mut projection)
            .and(self.data.lanes(axis))
            .par_for_each(|out, ray| {
                *out = match mode {
                    ProjectionMode::Maximum => ray.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v)),
                    ProjectionMode::Minimum => ray.fold(f32::INFINITY, |acc, &v| acc.min(v)),
                    ProjectionMode::Mean => {
                        if ray.is_empty() {
                            0.0
                        } else {
                            ray.sum() / ray.len() as f32
                        }
                    }
                };
            });

        info!(
            "{mode:?} projection along {orientation:?} ({}x{}) in {:?}",
            shape.1,
            shape.0,
            start.elapsed()
        );
        projection
    }

    /// Maximum intensity projection.
    pub fn project_mip(&self, orientation: Orientation) -> Array2<f32> {
        self.project(orientation, ProjectionMode::Maximum)
    }

    /// MIP along z, viewed from above.
    pub fn project_superior(&self) -> Array2<f32> {
        self.project_mip(Orientation::Axial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume_with_peak(peak: (usize, usize, usize)) -> Volume {
        let mut data = Array3::from_shape_fn((4, 6, 5), |(z, y, x)| ((x + y + z) % 7) as f32);
        data[peak] = 1000.0;
        Volume::new(data, (1.0, 1.0, 1.0), Vec::new())
    }

    #[test]
    fn test_superior_mip_peak_only_at_voxel_xy() {
        // (z, y, x)
        let volume = volume_with_peak((2, 4, 1));
        let mip = volume.project_superior();
        assert_eq!(mip.dim(), (6, 5));
        let peaks: Vec<_> = mip
            .indexed_iter()
            .filter(|(_, v)| **v == 1000.0)
            .map(|(index, _)| index)
            .collect();
        assert_eq!(peaks, vec![(4, 1)]);
    }

    #[test]
    fn test_mip_shapes_match_planes() {
        let volume = volume_with_peak((0, 0, 0));
        assert_eq!(
            volume.project_mip(Orientation::Coronal).dim(),
            volume.extract_coronal(0).dim()
        );
        assert_eq!(
            volume.project_mip(Orientation::Sagittal).dim(),
            volume.extract_sagittal(0).dim()
        );
    }

    #[test]
    fn test_mip_matches_brute_force() {
        let volume = volume_with_peak((3, 5, 4));
        let mip = volume.project_mip(Orientation::Sagittal);
        let (depth, height, width) = volume.dim();
        for z in 0..depth {
            for y in 0..height {
                let expected = (0..width)
                    .map(|x| volume.data[(z, y, x)])
                    .fold(f32::NEG_INFINITY, f32::max);
                assert_eq!(mip[(z, y)], expected);
            }
        }
    }

    #[test]
    fn test_min_and_mean_projection() {
        let data = Array3::from_shape_fn((2, 1, 1), |(z, _, _)| if z == 0 { -10.0 } else { 30.0 });
        let volume = Volume::new(data, (1.0, 1.0, 1.0), Vec::new());
        assert_eq!(volume.project(Orientation::Axial, ProjectionMode::Minimum)[(0, 0)], -10.0);
        assert_eq!(volume.project(Orientation::Axial, ProjectionMode::Mean)[(0, 0)], 10.0);
    }
}
