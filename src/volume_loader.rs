use crate::enums::SortBy;
use crate::provider::{DicomFileProvider, ProviderError, SeriesEntry};
use crate::slice::{Slice, SliceMetadata};
use crate::volume::Volume;

use log::{info, warn};
use ndarray::{Array3, s};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;
use web_time::Instant;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("A volume needs at least 2 slices, got {found}")]
    NotEnoughSlices { found: usize },

    #[error("Slice {index} is {found:?} (rows, columns), expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Slices contain no pixels")]
    EmptySlices,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Non-fatal conditions met while building a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderWarning {
    /// Some slices lack the ordering attribute; input order was kept.
    MissingOrderMetadata { sort_by: SortBy, missing: usize },
}

#[derive(Debug)]
pub struct LoadedVolume {
    pub volume: Volume,
    pub warnings: Vec<LoaderWarning>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Build a volume from decoded slices
    ///
    /// # Arguments
    ///
    /// * `slices` - Decoded slices of one series, in enumeration order
    /// * `sort_by` - Metadata used to order the slices
    ///
    /// # Errors
    ///
    /// Returns error if fewer than 2 slices are given or their dimensions
    /// differ
    pub fn load_from_slices<S: Borrow<Slice>>(
        slices: &[S],
        sort_by: SortBy,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        let start = Instant::now();
        if slices.len() < 2 {
            return Err(VolumeLoaderError::NotEnoughSlices {
                found: slices.len(),
            });
        }

        let mut ordered: Vec<&Slice> = slices.iter().map(Borrow::borrow).collect();
        let mut warnings = Vec::new();
        if let Some(warning) = Self::sort_slices(&mut ordered, sort_by) {
            warn!("{warning:?}; keeping input order");
            warnings.push(warning);
        }

        Self::validate_dimensions(&ordered)?;

        let data = Self::build_volume_array(&ordered);
        let spacing = Self::get_spacing(&ordered);
        let slice_ids = ordered.iter().map(|slice| slice.id().clone()).collect();
        let volume = Volume::new(data, spacing, slice_ids);

        info!(
            "Built volume {:?} (x, y, z) spacing {:?} in {:?}",
            volume.dims_xyz(),
            volume.spacing,
            start.elapsed()
        );
        Ok(LoadedVolume { volume, warnings })
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        let (provider, entries) = DicomFileProvider::open_directory(path)?;
        let slices = entries
            .iter()
            .map(|entry| provider.read_slice(&entry.id))
            .collect::<Result<Vec<_>, _>>()?;
        Self::load_from_slices(&slices, sort_by)
    }

    /// Ordering key of a slice, if its metadata carries one.
    pub fn order_key(metadata: &SliceMetadata, sort_by: SortBy) -> Option<f64> {
        match sort_by {
            SortBy::InstanceNumber => metadata.instance_number.map(f64::from),
            SortBy::SlicePosition => metadata.slice_position,
            SortBy::None => Some(0.0),
        }
    }

    fn series_key(entry: &SeriesEntry, sort_by: SortBy) -> Option<f64> {
        match sort_by {
            SortBy::InstanceNumber => entry.instance_number.map(f64::from),
            SortBy::SlicePosition => entry.slice_position,
            SortBy::None => Some(0.0),
        }
    }

    /// Orders a series listing ascending by `sort_by`. Entries keep their
    /// given order when any of them lacks the key.
    pub fn sort_series(entries: &mut [SeriesEntry], sort_by: SortBy) -> Option<LoaderWarning> {
        Self::sort_by_key(entries, sort_by, |entry| Self::series_key(entry, sort_by))
    }

    fn sort_slices(slices: &mut [&Slice], sort_by: SortBy) -> Option<LoaderWarning> {
        Self::sort_by_key(slices, sort_by, |slice| {
            Self::order_key(slice.metadata(), sort_by)
        })
    }

    fn sort_by_key<T>(
        items: &mut [T],
        sort_by: SortBy,
        key: impl Fn(&T) -> Option<f64>,
    ) -> Option<LoaderWarning> {
        if matches!(sort_by, SortBy::None) {
            return None;
        }
        let missing = items.iter().filter(|item| key(*item).is_none()).count();
        if missing > 0 {
            return Some(LoaderWarning::MissingOrderMetadata { sort_by, missing });
        }
        // stable, so equal keys keep input order
        items.sort_by(|a, b| {
            key(a)
                .partial_cmp(&key(b))
                .unwrap_or(Ordering::Equal)
        });
        None
    }

    fn validate_dimensions(slices: &[&Slice]) -> Result<(), VolumeLoaderError> {
        let expected = (slices[0].height(), slices[0].width());
        if expected.0 == 0 || expected.1 == 0 {
            return Err(VolumeLoaderError::EmptySlices);
        }
        match slices
            .iter()
            .position(|slice| (slice.height(), slice.width()) != expected)
        {
            Some(index) => Err(VolumeLoaderError::ShapeMismatch {
                index,
                expected,
                found: (slices[index].height(), slices[index].width()),
            }),
            None => Ok(()),
        }
    }

    fn build_volume_array(slices: &[&Slice]) -> Array3<f32> {
        let (height, width) = (slices[0].height(), slices[0].width());
        let depth = slices.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.hu());
        }

        volume
    }

    /// In-plane spacing of the first slice; z spacing from the distance of
    /// the first two slice positions, falling back to slice thickness.
    fn get_spacing(slices: &[&Slice]) -> (f32, f32, f32) {
        let first = slices[0].metadata();
        let position_gap = match (first.slice_position, slices[1].metadata().slice_position) {
            (Some(a), Some(b)) if (b - a).abs() > f64::EPSILON => Some((b - a).abs()),
            _ => None,
        };
        let z = position_gap
            .or(Some(first.slice_thickness).filter(|t| t.is_finite() && *t > 0.0))
            .unwrap_or(1.0);

        (
            first.pixel_spacing.x as f32,
            first.pixel_spacing.y as f32,
            z as f32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intensity::Rescale;
    use crate::slice::{ImageId, PixelSpacing};
    use ndarray::Array2;

    fn slice(id: &str, instance: Option<i32>, rows: usize, columns: usize, fill: i32) -> Slice {
        let metadata = SliceMetadata {
            rows,
            columns,
            rescale: Rescale::IDENTITY,
            pixel_spacing: PixelSpacing::new(0.5, 0.7),
            slice_thickness: 2.0,
            instance_number: instance,
            ..Default::default()
        };
        Slice::from_array(ImageId::from(id), metadata, Array2::from_elem((rows, columns), fill))
    }

    #[test]
    fn test_requires_two_slices() {
        let err = VolumeLoader::load_from_slices(&[slice("a", Some(1), 2, 2, 0)], SortBy::default())
            .unwrap_err();
        assert!(matches!(err, VolumeLoaderError::NotEnoughSlices { found: 1 }));
    }

    #[test]
    fn test_shape_mismatch() {
        let slices = vec![
            slice("a", Some(1), 2, 2, 0),
            slice("b", Some(2), 2, 3, 0),
        ];
        let err = VolumeLoader::load_from_slices(&slices, SortBy::InstanceNumber).unwrap_err();
        assert!(matches!(
            err,
            VolumeLoaderError::ShapeMismatch {
                index: 1,
                expected: (2, 2),
                found: (2, 3)
            }
        ));
    }

    #[test]
    fn test_sorted_by_instance_number() {
        let slices = vec![
            slice("c", Some(3), 2, 2, 30),
            slice("a", Some(1), 2, 2, 10),
            slice("b", Some(2), 2, 2, 20),
        ];
        let loaded = VolumeLoader::load_from_slices(&slices, SortBy::InstanceNumber).unwrap();
        assert!(loaded.warnings.is_empty());
        let volume = loaded.volume;
        assert_eq!(volume.dims_xyz(), (2, 2, 3));
        assert_eq!(volume.extract_axial(0)[[0, 0]], 10.0);
        assert_eq!(volume.extract_axial(2)[[1, 1]], 30.0);
        let ids: Vec<_> = volume.slice_ids().iter().map(|id| id.0.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(volume.spacing, (0.5, 0.7, 2.0));
    }

    #[test]
    fn test_missing_order_metadata_keeps_input_order() {
        let slices = vec![
            slice("b", Some(2), 2, 2, 20),
            slice("a", None, 2, 2, 10),
        ];
        let loaded = VolumeLoader::load_from_slices(&slices, SortBy::InstanceNumber).unwrap();
        assert_eq!(
            loaded.warnings,
            vec![LoaderWarning::MissingOrderMetadata {
                sort_by: SortBy::InstanceNumber,
                missing: 1
            }]
        );
        assert_eq!(loaded.volume.extract_axial(0)[[0, 0]], 20.0);
    }

    #[test]
    fn test_volume_stores_hu_per_slice_rescale() {
        let mut a = slice("a", Some(1), 1, 1, 100);
        let b = slice("b", Some(2), 1, 1, 100);
        let mut metadata = a.metadata().clone();
        metadata.rescale = Rescale::new(2.0, -1024.0);
        a = Slice::from_array(a.id().clone(), metadata, a.samples().to_owned());
        let volume = VolumeLoader::load_from_slices(&[a, b], SortBy::InstanceNumber)
            .unwrap()
            .volume;
        assert_eq!(volume.voxel(0, 0, 0), Some(-824.0));
        assert_eq!(volume.voxel(0, 0, 1), Some(100.0));
    }

    #[test]
    fn test_z_spacing_from_positions() {
        let mut slices = vec![slice("a", Some(1), 1, 1, 0), slice("b", Some(2), 1, 1, 0)];
        for (i, s) in slices.iter_mut().enumerate() {
            let mut metadata = s.metadata().clone();
            metadata.slice_position = Some(i as f64 * 1.25);
            *s = Slice::from_array(s.id().clone(), metadata, s.samples().to_owned());
        }
        let volume = VolumeLoader::load_from_slices(&slices, SortBy::SlicePosition)
            .unwrap()
            .volume;
        assert_eq!(volume.spacing.2, 1.25);
    }

    #[test]
    fn test_sort_series() {
        let mut entries = vec![
            SeriesEntry::new("b", Some(2), None),
            SeriesEntry::new("a", Some(1), None),
        ];
        assert!(VolumeLoader::sort_series(&mut entries, SortBy::InstanceNumber).is_none());
        assert_eq!(entries[0].id, ImageId::from("a"));
    }
}
