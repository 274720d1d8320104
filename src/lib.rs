//! # DICOM viewport library
//!
//! This crate implements the image-processing and interaction core of a
//! cross-sectional (CT) DICOM viewer, independent of any UI toolkit.
//!
//! A series of decoded slices can be:
//!  - windowed into 8-bit RGBA rasters ([`IntensityTransformer`])
//!  - stacked into a volume of Hounsfield units ([`VolumeLoader`]) and
//!    resliced along the three medical axes:
//!     - Axial
//!     - Coronal
//!     - Sagittal
//!  - projected along an axis as maximum, minimum or mean intensity
//!  - measured in calibrated millimetres ([`MeasurementEngine`])
//!
//! Interaction state (pan, zoom, rotation, tools, annotations) lives in a
//! [`ViewerSession`], which talks to an [`ImageProvider`] and a
//! [`MeasurementStore`] through futures and applies their results one
//! message at a time.
//!
//! Coronal and sagittal planes can be resampled to preserve the physical
//! aspect ratio of the voxels. DICOM files are assumed to have the following
//! attributes:
//!   - Axial data set (only coronal and sagittal planes are interpolated)
//!   - No multiframe (always the first frame is used)
//!   - Images from the same series and acquisition
//!
//! # Roadmap
//!
//!  - Trilinear interpolation
//!  - Oblique reslicing
//!
//! # Examples
//!
//! ## Reading multiple DICOM files into a volume
//!
//! To read all DICOM files from the dicom/ directory, sort them by
//! InstanceNumber. Then render the image at the center of the volume in the
//! Sagittal axis with a bone window.
//!
//! ```no_run
//! # use dicom_viewport::{
//! #     IntensityTransformer, Interpolation, Orientation, Processor, SortBy, VolumeLoader,
//! #     WindowLevel, WindowPreset,
//! # };
//! let loaded = VolumeLoader::load_from_directory("dicom", SortBy::InstanceNumber)
//!     .expect("should have loaded files from directory");
//! let volume = loaded.volume;
//! let transformer = IntensityTransformer::for_hu(WindowLevel::preset(WindowPreset::Bone), false);
//! let image = volume
//!     .get_image_from_axis(
//!         volume.dims_xyz().0 / 2,
//!         Orientation::Sagittal,
//!         Interpolation::Bilinear(Processor::CPU),
//!         &transformer,
//!     )
//!     .expect("should have returned image at center of volume");
//! image.save("result.png").expect("should have written the image");
//! ```

pub mod annotation;
pub mod config;
pub mod coords;
pub mod display;
pub mod enums;
pub mod error;
pub mod intensity;
mod interpolator;
pub mod measurement;
mod projection;
pub mod provider;
pub mod session;
pub mod slice;
pub mod tool;
pub mod volume;
pub mod volume_loader;

pub use config::ViewerConfig;
pub use coords::{CoordinateMapper, Point, Size};
pub use enums::{
    Interpolation, LengthUnit, Orientation, PhotometricInterpretation, Processor,
    ProjectionMode, SortBy, WindowPreset,
};
pub use error::{ErrorKind, ViewerError};
pub use intensity::{IntensityTransformer, Rescale, WindowLevel};
pub use measurement::{MeasurementEngine, MeasurementKind};
pub use provider::{ImageProvider, MeasurementStore};
pub use session::ViewerSession;
pub use slice::{ImageId, Slice, SliceMetadata};
pub use volume::Volume;
pub use volume_loader::VolumeLoader;
