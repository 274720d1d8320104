use thiserror::Error;

use crate::measurement::MeasurementError;
use crate::provider::{PersistenceError, ProviderError};
use crate::slice::ImageId;
use crate::volume_loader::VolumeLoaderError;

/// Failure categories a viewer session can report. None of them is fatal to
/// the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ShapeMismatch,
    /// Too few slices, or slices without pixels, to build a volume.
    InsufficientData,
    DegenerateGeometry,
    OutOfRangeIndex,
    StaleResponse,
    PersistenceFailure,
    InvalidCalibration,
    ImageUnavailable,
    TaskFailure,
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error(transparent)]
    Volume(#[from] VolumeLoaderError),

    #[error(transparent)]
    Measurement(#[from] MeasurementError),

    #[error("Index {index} outside 0..{len}")]
    OutOfRangeIndex { index: i64, len: usize },

    #[error("Discarded response for {received}, current image is {expected:?}")]
    StaleResponse {
        expected: Option<ImageId>,
        received: ImageId,
    },

    #[error("Could not save changes: {0}")]
    PersistenceFailure(#[from] PersistenceError),

    #[error("Image unavailable: {0}")]
    Image(#[from] ProviderError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl ViewerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Volume(VolumeLoaderError::Provider(_)) => ErrorKind::ImageUnavailable,
            Self::Volume(VolumeLoaderError::NotEnoughSlices { .. } | VolumeLoaderError::EmptySlices) => {
                ErrorKind::InsufficientData
            }
            Self::Volume(_) => ErrorKind::ShapeMismatch,
            Self::Measurement(MeasurementError::InvalidCalibration { .. }) => {
                ErrorKind::InvalidCalibration
            }
            Self::Measurement(_) => ErrorKind::DegenerateGeometry,
            Self::OutOfRangeIndex { .. } => ErrorKind::OutOfRangeIndex,
            Self::StaleResponse { .. } => ErrorKind::StaleResponse,
            Self::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            Self::Image(_) => ErrorKind::ImageUnavailable,
            Self::Task(_) => ErrorKind::TaskFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err: ViewerError = VolumeLoaderError::ShapeMismatch {
            index: 1,
            expected: (2, 2),
            found: (3, 3),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);

        let err: ViewerError = VolumeLoaderError::NotEnoughSlices { found: 1 }.into();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
        let err: ViewerError = VolumeLoaderError::EmptySlices.into();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);

        let err: ViewerError = MeasurementError::DegenerateGeometry("zero-length distance").into();
        assert_eq!(err.kind(), ErrorKind::DegenerateGeometry);

        let err: ViewerError = PersistenceError::Rejected("nope".to_owned()).into();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(err.to_string(), "Could not save changes: Rejected by store: nope");
    }
}
