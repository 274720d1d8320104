//! Collaborators outside the viewer core: where decoded images come from,
//! where measurements and annotations are persisted, and how annotation text
//! is obtained.
//!
//! Async operations return boxed `'static` futures so the session can run
//! them as detached tasks and receive their results as messages.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use dicom::object::{DefaultDicomObject, OpenFileOptions, open_file};
use dicom::pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption};
use dicom_dictionary_std::tags;
use futures::FutureExt;
use futures::future::{BoxFuture, ready};
use log::debug;
use ndarray::s;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coords::Point;
use crate::enums::PhotometricInterpretation;
use crate::intensity::{Rescale, WindowLevel};
use crate::measurement::MeasurementKind;
use crate::slice::{ImageId, PixelSpacing, SampleCountError, Slice, SliceMetadata};

/// Identifier assigned by the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Display parameters forwarded with an image request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub window_width: f64,
    pub window_level: f64,
    pub inverted: bool,
}

impl RenderParams {
    pub fn new(window: WindowLevel, inverted: bool) -> Self {
        Self {
            window_width: window.width(),
            window_level: window.center(),
            inverted,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown image {0}")]
    UnknownImage(ImageId),

    #[error("No DICOM images found")]
    NoImages,

    #[error(transparent)]
    Samples(#[from] SampleCountError),

    #[error("Failed to decode pixel data: {0}")]
    Decode(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("Rejected by store: {0}")]
    Rejected(String),

    #[error("Unknown record {0}")]
    UnknownRecord(RecordId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// One entry of a series listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesEntry {
    pub id: ImageId,
    pub instance_number: Option<i32>,
    pub slice_position: Option<f64>,
}

impl SeriesEntry {
    pub fn new(id: impl Into<ImageId>, instance_number: Option<i32>, slice_position: Option<f64>) -> Self {
        Self {
            id: id.into(),
            instance_number,
            slice_position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub image_id: String,
    #[serde(rename = "type")]
    pub kind: MeasurementKind,
    pub coordinates: Vec<[f64; 2]>,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub image_id: String,
    pub x: f64,
    pub y: f64,
    pub text: String,
}

pub trait ImageProvider: Send + Sync {
    fn fetch(&self, id: &ImageId, params: RenderParams) -> BoxFuture<'static, Result<Slice, ProviderError>>;
}

pub trait MeasurementStore: Send + Sync {
    fn create_measurement(
        &self,
        record: MeasurementRecord,
    ) -> BoxFuture<'static, Result<RecordId, PersistenceError>>;

    fn delete_measurement(&self, id: RecordId) -> BoxFuture<'static, Result<(), PersistenceError>>;

    fn create_annotation(
        &self,
        record: AnnotationRecord,
    ) -> BoxFuture<'static, Result<RecordId, PersistenceError>>;

    fn move_annotation(
        &self,
        id: RecordId,
        position: Point,
    ) -> BoxFuture<'static, Result<(), PersistenceError>>;

    fn delete_annotation(&self, id: RecordId) -> BoxFuture<'static, Result<(), PersistenceError>>;

    /// Removes every measurement and annotation of an image.
    fn clear_image(&self, image_id: &ImageId) -> BoxFuture<'static, Result<(), PersistenceError>>;
}

/// Asks the user for annotation text. `None` cancels the annotation.
pub trait TextPrompt: Send {
    fn annotation_text(&mut self, anchor: Point) -> Option<String>;
}

impl<F> TextPrompt for F
where
    F: FnMut(Point) -> Option<String> + Send,
{
    fn annotation_text(&mut self, anchor: Point) -> Option<String> {
        self(anchor)
    }
}

/// Provider over already-decoded slices.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    slices: HashMap<ImageId, Slice>,
    order: Vec<ImageId>,
}

impl InMemoryProvider {
    pub fn new(slices: impl IntoIterator<Item = Slice>) -> Self {
        let mut provider = Self::default();
        for slice in slices {
            provider.insert(slice);
        }
        provider
    }

    pub fn insert(&mut self, slice: Slice) {
        let id = slice.id().clone();
        if self.slices.insert(id.clone(), slice).is_none() {
            self.order.push(id);
        }
    }

    /// Listing in insertion order.
    pub fn series(&self) -> Vec<SeriesEntry> {
        self.order
            .iter()
            .filter_map(|id| self.slices.get(id))
            .map(|slice| {
                let metadata = slice.metadata();
                SeriesEntry::new(
                    slice.id().clone(),
                    metadata.instance_number,
                    metadata.slice_position,
                )
            })
            .collect()
    }
}

impl ImageProvider for InMemoryProvider {
    fn fetch(&self, id: &ImageId, _params: RenderParams) -> BoxFuture<'static, Result<Slice, ProviderError>> {
        let result = self
            .slices
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownImage(id.clone()));
        ready(result).boxed()
    }
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    measurements: BTreeMap<RecordId, MeasurementRecord>,
    annotations: BTreeMap<RecordId, AnnotationRecord>,
}

/// Store keeping records in memory. Writes can be made to fail to exercise
/// error paths.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn measurements(&self) -> Vec<(RecordId, MeasurementRecord)> {
        self.with_state(|state| {
            Ok(state
                .measurements
                .iter()
                .map(|(id, record)| (*id, record.clone()))
                .collect())
        })
        .unwrap_or_default()
    }

    pub fn annotations(&self) -> Vec<(RecordId, AnnotationRecord)> {
        self.with_state(|state| {
            Ok(state
                .annotations
                .iter()
                .map(|(id, record)| (*id, record.clone()))
                .collect())
        })
        .unwrap_or_default()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, PersistenceError>,
    ) -> Result<T, PersistenceError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| PersistenceError::Unavailable("store lock poisoned".to_owned()))?;
        f(&mut state)
    }

    fn write<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, PersistenceError>,
    ) -> BoxFuture<'static, Result<T, PersistenceError>> {
        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("writes disabled".to_owned()))
        } else {
            self.with_state(f)
        };
        ready(result).boxed()
    }
}

impl StoreState {
    fn allocate(&mut self) -> RecordId {
        self.next_id += 1;
        RecordId(self.next_id)
    }
}

impl MeasurementStore for InMemoryStore {
    fn create_measurement(
        &self,
        record: MeasurementRecord,
    ) -> BoxFuture<'static, Result<RecordId, PersistenceError>> {
        self.write(|state| {
            let id = state.allocate();
            state.measurements.insert(id, record);
            Ok(id)
        })
    }

    fn delete_measurement(&self, id: RecordId) -> BoxFuture<'static, Result<(), PersistenceError>> {
        self.write(move |state| {
            state
                .measurements
                .remove(&id)
                .map(|_| ())
                .ok_or(PersistenceError::UnknownRecord(id))
        })
    }

    fn create_annotation(
        &self,
        record: AnnotationRecord,
    ) -> BoxFuture<'static, Result<RecordId, PersistenceError>> {
        self.write(|state| {
            let id = state.allocate();
            state.annotations.insert(id, record);
            Ok(id)
        })
    }

    fn move_annotation(
        &self,
        id: RecordId,
        position: Point,
    ) -> BoxFuture<'static, Result<(), PersistenceError>> {
        self.write(move |state| {
            let record = state
                .annotations
                .get_mut(&id)
                .ok_or(PersistenceError::UnknownRecord(id))?;
            record.x = position.x;
            record.y = position.y;
            Ok(())
        })
    }

    fn delete_annotation(&self, id: RecordId) -> BoxFuture<'static, Result<(), PersistenceError>> {
        self.write(move |state| {
            state
                .annotations
                .remove(&id)
                .map(|_| ())
                .ok_or(PersistenceError::UnknownRecord(id))
        })
    }

    fn clear_image(&self, image_id: &ImageId) -> BoxFuture<'static, Result<(), PersistenceError>> {
        let image = image_id.0.clone();
        self.write(move |state| {
            state.measurements.retain(|_, record| record.image_id != image);
            state.annotations.retain(|_, record| record.image_id != image);
            Ok(())
        })
    }
}

/// Provider over `.dcm` files in a directory. Image ids are file paths.
#[derive(Debug, Default)]
pub struct DicomFileProvider {
    paths: HashMap<ImageId, PathBuf>,
}

impl DicomFileProvider {
    /// Scans `path` for `.dcm` files and lists them with their ordering
    /// attributes. Only the header of each file is read.
    pub fn open_directory(path: impl AsRef<Path>) -> Result<(Self, Vec<SeriesEntry>), ProviderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(ProviderError::NoImages);
        }

        let mut provider = Self::default();
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let header = OpenFileOptions::new()
                .read_until(tags::PIXEL_DATA)
                .open_file(&path)?;
            let id = ImageId(path.to_string_lossy().into_owned());
            entries.push(SeriesEntry::new(
                id.clone(),
                Self::int(&header, tags::INSTANCE_NUMBER),
                Self::slice_position(&header),
            ));
            provider.paths.insert(id, path);
        }
        debug!("Found {} DICOM files in {}", entries.len(), path.as_ref().display());
        Ok((provider, entries))
    }

    pub fn read_slice(&self, id: &ImageId) -> Result<Slice, ProviderError> {
        let path = self
            .paths
            .get(id)
            .ok_or_else(|| ProviderError::UnknownImage(id.clone()))?;
        Self::read_slice_at(path, id.clone())
    }

    fn read_slice_at(path: &Path, id: ImageId) -> Result<Slice, ProviderError> {
        let object = open_file(path)?;
        let metadata = Self::read_metadata(&object);

        let pixel_data = object
            .decode_pixel_data()
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        let samples = pixel_data
            .to_ndarray_with_options::<i32>(&options)
            .map_err(|err| ProviderError::Decode(err.to_string()))?
            .slice_move(s![0, .., .., 0]);

        Ok(Slice::from_array(id, metadata, samples))
    }

    fn read_metadata(object: &DefaultDicomObject) -> SliceMetadata {
        let defaults = SliceMetadata::default();

        let pixel_spacing = Self::multi_float(object, tags::PIXEL_SPACING)
            .filter(|values| values.len() >= 2)
            // PixelSpacing is (row spacing, column spacing), i.e. (y, x)
            .map(|values| PixelSpacing::new(values[1], values[0]))
            .unwrap_or(defaults.pixel_spacing);

        let rescale = Rescale::new(
            Self::float(object, tags::RESCALE_SLOPE).unwrap_or(defaults.rescale.slope),
            Self::float(object, tags::RESCALE_INTERCEPT).unwrap_or(defaults.rescale.intercept),
        );

        let window = WindowLevel::new(
            Self::first_float(object, tags::WINDOW_CENTER).unwrap_or(defaults.window.center()),
            Self::first_float(object, tags::WINDOW_WIDTH).unwrap_or(defaults.window.width()),
        );

        let photometric_interpretation = object
            .element(tags::PHOTOMETRIC_INTERPRETATION)
            .ok()
            .and_then(|element| element.to_str().ok())
            .map(|code| PhotometricInterpretation::from_code(&code))
            .unwrap_or_default();

        SliceMetadata {
            rows: Self::int(object, tags::ROWS).unwrap_or(0).max(0) as usize,
            columns: Self::int(object, tags::COLUMNS).unwrap_or(0).max(0) as usize,
            pixel_spacing,
            slice_thickness: Self::float(object, tags::SLICE_THICKNESS)
                .unwrap_or(defaults.slice_thickness),
            rescale,
            window,
            photometric_interpretation,
            instance_number: Self::int(object, tags::INSTANCE_NUMBER),
            slice_position: Self::slice_position(object),
        }
    }

    fn slice_position(object: &DefaultDicomObject) -> Option<f64> {
        Self::multi_float(object, tags::IMAGE_POSITION_PATIENT)
            .and_then(|position| position.get(2).copied())
            .or_else(|| Self::float(object, tags::SLICE_LOCATION))
    }

    fn int(object: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<i32> {
        object.element(tag).ok()?.to_int::<i32>().ok()
    }

    fn float(object: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<f64> {
        object.element(tag).ok()?.to_float64().ok()
    }

    fn multi_float(object: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<Vec<f64>> {
        object.element(tag).ok()?.to_multi_float64().ok()
    }

    fn first_float(object: &DefaultDicomObject, tag: dicom::core::Tag) -> Option<f64> {
        Self::multi_float(object, tag).and_then(|values| values.first().copied())
    }
}

impl ImageProvider for DicomFileProvider {
    fn fetch(&self, id: &ImageId, _params: RenderParams) -> BoxFuture<'static, Result<Slice, ProviderError>> {
        let Some(path) = self.paths.get(id).cloned() else {
            return ready(Err(ProviderError::UnknownImage(id.clone()))).boxed();
        };
        let id = id.clone();
        async move {
            tokio::task::spawn_blocking(move || Self::read_slice_at(&path, id))
                .await
                .map_err(|err| ProviderError::Unavailable(err.to_string()))?
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn slice(id: &str, instance: i32) -> Slice {
        let metadata = SliceMetadata {
            instance_number: Some(instance),
            ..Default::default()
        };
        Slice::from_array(id.into(), metadata, Array2::zeros((2, 2)))
    }

    fn record(image: &str) -> MeasurementRecord {
        MeasurementRecord {
            image_id: image.to_owned(),
            kind: MeasurementKind::Distance,
            coordinates: vec![[0.0, 0.0], [20.0, 0.0]],
            value: 20.0,
            unit: "mm".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_provider_fetch() {
        let provider = InMemoryProvider::new([slice("b", 2), slice("a", 1)]);
        let params = RenderParams::new(WindowLevel::default(), false);
        let fetched = provider.fetch(&"a".into(), params).await.unwrap();
        assert_eq!(fetched.id(), &ImageId::from("a"));
        assert!(matches!(
            provider.fetch(&"zzz".into(), params).await,
            Err(ProviderError::UnknownImage(_))
        ));
        let listing: Vec<_> = provider.series().into_iter().map(|e| e.id.0).collect();
        assert_eq!(listing, ["b", "a"]);
    }

    #[tokio::test]
    async fn test_store_round_trip_and_clear() {
        let store = InMemoryStore::new();
        let first = store.create_measurement(record("img-1")).await.unwrap();
        let second = store.create_measurement(record("img-2")).await.unwrap();
        assert_ne!(first, second);

        let note = store
            .create_annotation(AnnotationRecord {
                image_id: "img-1".to_owned(),
                x: 1.0,
                y: 2.0,
                text: "lesion".to_owned(),
            })
            .await
            .unwrap();
        store.move_annotation(note, Point::new(5.0, 6.0)).await.unwrap();
        assert_eq!(store.annotations()[0].1.x, 5.0);

        store.clear_image(&"img-1".into()).await.unwrap();
        assert_eq!(store.measurements().len(), 1);
        assert!(store.annotations().is_empty());
    }

    #[tokio::test]
    async fn test_store_failures() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.create_measurement(record("img")).await.is_err());
        store.set_fail_writes(false);
        assert_eq!(
            store.delete_measurement(RecordId(99)).await,
            Err(PersistenceError::UnknownRecord(RecordId(99)))
        );
    }

    #[test]
    fn test_measurement_record_json_shape() {
        let json = serde_json::to_value(record("img")).unwrap();
        assert_eq!(json["type"], "distance");
        assert_eq!(json["unit"], "mm");
        assert_eq!(json["coordinates"][1][0], 20.0);
    }

    #[test]
    fn test_open_missing_directory_fails() {
        assert!(DicomFileProvider::open_directory("/definitely/not/here").is_err());
    }
}
