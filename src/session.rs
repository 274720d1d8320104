//! A viewer session: all state of one canvas, driven by messages.
//!
//! User input arrives as [`Command`]s. Decoding, volume construction,
//! projection and persistence run as detached tasks that post a
//! [`Completion`] back onto the session's queue, so every state change
//! happens inside [`ViewerSession::handle`], one message at a time.
//!
//! Responses that no longer match what the session is waiting for (an image
//! the user navigated away from, a volume or projection superseded by a newer
//! request) are dropped when they arrive.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, ready, try_join_all};
use image::{RgbaImage, imageops};
use log::{debug, info, warn};
use ndarray::Array2;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::annotation::{self, Annotation, AnnotationDrag, AnnotationStyle, LabelMetrics};
use crate::config::ViewerConfig;
use crate::coords::{CoordinateMapper, Point, Size};
use crate::display::DisplayState;
use crate::enums::{LengthUnit, Orientation, ProjectionMode, SortBy, WindowPreset};
use crate::error::{ErrorKind, ViewerError};
use crate::intensity::{IntensityTransformer, WindowLevel};
use crate::measurement::{Calibration, Measurement, MeasurementEngine, MeasurementKind, MeasurementValue};
use crate::provider::{
    AnnotationRecord, ImageProvider, MeasurementRecord, MeasurementStore, PersistenceError,
    ProviderError, RecordId, RenderParams, SeriesEntry, TextPrompt,
};
use crate::slice::{ImageId, Slice};
use crate::tool::{Overlays, Pointer, Tool, ToolMode, ToolOutput};
use crate::volume::Volume;
use crate::volume_loader::{LoadedVolume, LoaderWarning, VolumeLoader, VolumeLoaderError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// The zoom modifier (e.g. Ctrl) is held.
    pub zoom: bool,
}

/// User input and UI requests. Pointer positions are canvas pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PointerDown(Point),
    PointerMove(Point),
    PointerUp(Point),
    Wheel { delta_y: f64, modifiers: Modifiers },
    Cancel,
    SelectTool(ToolMode),
    SelectImage(usize),
    ToggleCrosshair,
    ToggleMagnify,
    SetLengthUnit(LengthUnit),
    SetInverted(bool),
    RotateClockwise,
    RotateCounterClockwise,
    FlipHorizontal,
    FlipVertical,
    ApplyPreset(WindowPreset),
    ResetDisplay,
    Resize(Size),
    SetMpr(bool),
    RequestProjection(Orientation, ProjectionMode),
    DeleteMeasurement(RecordId),
    DeleteAnnotation(RecordId),
    ClearImage,
}

/// A measurement waiting for the store to acknowledge it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMeasurement {
    pub image_id: ImageId,
    pub kind: MeasurementKind,
    pub points: Vec<Point>,
    pub value: MeasurementValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAnnotation {
    pub image_id: ImageId,
    pub text: String,
    pub anchor: Point,
}

/// Results of background work.
#[derive(Debug)]
pub enum Completion {
    ImageDecoded {
        image_id: ImageId,
        result: Result<Slice, ProviderError>,
    },
    VolumeBuilt {
        generation: u64,
        result: Result<LoadedVolume, VolumeLoaderError>,
    },
    ProjectionDone {
        generation: u64,
        orientation: Orientation,
        mode: ProjectionMode,
        result: Result<Array2<f32>, String>,
    },
    MeasurementSaved {
        pending: PendingMeasurement,
        result: Result<RecordId, PersistenceError>,
    },
    MeasurementDeleted {
        image_id: ImageId,
        id: RecordId,
        result: Result<(), PersistenceError>,
    },
    AnnotationSaved {
        pending: PendingAnnotation,
        result: Result<RecordId, PersistenceError>,
    },
    AnnotationMoved {
        image_id: ImageId,
        id: RecordId,
        previous: Point,
        result: Result<(), PersistenceError>,
    },
    AnnotationDeleted {
        image_id: ImageId,
        id: RecordId,
        result: Result<(), PersistenceError>,
    },
    ImageCleared {
        image_id: ImageId,
        result: Result<(), PersistenceError>,
    },
}

#[derive(Debug)]
pub enum Message {
    Command(Command),
    Completion(Completion),
}

/// A user-visible, non-fatal event.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Error { kind: ErrorKind, message: String },
    Warning(String),
}

impl Notification {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error { kind, .. } => Some(*kind),
            Self::Warning(_) => None,
        }
    }
}

impl From<&ViewerError> for Notification {
    fn from(err: &ViewerError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub orientation: Orientation,
    pub mode: ProjectionMode,
    pub plane: Array2<f32>,
}

#[derive(Debug, Default)]
struct MprState {
    enabled: bool,
    generation: u64,
    volume: Option<Arc<Volume>>,
    projection_generation: u64,
    projection: Option<Projection>,
    pending_projection: Option<(Orientation, ProjectionMode)>,
}

/// Windowed renderings of the three orthogonal planes.
pub struct MprViews {
    pub axial: RgbaImage,
    pub coronal: RgbaImage,
    pub sagittal: RgbaImage,
}

/// Background work is spawned on the tokio runtime that was current when
/// the session was created, or the one given to [`ViewerSession::with_runtime`].
/// Without a runtime, commands that need background work raise a
/// [`ErrorKind::TaskFailure`] notification instead.
pub struct ViewerSession {
    config: ViewerConfig,
    runtime: Option<Handle>,
    provider: Arc<dyn ImageProvider>,
    store: Arc<dyn MeasurementStore>,
    prompt: Box<dyn TextPrompt>,
    sender: UnboundedSender<Message>,
    receiver: UnboundedReceiver<Message>,

    series: Vec<SeriesEntry>,
    current_index: usize,
    requested: Option<ImageId>,
    slices: HashMap<ImageId, Arc<Slice>>,
    window_from_image: bool,

    canvas: Size,
    display: DisplayState,
    length_unit: LengthUnit,
    tool: Tool,
    overlays: Overlays,
    pointer: Option<Point>,
    crosshair: Option<Point>,
    drag: Option<AnnotationDrag>,

    measurements: HashMap<ImageId, Vec<Measurement>>,
    annotations: HashMap<ImageId, Vec<Annotation>>,
    mpr: MprState,
    notifications: Vec<Notification>,
    needs_render: bool,
}

impl ViewerSession {
    pub fn new(
        config: ViewerConfig,
        provider: Arc<dyn ImageProvider>,
        store: Arc<dyn MeasurementStore>,
        prompt: Box<dyn TextPrompt>,
        canvas: Size,
    ) -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            length_unit: config.length_unit,
            config,
            runtime: Handle::try_current().ok(),
            provider,
            store,
            prompt,
            sender,
            receiver,
            series: Vec::new(),
            current_index: 0,
            requested: None,
            slices: HashMap::new(),
            window_from_image: true,
            canvas,
            display: DisplayState::default(),
            tool: Tool::new(ToolMode::Windowing),
            overlays: Overlays::default(),
            pointer: None,
            crosshair: None,
            drag: None,
            measurements: HashMap::new(),
            annotations: HashMap::new(),
            mpr: MprState::default(),
            notifications: Vec::new(),
            needs_render: false,
        }
    }

    /// Runs background work on `runtime`.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Handle for posting commands from elsewhere on the interaction thread.
    pub fn sender(&self) -> UnboundedSender<Message> {
        self.sender.clone()
    }

    /// Waits for the next queued message and handles it.
    pub async fn process_next(&mut self) {
        if let Some(message) = self.receiver.recv().await {
            self.handle(message);
        }
    }

    /// Handles every message already queued, without waiting.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.receiver.try_recv() {
            self.handle(message);
            handled += 1;
        }
        handled
    }

    pub fn dispatch(&mut self, command: Command) {
        self.handle(Message::Command(command));
    }

    pub fn handle(&mut self, message: Message) {
        match message {
            Message::Command(command) => self.handle_command(command),
            Message::Completion(completion) => self.handle_completion(completion),
        }
    }

    /// Replaces the active series. Cached images, the volume and any
    /// in-flight volume build are discarded.
    pub fn load_series(&mut self, mut entries: Vec<SeriesEntry>) {
        if let Some(warning) = VolumeLoader::sort_series(&mut entries, self.config.sort_by) {
            self.warn_ordering(&warning);
        }
        info!("Loading series of {} images", entries.len());
        self.series = entries;
        self.slices.clear();
        self.requested = None;
        self.window_from_image = true;
        self.tool.cancel();
        self.drag = None;
        self.crosshair = None;
        self.invalidate_volume();
        if self.mpr.enabled {
            self.start_volume_build();
        }
        if !self.series.is_empty() {
            self.select_image(0);
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    pub fn overlays(&self) -> Overlays {
        self.overlays
    }

    pub fn length_unit(&self) -> LengthUnit {
        self.length_unit
    }

    pub fn series(&self) -> &[SeriesEntry] {
        &self.series
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_image_id(&self) -> Option<&ImageId> {
        self.series.get(self.current_index).map(|entry| &entry.id)
    }

    /// The decoded current image, once it has arrived.
    pub fn current_slice(&self) -> Option<&Arc<Slice>> {
        self.current_image_id().and_then(|id| self.slices.get(id))
    }

    pub fn measurements(&self) -> &[Measurement] {
        self.current_image_id()
            .and_then(|id| self.measurements.get(id))
            .map_or(&[][..], Vec::as_slice)
    }

    pub fn annotations(&self) -> &[Annotation] {
        self.current_image_id()
            .and_then(|id| self.annotations.get(id))
            .map_or(&[][..], Vec::as_slice)
    }

    pub fn format_measurement(&self, measurement: &Measurement) -> String {
        measurement.format(self.length_unit)
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Whether state changed since the last call.
    pub fn take_needs_render(&mut self) -> bool {
        std::mem::take(&mut self.needs_render)
    }

    pub fn crosshair(&self) -> Option<Point> {
        self.crosshair
    }

    pub fn mpr_enabled(&self) -> bool {
        self.mpr.enabled
    }

    pub fn volume(&self) -> Option<&Arc<Volume>> {
        self.mpr.volume.as_ref()
    }

    pub fn projection(&self) -> Option<&Projection> {
        self.mpr.projection.as_ref()
    }

    /// Mapper for the current image under the current display state.
    pub fn mapper(&self) -> Option<CoordinateMapper> {
        let slice = self.current_slice()?;
        Some(self.display.mapper(
            self.canvas,
            Size::new(slice.width() as f64, slice.height() as f64),
        ))
    }

    /// In-progress measurement points for preview drawing.
    pub fn preview_points(&self) -> Vec<Point> {
        self.tool
            .measure_state()
            .map(|state| state.preview_points())
            .unwrap_or_default()
    }

    /// The current image, windowed and oriented.
    pub fn render(&self) -> Option<RgbaImage> {
        let slice = self.current_slice()?;
        let transformer =
            IntensityTransformer::for_slice(slice, self.display.window, self.display.inverted);
        transformer
            .render_slice(slice)
            .map(|image| self.display.orient(image))
    }

    fn volume_transformer(&self) -> IntensityTransformer {
        IntensityTransformer::for_hu(self.display.window, self.display.inverted)
    }

    /// One plane of the volume, windowed with the current display window.
    pub fn render_plane(&self, orientation: Orientation, index: usize) -> Option<RgbaImage> {
        let volume = self.mpr.volume.as_ref()?;
        volume.get_image_from_axis(
            index,
            orientation,
            self.config.mpr_interpolation,
            &self.volume_transformer(),
        )
    }

    /// Axial plane of the current image plus the coronal and sagittal planes
    /// through the crosshair (the volume centre when no crosshair is set).
    pub fn mpr_views(&self) -> Option<MprViews> {
        let volume = self.mpr.volume.as_ref()?;
        let (width, height, _) = volume.dims_xyz();
        let axial_index = self
            .current_image_id()
            .and_then(|id| volume.slice_ids().iter().position(|v| v == id))
            .unwrap_or(self.current_index);
        let (x, y) = match self.crosshair {
            Some(p) => (p.x.max(0.0) as usize, p.y.max(0.0) as usize),
            None => (width / 2, height / 2),
        };
        Some(MprViews {
            axial: self.render_plane(Orientation::Axial, axial_index)?,
            coronal: self.render_plane(Orientation::Coronal, y)?,
            sagittal: self.render_plane(Orientation::Sagittal, x)?,
        })
    }

    pub fn render_projection(&self) -> Option<RgbaImage> {
        let projection = self.mpr.projection.as_ref()?;
        self.volume_transformer().render_hu(projection.plane.view())
    }

    /// Zoomed crop of the current image around the pointer.
    pub fn magnifier(&self) -> Option<RgbaImage> {
        if !self.overlays.magnify {
            return None;
        }
        let slice = self.current_slice()?;
        let centre = self.mapper()?.canvas_to_image(self.pointer?);
        let transformer =
            IntensityTransformer::for_slice(slice, self.display.window, self.display.inverted);
        let image = transformer.render_slice(slice)?;

        let size = self.config.magnifier_size.max(1);
        let source = (size / self.config.magnifier_factor.max(1)).max(1);
        let (width, height) = image.dimensions();
        let source_w = source.min(width);
        let source_h = source.min(height);
        let left = (centre.x - source_w as f64 / 2.0)
            .clamp(0.0, (width - source_w) as f64) as u32;
        let top = (centre.y - source_h as f64 / 2.0)
            .clamp(0.0, (height - source_h) as f64) as u32;
        let crop = imageops::crop_imm(&image, left, top, source_w, source_h).to_image();
        Some(imageops::resize(
            &crop,
            size,
            size,
            imageops::FilterType::Nearest,
        ))
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::PointerDown(p) => self.pointer_down(p),
            Command::PointerMove(p) => self.pointer_move(p),
            Command::PointerUp(p) => self.pointer_up(p),
            Command::Wheel { delta_y, modifiers } => self.wheel(delta_y, modifiers),
            Command::Cancel => self.cancel(),
            Command::SelectTool(mode) => {
                self.tool = Tool::new(mode);
                self.needs_render = true;
            }
            Command::SelectImage(index) => self.select_image(index),
            Command::ToggleCrosshair => {
                self.overlays.crosshair = !self.overlays.crosshair;
                self.needs_render = true;
            }
            Command::ToggleMagnify => {
                self.overlays.magnify = !self.overlays.magnify;
                self.needs_render = true;
            }
            Command::SetLengthUnit(unit) => {
                self.length_unit = unit;
                self.needs_render = true;
            }
            Command::SetInverted(inverted) => {
                self.display.inverted = inverted;
                self.needs_render = true;
            }
            Command::RotateClockwise => {
                self.display.rotation = self.display.rotation.rotate_cw();
                self.needs_render = true;
            }
            Command::RotateCounterClockwise => {
                self.display.rotation = self.display.rotation.rotate_ccw();
                self.needs_render = true;
            }
            Command::FlipHorizontal => {
                self.display.flip_horizontal = !self.display.flip_horizontal;
                self.needs_render = true;
            }
            Command::FlipVertical => {
                self.display.flip_vertical = !self.display.flip_vertical;
                self.needs_render = true;
            }
            Command::ApplyPreset(preset) => {
                self.display.window = WindowLevel::preset(preset);
                self.needs_render = true;
            }
            Command::ResetDisplay => {
                let window = self
                    .current_slice()
                    .map(|slice| slice.metadata().window)
                    .unwrap_or_default();
                self.display.reset(window);
                self.needs_render = true;
            }
            Command::Resize(size) => {
                self.canvas = size;
                self.needs_render = true;
            }
            Command::SetMpr(enabled) => self.set_mpr(enabled),
            Command::RequestProjection(orientation, mode) => {
                self.request_projection(orientation, mode)
            }
            Command::DeleteMeasurement(id) => self.delete_measurement(id),
            Command::DeleteAnnotation(id) => self.delete_annotation(id),
            Command::ClearImage => self.clear_image(),
        }
    }

    fn pointer_at(&self, canvas: Point) -> Option<Pointer> {
        let mapper = self.mapper()?;
        Some(Pointer {
            canvas,
            image: mapper.canvas_to_image(canvas),
        })
    }

    fn pointer_down(&mut self, canvas: Point) {
        let Some(pointer) = self.pointer_at(canvas) else {
            return;
        };
        if let (Some(mapper), Some(id)) = (self.mapper(), self.current_image_id().cloned()) {
            let metrics = LabelMetrics::from_config(&self.config);
            let notes = self.annotations.get(&id).map_or(&[][..], Vec::as_slice);
            if let Some(index) = annotation::hit_test(notes, canvas, &mapper, &metrics) {
                self.drag = Some(AnnotationDrag::start(&notes[index], canvas, &mapper));
                return;
            }
        }
        let output = self.tool.pointer_down(pointer);
        self.apply(output);
    }

    fn pointer_move(&mut self, canvas: Point) {
        self.pointer = Some(canvas);
        let Some(pointer) = self.pointer_at(canvas) else {
            return;
        };
        if self.overlays.crosshair {
            self.crosshair = Some(pointer.image);
            self.needs_render = true;
        }
        if let Some(drag) = self.drag {
            if let Some(mapper) = self.mapper() {
                let anchor = drag.anchor_for(canvas, &mapper);
                match self.current_annotation_mut(drag.id) {
                    Some(note) => note.anchor = anchor,
                    None => {
                        debug!("Annotation {} went away mid-drag", drag.id);
                        self.drag = None;
                    }
                }
                self.needs_render = true;
            }
            return;
        }
        let output = self.tool.pointer_move(pointer, &self.config);
        self.apply(output);
    }

    fn pointer_up(&mut self, canvas: Point) {
        if let Some(drag) = self.drag.take() {
            self.finish_drag(drag, canvas);
            return;
        }
        let Some(pointer) = self.pointer_at(canvas) else {
            return;
        };
        let output = self.tool.pointer_up(pointer);
        self.apply(output);
    }

    fn wheel(&mut self, delta_y: f64, modifiers: Modifiers) {
        if delta_y == 0.0 || !delta_y.is_finite() {
            return;
        }
        if modifiers.zoom {
            let factor = if delta_y < 0.0 {
                self.config.wheel_zoom_in
            } else {
                self.config.wheel_zoom_out
            };
            let zoom = self.display.zoom() * factor;
            self.display
                .set_zoom(zoom, self.config.zoom_min, self.config.zoom_max);
            self.needs_render = true;
            return;
        }
        let target = self.current_index as i64 + if delta_y > 0.0 { 1 } else { -1 };
        let len = self.series.len();
        if target < 0 || target >= len as i64 {
            let err = ViewerError::OutOfRangeIndex { index: target, len };
            debug!("{err}; staying on image {}", self.current_index);
            return;
        }
        self.select_image(target as usize);
    }

    fn cancel(&mut self) {
        if let Some(drag) = self.drag.take() {
            if let Some(note) = self.current_annotation_mut(drag.id) {
                note.anchor = drag.original_anchor;
            }
        }
        if self.tool.cancel() {
            debug!("Discarded in-progress {:?} gesture", self.tool.mode());
        }
        self.needs_render = true;
    }

    fn apply(&mut self, output: ToolOutput) {
        match output {
            ToolOutput::None => {}
            ToolOutput::AdjustWindow {
                width_delta,
                level_delta,
            } => {
                self.display.window = self.display.window.adjusted(width_delta, level_delta);
                self.needs_render = true;
            }
            ToolOutput::Pan(delta) => {
                self.display.pan = self.display.pan + delta;
                self.needs_render = true;
            }
            ToolOutput::Zoom(factor) => {
                let zoom = self.display.zoom() * factor;
                self.display
                    .set_zoom(zoom, self.config.zoom_min, self.config.zoom_max);
                self.needs_render = true;
            }
            ToolOutput::Preview => self.needs_render = true,
            ToolOutput::Complete { kind, points } => self.commit_measurement(kind, points),
            ToolOutput::PromptAnnotation(anchor) => self.create_annotation(anchor),
        }
    }

    fn notify(&mut self, err: ViewerError) {
        warn!("{err}");
        self.notifications.push(Notification::from(&err));
    }

    fn warn_ordering(&mut self, warning: &LoaderWarning) {
        let LoaderWarning::MissingOrderMetadata { sort_by, missing } = warning;
        let message = format!("{missing} image(s) lack {sort_by:?} metadata; using listing order");
        warn!("{message}");
        self.notifications.push(Notification::Warning(message));
    }

    fn spawn<T: Send + 'static>(
        &mut self,
        future: BoxFuture<'static, T>,
        complete: impl FnOnce(T) -> Completion + Send + 'static,
    ) {
        let Some(runtime) = self.runtime.clone() else {
            self.notify(ViewerError::Task("no async runtime to run on".to_owned()));
            return;
        };
        let sender = self.sender.clone();
        runtime.spawn(async move {
            let value = future.await;
            // the receiver lives as long as the session
            let _ = sender.send(Message::Completion(complete(value)));
        });
    }

    fn render_params(&self) -> RenderParams {
        RenderParams::new(self.display.window, self.display.inverted)
    }

    fn select_image(&mut self, index: usize) {
        let Some(last) = self.series.len().checked_sub(1) else {
            return;
        };
        if index > last {
            debug!("Image index {index} clamped to {last}");
        }
        let index = index.min(last);
        if self.tool.cancel() {
            debug!("Discarded in-progress gesture on image change");
        }
        if let Some(drag) = self.drag.take() {
            if let Some(note) = self.current_annotation_mut(drag.id) {
                note.anchor = drag.original_anchor;
            }
        }
        self.current_index = index;
        let id = self.series[index].id.clone();
        self.requested = Some(id.clone());
        self.needs_render = true;
        if self.slices.contains_key(&id) {
            return;
        }
        let future = self.provider.fetch(&id, self.render_params());
        self.spawn(future, move |result| Completion::ImageDecoded {
            image_id: id,
            result,
        });
    }

    fn current_annotation_mut(&mut self, id: RecordId) -> Option<&mut Annotation> {
        let image_id = self.series.get(self.current_index)?.id.clone();
        self.annotations
            .get_mut(&image_id)?
            .iter_mut()
            .find(|note| note.id == id)
    }

    fn commit_measurement(&mut self, kind: MeasurementKind, points: Vec<Point>) {
        let Some(slice) = self.current_slice().cloned() else {
            return;
        };
        let calibration = Calibration::for_slice(&slice, self.config.calibration_factor);
        if !calibration.is_calibrated() && kind != MeasurementKind::Angle {
            let spacing = slice.metadata().pixel_spacing;
            if let Err(err) = Calibration::validate(spacing) {
                let err = ViewerError::from(err);
                warn!("{err}; measuring in pixels");
                self.notifications.push(Notification::from(&err));
            }
        }
        let engine = MeasurementEngine::new(calibration);
        let value = match engine.measure(kind, &points, Some(slice.as_ref())) {
            Ok(value) => value,
            Err(err) => {
                self.notify(err.into());
                self.needs_render = true;
                return;
            }
        };

        let unit = self.length_unit;
        let record = MeasurementRecord {
            image_id: slice.id().0.clone(),
            kind,
            coordinates: points.iter().map(|p| [p.x, p.y]).collect(),
            value: value.in_unit(unit),
            unit: value.unit_label(unit),
        };
        let pending = PendingMeasurement {
            image_id: slice.id().clone(),
            kind,
            points,
            value,
        };
        let future = self.store.create_measurement(record);
        self.spawn(future, move |result| Completion::MeasurementSaved { pending, result });
    }

    fn create_annotation(&mut self, anchor: Point) {
        let Some(image_id) = self.current_image_id().cloned() else {
            return;
        };
        let Some(text) = self
            .prompt
            .annotation_text(anchor)
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty())
        else {
            return;
        };
        let record = AnnotationRecord {
            image_id: image_id.0.clone(),
            x: anchor.x,
            y: anchor.y,
            text: text.clone(),
        };
        let pending = PendingAnnotation {
            image_id,
            text,
            anchor,
        };
        let future = self.store.create_annotation(record);
        self.spawn(future, move |result| Completion::AnnotationSaved { pending, result });
    }

    fn finish_drag(&mut self, drag: AnnotationDrag, canvas: Point) {
        let (Some(mapper), Some(image_id)) = (self.mapper(), self.current_image_id().cloned())
        else {
            return;
        };
        let anchor = drag.anchor_for(canvas, &mapper);
        let id = drag.id;
        let Some(note) = self.current_annotation_mut(id) else {
            debug!("Annotation {id} went away mid-drag");
            return;
        };
        note.anchor = anchor;
        if anchor == drag.original_anchor {
            return;
        }
        let previous = drag.original_anchor;
        let future = self.store.move_annotation(id, anchor);
        self.spawn(future, move |result| Completion::AnnotationMoved {
            image_id,
            id,
            previous,
            result,
        });
    }

    fn delete_measurement(&mut self, id: RecordId) {
        let Some(image_id) = self.current_image_id().cloned() else {
            return;
        };
        let future = self.store.delete_measurement(id);
        self.spawn(future, move |result| Completion::MeasurementDeleted {
            image_id,
            id,
            result,
        });
    }

    fn delete_annotation(&mut self, id: RecordId) {
        let Some(image_id) = self.current_image_id().cloned() else {
            return;
        };
        let future = self.store.delete_annotation(id);
        self.spawn(future, move |result| Completion::AnnotationDeleted {
            image_id,
            id,
            result,
        });
    }

    fn clear_image(&mut self) {
        let Some(image_id) = self.current_image_id().cloned() else {
            return;
        };
        let future = self.store.clear_image(&image_id);
        self.spawn(future, move |result| Completion::ImageCleared { image_id, result });
    }

    fn invalidate_volume(&mut self) {
        self.mpr.generation += 1;
        self.mpr.projection_generation += 1;
        self.mpr.volume = None;
        self.mpr.projection = None;
    }

    fn set_mpr(&mut self, enabled: bool) {
        if enabled == self.mpr.enabled {
            return;
        }
        self.mpr.enabled = enabled;
        self.needs_render = true;
        if enabled {
            self.start_volume_build();
        } else {
            self.invalidate_volume();
            self.mpr.pending_projection = None;
            info!("MPR disabled, volume released");
        }
    }

    fn start_volume_build(&mut self) {
        self.mpr.generation += 1;
        let generation = self.mpr.generation;
        let params = self.render_params();
        let fetches: Vec<BoxFuture<'static, Result<Arc<Slice>, ProviderError>>> = self
            .series
            .iter()
            .map(|entry| match self.slices.get(&entry.id) {
                Some(slice) => ready(Ok(Arc::clone(slice))).boxed(),
                None => self
                    .provider
                    .fetch(&entry.id, params)
                    .map(|result| result.map(Arc::new))
                    .boxed(),
            })
            .collect();
        let sort_by = self.config.sort_by;
        info!("Building volume from {} images (generation {generation})", fetches.len());

        self.spawn(build_volume(fetches, sort_by).boxed(), move |result| {
            Completion::VolumeBuilt { generation, result }
        });
    }

    fn request_projection(&mut self, orientation: Orientation, mode: ProjectionMode) {
        if !self.mpr.enabled {
            self.set_mpr(true);
        }
        self.mpr.projection_generation += 1;
        let Some(volume) = self.mpr.volume.clone() else {
            self.mpr.pending_projection = Some((orientation, mode));
            return;
        };
        let generation = self.mpr.projection_generation;
        let task = async move {
            tokio::task::spawn_blocking(move || volume.project(orientation, mode)).await
        }
        .boxed();
        self.spawn(task, move |result| Completion::ProjectionDone {
            generation,
            orientation,
            mode,
            result: result.map_err(|err| err.to_string()),
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::ImageDecoded { image_id, result } => self.image_decoded(image_id, result),
            Completion::VolumeBuilt { generation, result } => self.volume_built(generation, result),
            Completion::ProjectionDone {
                generation,
                orientation,
                mode,
                result,
            } => {
                if generation != self.mpr.projection_generation || self.mpr.volume.is_none() {
                    debug!("Discarded superseded {mode:?} projection along {orientation:?}");
                    return;
                }
                let plane = match result {
                    Ok(plane) => plane,
                    Err(err) => {
                        self.notify(ViewerError::Task(format!(
                            "{mode:?} projection along {orientation:?}: {err}"
                        )));
                        return;
                    }
                };
                self.mpr.projection = Some(Projection {
                    orientation,
                    mode,
                    plane,
                });
                self.needs_render = true;
            }
            Completion::MeasurementSaved { pending, result } => match result {
                Ok(id) => {
                    let measurement = Measurement {
                        id,
                        image_id: pending.image_id.clone(),
                        kind: pending.kind,
                        points: pending.points,
                        value: pending.value,
                    };
                    info!(
                        "Saved {} measurement {id}: {}",
                        measurement.kind.as_str(),
                        measurement.format(self.length_unit)
                    );
                    self.measurements
                        .entry(pending.image_id)
                        .or_default()
                        .push(measurement);
                    self.needs_render = true;
                }
                Err(err) => self.notify(err.into()),
            },
            Completion::MeasurementDeleted {
                image_id,
                id,
                result,
            } => match result {
                Ok(()) => {
                    if let Some(list) = self.measurements.get_mut(&image_id) {
                        list.retain(|m| m.id != id);
                    }
                    self.needs_render = true;
                }
                Err(err) => self.notify(err.into()),
            },
            Completion::AnnotationSaved { pending, result } => match result {
                Ok(id) => {
                    self.annotations
                        .entry(pending.image_id.clone())
                        .or_default()
                        .push(Annotation {
                            id,
                            image_id: pending.image_id,
                            text: pending.text,
                            anchor: pending.anchor,
                            style: AnnotationStyle::default(),
                        });
                    self.needs_render = true;
                }
                Err(err) => self.notify(err.into()),
            },
            Completion::AnnotationMoved {
                image_id,
                id,
                previous,
                result,
            } => {
                if let Err(err) = result {
                    if let Some(note) = self
                        .annotations
                        .get_mut(&image_id)
                        .and_then(|notes| notes.iter_mut().find(|n| n.id == id))
                    {
                        note.anchor = previous;
                    }
                    self.notify(err.into());
                    self.needs_render = true;
                }
            }
            Completion::AnnotationDeleted {
                image_id,
                id,
                result,
            } => match result {
                Ok(()) => {
                    if let Some(notes) = self.annotations.get_mut(&image_id) {
                        notes.retain(|n| n.id != id);
                    }
                    self.needs_render = true;
                }
                Err(err) => self.notify(err.into()),
            },
            Completion::ImageCleared { image_id, result } => match result {
                Ok(()) => {
                    self.measurements.remove(&image_id);
                    self.annotations.remove(&image_id);
                    self.needs_render = true;
                }
                Err(err) => self.notify(err.into()),
            },
        }
    }

    fn image_decoded(&mut self, image_id: ImageId, result: Result<Slice, ProviderError>) {
        if self.requested.as_ref() != Some(&image_id) {
            let err = ViewerError::StaleResponse {
                expected: self.requested.clone(),
                received: image_id,
            };
            debug!("{err}");
            return;
        }
        match result {
            Ok(slice) => {
                if self.window_from_image {
                    self.display.window = slice.metadata().window;
                    self.window_from_image = false;
                }
                self.slices.insert(image_id, Arc::new(slice));
                self.needs_render = true;
            }
            Err(err) => self.notify(err.into()),
        }
    }

    fn volume_built(&mut self, generation: u64, result: Result<LoadedVolume, VolumeLoaderError>) {
        if generation != self.mpr.generation || !self.mpr.enabled {
            debug!("Discarded volume of superseded build {generation}");
            return;
        }
        match result {
            Ok(LoadedVolume { volume, warnings }) => {
                for warning in &warnings {
                    self.warn_ordering(warning);
                }
                self.mpr.volume = Some(Arc::new(volume));
                self.needs_render = true;
                if let Some((orientation, mode)) = self.mpr.pending_projection.take() {
                    self.request_projection(orientation, mode);
                }
            }
            Err(err) => {
                self.mpr.pending_projection = None;
                self.notify(err.into());
            }
        }
    }
}

/// Gathers every slice of the series, then stacks them off the async
/// thread.
async fn build_volume(
    fetches: Vec<BoxFuture<'static, Result<Arc<Slice>, ProviderError>>>,
    sort_by: SortBy,
) -> Result<LoadedVolume, VolumeLoaderError> {
    let slices = try_join_all(fetches).await?;
    tokio::task::spawn_blocking(move || VolumeLoader::load_from_slices(&slices, sort_by))
        .await
        .map_err(|err| ProviderError::Unavailable(err.to_string()))?
}
