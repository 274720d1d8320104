use std::sync::Arc;

use dicom_viewport::provider::{InMemoryProvider, InMemoryStore};
use dicom_viewport::session::Command;
use dicom_viewport::slice::PixelSpacing;
use dicom_viewport::tool::ToolMode;
use dicom_viewport::{
    LengthUnit, Orientation, Point, Size, Slice, SliceMetadata, SortBy, ViewerConfig,
    ViewerSession, VolumeLoader,
};
use ndarray::Array2;

const ROWS: usize = 4;
const COLS: usize = 30;

fn series() -> Vec<Slice> {
    (0..3)
        .map(|z| {
            let metadata = SliceMetadata {
                pixel_spacing: PixelSpacing::new(1.0, 1.0),
                slice_thickness: 2.0,
                instance_number: Some(z as i32 + 1),
                ..Default::default()
            };
            let samples =
                Array2::from_shape_fn((ROWS, COLS), |(y, x)| (z * 100 + y * COLS + x) as i32);
            Slice::from_array(format!("slice-{z}").into(), metadata, samples)
        })
        .collect()
}

/// The canvas is ten times the image in both directions.
fn session(text: Vec<&'static str>) -> (ViewerSession, Arc<InMemoryStore>) {
    let provider = InMemoryProvider::new(series());
    let listing = provider.series();
    let store = Arc::new(InMemoryStore::new());
    let mut texts = text.into_iter();
    let mut session = ViewerSession::new(
        ViewerConfig::default(),
        Arc::new(provider),
        store.clone(),
        Box::new(move |_: Point| texts.next().map(str::to_owned)),
        Size::new(COLS as f64 * 10.0, ROWS as f64 * 10.0),
    );
    session.load_series(listing);
    (session, store)
}

#[test]
fn test_volume_from_three_slices() {
    let slices = series();
    let loaded = VolumeLoader::load_from_slices(&slices, SortBy::InstanceNumber).unwrap();
    assert!(loaded.warnings.is_empty());

    let volume = loaded.volume;
    assert_eq!(volume.dims_xyz(), (COLS, ROWS, 3));
    assert_eq!(volume.spacing, (1.0, 1.0, 2.0));
    assert_eq!(volume.extract_axial(1), slices[1].hu());
    assert_eq!(
        volume.get_slice_from_axis(1, Orientation::Axial),
        volume.extract_axial(1)
    );
}

#[tokio::test]
async fn test_distance_measurement_follows_unit() {
    let (mut session, store) = session(vec![]);
    session.process_next().await;

    session.dispatch(Command::SelectTool(ToolMode::MeasureDistance));
    session.dispatch(Command::PointerDown(Point::new(20.0, 20.0)));
    session.dispatch(Command::PointerMove(Point::new(120.0, 20.0)));
    session.dispatch(Command::PointerUp(Point::new(220.0, 20.0)));
    session.process_next().await;

    let measurement = session.measurements()[0].clone();
    assert_eq!(measurement.points, vec![Point::new(2.0, 2.0), Point::new(22.0, 2.0)]);
    assert_eq!(session.format_measurement(&measurement), "20mm");

    session.dispatch(Command::SetLengthUnit(LengthUnit::Centimeter));
    let redisplayed = &session.measurements()[0];
    assert_eq!(session.format_measurement(redisplayed), "2cm");
    assert_eq!(redisplayed.points, measurement.points);
    assert_eq!(store.measurements().len(), 1);
}

#[tokio::test]
async fn test_overlapping_annotations_drag_the_newest() {
    let (mut session, store) = session(vec!["A label", "B"]);
    session.process_next().await;

    session.dispatch(Command::SelectTool(ToolMode::Annotate));
    // labels span x 30..87 for A and 20..35 for B on the canvas
    session.dispatch(Command::PointerDown(Point::new(30.0, 10.0)));
    session.process_next().await;
    session.dispatch(Command::PointerDown(Point::new(20.0, 10.0)));
    session.process_next().await;
    assert_eq!(session.annotations().len(), 2);

    session.dispatch(Command::SelectTool(ToolMode::Windowing));
    session.dispatch(Command::PointerDown(Point::new(32.0, 15.0)));
    session.dispatch(Command::PointerMove(Point::new(132.0, 15.0)));
    session.dispatch(Command::PointerUp(Point::new(132.0, 15.0)));
    session.process_next().await;

    let notes = session.annotations();
    assert_eq!(notes[0].text, "A label");
    assert_eq!(notes[0].anchor, Point::new(3.0, 1.0));
    assert_eq!(notes[1].text, "B");
    assert_eq!(notes[1].anchor, Point::new(12.0, 1.0));
    let stored: Vec<_> = store.annotations().into_iter().map(|(_, r)| (r.text, r.x)).collect();
    assert_eq!(stored, vec![("A label".to_owned(), 3.0), ("B".to_owned(), 12.0)]);
}

#[tokio::test]
async fn test_scrolling_past_the_last_image_stays_put() {
    let (mut session, _) = session(vec![]);
    session.process_next().await;
    for expected in [1, 2] {
        session.dispatch(Command::Wheel {
            delta_y: 3.0,
            modifiers: Default::default(),
        });
        assert_eq!(session.current_index(), expected);
        session.process_next().await;
    }
    session.dispatch(Command::Wheel {
        delta_y: 3.0,
        modifiers: Default::default(),
    });
    assert_eq!(session.current_index(), 2);
    assert_eq!(session.process_pending(), 0);
    assert!(session.notifications().is_empty());
}
