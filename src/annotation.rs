//! Text annotations anchored in image space, with canvas-space hit testing
//! and dragging.

use crate::config::ViewerConfig;
use crate::coords::{CoordinateMapper, Point};
use crate::provider::RecordId;
use crate::slice::ImageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba(pub [u8; 4]);

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationStyle {
    pub color: Rgba,
    pub font_size: f64,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            color: Rgba([255, 255, 0, 255]),
            font_size: 14.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: RecordId,
    pub image_id: ImageId,
    pub text: String,
    /// Top-left corner of the label, in image space.
    pub anchor: Point,
    pub style: AnnotationStyle,
}

/// Size of a rendered label in canvas pixels. Width follows the text
/// length; height is fixed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelMetrics {
    pub char_width: f64,
    pub padding: f64,
    pub height: f64,
}

impl LabelMetrics {
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self {
            char_width: config.label_char_width,
            padding: config.label_padding,
            height: config.label_height,
        }
    }

    pub fn width(&self, text: &str) -> f64 {
        text.chars().count() as f64 * self.char_width + 2.0 * self.padding
    }
}

impl Annotation {
    /// Whether `canvas_point` falls inside the label box at the anchor's
    /// current canvas position.
    pub fn hit(&self, canvas_point: Point, mapper: &CoordinateMapper, metrics: &LabelMetrics) -> bool {
        let origin = mapper.image_to_canvas(self.anchor);
        let width = metrics.width(&self.text);
        canvas_point.x >= origin.x
            && canvas_point.x <= origin.x + width
            && canvas_point.y >= origin.y
            && canvas_point.y <= origin.y + metrics.height
    }
}

/// Index of the annotation hit by `canvas_point`. Later annotations are
/// tested first so the most recently added wins on overlap.
pub fn hit_test(
    annotations: &[Annotation],
    canvas_point: Point,
    mapper: &CoordinateMapper,
    metrics: &LabelMetrics,
) -> Option<usize> {
    annotations
        .iter()
        .rposition(|annotation| annotation.hit(canvas_point, mapper, metrics))
}

/// An annotation being dragged. It is tracked by record id, since the
/// list may shift while the drag is in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationDrag {
    pub id: RecordId,
    pub original_anchor: Point,
    /// Pointer position minus label position at drag start, in canvas space.
    offset: Point,
}

impl AnnotationDrag {
    pub fn start(annotation: &Annotation, pointer: Point, mapper: &CoordinateMapper) -> Self {
        Self {
            id: annotation.id,
            original_anchor: annotation.anchor,
            offset: pointer - mapper.image_to_canvas(annotation.anchor),
        }
    }

    /// New image-space anchor for the pointer at `pointer`.
    pub fn anchor_for(&self, pointer: Point, mapper: &CoordinateMapper) -> Point {
        mapper.canvas_to_image(pointer - self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Size;
    use approx::assert_abs_diff_eq;

    fn annotation(id: u64, text: &str, anchor: Point) -> Annotation {
        Annotation {
            id: RecordId(id),
            image_id: "img".into(),
            text: text.to_owned(),
            anchor,
            style: AnnotationStyle::default(),
        }
    }

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new(Size::new(200.0, 200.0), Size::new(100.0, 100.0), 1.0, Point::ORIGIN)
    }

    fn metrics() -> LabelMetrics {
        LabelMetrics {
            char_width: 7.0,
            padding: 4.0,
            height: 20.0,
        }
    }

    #[test]
    fn test_label_width() {
        assert_eq!(metrics().width("abc"), 29.0);
    }

    #[test]
    fn test_overlap_hits_most_recent() {
        let a = annotation(1, "first label", Point::new(10.0, 10.0));
        let b = annotation(2, "second", Point::new(12.0, 12.0));
        let annotations = vec![a, b];
        // canvas scale is 2, so the labels start at (20, 20) and (24, 24)
        let hit = hit_test(&annotations, Point::new(30.0, 30.0), &mapper(), &metrics());
        assert_eq!(hit, Some(1));
        let only_a = hit_test(&annotations, Point::new(21.0, 21.0), &mapper(), &metrics());
        assert_eq!(only_a, Some(0));
        assert_eq!(hit_test(&annotations, Point::new(0.0, 0.0), &mapper(), &metrics()), None);
    }

    #[test]
    fn test_drag_keeps_grab_offset() {
        let mapper = mapper();
        let note = annotation(1, "x", Point::new(10.0, 10.0));
        let drag = AnnotationDrag::start(&note, Point::new(25.0, 22.0), &mapper);
        let anchor = drag.anchor_for(Point::new(45.0, 42.0), &mapper);
        assert_abs_diff_eq!(anchor.x, 20.0, epsilon = 1e-12);
        assert_abs_diff_eq!(anchor.y, 20.0, epsilon = 1e-12);
        assert_eq!(drag.original_anchor, Point::new(10.0, 10.0));
        assert_eq!(drag.id, RecordId(1));
    }
}
