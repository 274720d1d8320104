//! Mapping between image-pixel space and canvas-pixel space.
//!
//! The image is fit into the canvas preserving aspect ratio, scaled by the
//! zoom factor, centred, then shifted by the pan offset. The mapper holds no
//! cache; build one per query from the current display state.

use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    scale: f64,
    offset: Point,
}

impl CoordinateMapper {
    /// Degenerate inputs (non-positive sizes or zoom) are floored to a tiny
    /// positive value so the transform stays invertible.
    pub fn new(canvas: Size, image: Size, zoom: f64, pan: Point) -> Self {
        let positive = |v: f64| if v.is_finite() && v > 0.0 { v } else { f64::EPSILON };
        let (canvas_w, canvas_h) = (positive(canvas.width), positive(canvas.height));
        let (image_w, image_h) = (positive(image.width), positive(image.height));
        let zoom = positive(zoom);

        let scale = (canvas_w * zoom / image_w).min(canvas_h * zoom / image_h);
        let offset = Point::new(
            (canvas_w - image_w * scale) / 2.0 + pan.x,
            (canvas_h - image_h * scale) / 2.0 + pan.y,
        );
        Self { scale, offset }
    }

    /// Canvas pixels per image pixel.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Canvas position of the image origin.
    pub fn offset(&self) -> Point {
        self.offset
    }

    pub fn image_to_canvas(&self, p: Point) -> Point {
        Point::new(
            self.offset.x + p.x * self.scale,
            self.offset.y + p.y * self.scale,
        )
    }

    pub fn canvas_to_image(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.offset.x) / self.scale,
            (p.y - self.offset.y) / self.scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::prelude::*;

    #[test]
    fn test_fit_centres_image() {
        let mapper = CoordinateMapper::new(
            Size::new(800.0, 600.0),
            Size::new(512.0, 512.0),
            1.0,
            Point::ORIGIN,
        );
        assert_abs_diff_eq!(mapper.scale(), 600.0 / 512.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mapper.offset().x, 100.0, epsilon = 1e-9);
        assert_abs_diff_eq!(mapper.offset().y, 0.0, epsilon = 1e-9);

        let centre = mapper.image_to_canvas(Point::new(256.0, 256.0));
        assert_abs_diff_eq!(centre.x, 400.0, epsilon = 1e-9);
        assert_abs_diff_eq!(centre.y, 300.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pan_shifts_offset() {
        let base = CoordinateMapper::new(
            Size::new(100.0, 100.0),
            Size::new(50.0, 50.0),
            2.0,
            Point::ORIGIN,
        );
        let panned = CoordinateMapper::new(
            Size::new(100.0, 100.0),
            Size::new(50.0, 50.0),
            2.0,
            Point::new(10.0, -5.0),
        );
        let p = Point::new(3.0, 4.0);
        let delta = panned.image_to_canvas(p) - base.image_to_canvas(p);
        assert_abs_diff_eq!(delta.x, 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(delta.y, -5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip_random_states() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let mapper = CoordinateMapper::new(
                Size::new(rng.gen_range(1.0..4000.0), rng.gen_range(1.0..4000.0)),
                Size::new(rng.gen_range(1.0..2048.0), rng.gen_range(1.0..2048.0)),
                rng.gen_range(0.1..5.0),
                Point::new(rng.gen_range(-500.0..500.0), rng.gen_range(-500.0..500.0)),
            );
            let p = Point::new(rng.gen_range(-100.0..2100.0), rng.gen_range(-100.0..2100.0));

            let back = mapper.canvas_to_image(mapper.image_to_canvas(p));
            assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-6);
            assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-6);

            let forward = mapper.image_to_canvas(mapper.canvas_to_image(p));
            assert_abs_diff_eq!(forward.x, p.x, epsilon = 1e-6);
            assert_abs_diff_eq!(forward.y, p.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_degenerate_zoom_stays_invertible() {
        let mapper = CoordinateMapper::new(
            Size::new(100.0, 100.0),
            Size::new(10.0, 10.0),
            0.0,
            Point::ORIGIN,
        );
        assert!(mapper.scale() > 0.0);
    }
}
