//! Calibrated measurements in image space.
//!
//! Lengths are computed in millimetres from the pixel spacing of the image
//! the points were placed on and converted to the display unit only when
//! formatted. Without a valid spacing everything is reported in pixels.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coords::Point;
use crate::enums::LengthUnit;
use crate::provider::RecordId;
use crate::slice::{ImageId, PixelSpacing, Slice};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeasurementError {
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),

    #[error("{kind:?} needs {required} points, got {found}")]
    NotEnoughPoints {
        kind: MeasurementKind,
        required: usize,
        found: usize,
    },

    #[error("Invalid calibration: pixel spacing {x} x {y} mm")]
    InvalidCalibration { x: f64, y: f64 },
}

/// Pixel spacing plus an optional manual correction factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    spacing: Option<PixelSpacing>,
    factor: f64,
}

impl Calibration {
    /// An invalid spacing falls back to pixel units; an invalid factor to 1.
    pub fn new(spacing: PixelSpacing, factor: Option<f64>) -> Self {
        let factor = factor.filter(|f| f.is_finite() && *f > 0.0).unwrap_or(1.0);
        Self {
            spacing: spacing.is_valid().then_some(spacing),
            factor,
        }
    }

    pub fn pixels() -> Self {
        Self {
            spacing: None,
            factor: 1.0,
        }
    }

    pub fn for_slice(slice: &Slice, factor: Option<f64>) -> Self {
        Self::new(slice.metadata().pixel_spacing, factor)
    }

    pub fn is_calibrated(&self) -> bool {
        self.spacing.is_some()
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// The spacing, or an error describing why it cannot be used.
    pub fn validate(spacing: PixelSpacing) -> Result<PixelSpacing, MeasurementError> {
        if spacing.is_valid() {
            Ok(spacing)
        } else {
            Err(MeasurementError::InvalidCalibration {
                x: spacing.x,
                y: spacing.y,
            })
        }
    }

    /// Physical length of one pixel step along x and y, including the factor.
    fn scale(&self) -> (f64, f64) {
        let spacing = self.spacing.unwrap_or(PixelSpacing::new(1.0, 1.0));
        (spacing.x * self.factor, spacing.y * self.factor)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(PixelSpacing::default(), None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    Distance,
    Angle,
    Rectangle,
    Ellipse,
    Freehand,
}

impl MeasurementKind {
    /// Points needed before the measurement can be computed; freehand is a
    /// minimum.
    pub fn required_points(self) -> usize {
        match self {
            Self::Distance | Self::Rectangle | Self::Ellipse => 2,
            Self::Angle | Self::Freehand => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Distance => "distance",
            Self::Angle => "angle",
            Self::Rectangle => "rectangle",
            Self::Ellipse => "ellipse",
            Self::Freehand => "freehand",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Length,
    Area,
    Angle,
}

/// HU statistics over a region. `std_dev` is the population deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl RoiStats {
    pub fn format(&self) -> String {
        format!(
            "mean {} HU, std {} HU, min {} HU, max {} HU, n={}",
            format_number(self.mean),
            format_number(self.std_dev),
            format_number(self.min),
            format_number(self.max),
            self.count
        )
    }
}

/// Region over which ROI statistics are gathered, in image pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum RoiRegion {
    Rectangle(Point, Point),
    /// Ellipse inscribed in the box spanned by the two corners.
    Ellipse(Point, Point),
    Polygon(Vec<Point>),
}

impl RoiRegion {
    fn bounds(&self) -> (Point, Point) {
        let points = match self {
            Self::Rectangle(a, b) | Self::Ellipse(a, b) => vec![*a, *b],
            Self::Polygon(points) => points.clone(),
        };
        points.iter().fold(
            (
                Point::new(f64::INFINITY, f64::INFINITY),
                Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            ),
            |(lo, hi), p| {
                (
                    Point::new(lo.x.min(p.x), lo.y.min(p.y)),
                    Point::new(hi.x.max(p.x), hi.y.max(p.y)),
                )
            },
        )
    }

    fn contains(&self, p: Point) -> bool {
        match self {
            Self::Rectangle(a, b) => {
                p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
            }
            Self::Ellipse(a, b) => {
                let (rx, ry) = ((b.x - a.x).abs() / 2.0, (b.y - a.y).abs() / 2.0);
                if rx == 0.0 || ry == 0.0 {
                    return false;
                }
                let (cx, cy) = ((a.x + b.x) / 2.0, (a.y + b.y) / 2.0);
                let (nx, ny) = ((p.x - cx) / rx, (p.y - cy) / ry);
                nx * nx + ny * ny <= 1.0
            }
            Self::Polygon(vertices) => point_in_polygon(p, vertices),
        }
    }
}

fn point_in_polygon(p: Point, vertices: &[Point]) -> bool {
    let mut inside = false;
    let mut j = vertices.len().wrapping_sub(1);
    for (i, vi) in vertices.iter().enumerate() {
        let vj = vertices[j];
        if (vi.y > p.y) != (vj.y > p.y) {
            let x_cross = (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Computed value of a measurement in base units: mm, mm² or degrees when
/// calibrated, px or px² otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementValue {
    pub quantity: Quantity,
    pub value: f64,
    pub calibrated: bool,
    pub roi: Option<RoiStats>,
}

impl MeasurementValue {
    /// Value converted to `unit`. Angles and pixel values are unchanged.
    pub fn in_unit(&self, unit: LengthUnit) -> f64 {
        match (self.quantity, self.calibrated) {
            (Quantity::Length, true) => self.value / unit.length_divisor(),
            (Quantity::Area, true) => self.value / unit.length_divisor().powi(2),
            _ => self.value,
        }
    }

    pub fn unit_label(&self, unit: LengthUnit) -> String {
        match (self.quantity, self.calibrated) {
            (Quantity::Angle, _) => "°".to_owned(),
            (Quantity::Length, true) => unit.suffix().to_owned(),
            (Quantity::Area, true) => format!("{}²", unit.suffix()),
            (Quantity::Length, false) => "px".to_owned(),
            (Quantity::Area, false) => "px²".to_owned(),
        }
    }

    /// Display text, e.g. `20mm`, `2cm`, `90°`.
    pub fn format(&self, unit: LengthUnit) -> String {
        format!("{}{}", format_number(self.in_unit(unit)), self.unit_label(unit))
    }
}

/// Up to two decimals with trailing zeros removed.
pub fn format_number(value: f64) -> String {
    let text = format!("{value:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_owned()
    } else {
        text.to_owned()
    }
}

/// A committed measurement. Points are in un-rotated image space.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub id: RecordId,
    pub image_id: ImageId,
    pub kind: MeasurementKind,
    pub points: Vec<Point>,
    pub value: MeasurementValue,
}

impl Measurement {
    pub fn format(&self, unit: LengthUnit) -> String {
        self.value.format(unit)
    }
}

/// Measurement math bound to one image's calibration.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementEngine {
    calibration: Calibration,
}

impl MeasurementEngine {
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Distance in mm (px when uncalibrated).
    pub fn distance(&self, p1: Point, p2: Point) -> f64 {
        let (sx, sy) = self.calibration.scale();
        ((p2.x - p1.x) * sx).hypot((p2.y - p1.y) * sy)
    }

    /// Angle at `p2` between the rays to `p1` and `p3`, in degrees.
    ///
    /// Computed on calibrated vectors so anisotropic pixels do not skew it.
    pub fn angle(&self, p1: Point, p2: Point, p3: Point) -> Result<f64, MeasurementError> {
        let (sx, sy) = self.calibration.scale();
        let v1 = ((p1.x - p2.x) * sx, (p1.y - p2.y) * sy);
        let v2 = ((p3.x - p2.x) * sx, (p3.y - p2.y) * sy);
        let n1 = v1.0.hypot(v1.1);
        let n2 = v2.0.hypot(v2.1);
        if n1 == 0.0 || n2 == 0.0 {
            return Err(MeasurementError::DegenerateGeometry("zero-length angle arm"));
        }
        let cos = ((v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)).clamp(-1.0, 1.0);
        Ok(cos.acos().to_degrees())
    }

    /// Area of the axis-aligned rectangle spanned by two corners, in mm².
    pub fn rectangle_area(&self, p1: Point, p2: Point) -> f64 {
        let (sx, sy) = self.calibration.scale();
        (p2.x - p1.x).abs() * sx * (p2.y - p1.y).abs() * sy
    }

    /// Area of the ellipse inscribed in the box spanned by two corners, in
    /// mm².
    pub fn ellipse_area(&self, p1: Point, p2: Point) -> f64 {
        let (sx, sy) = self.calibration.scale();
        let semi_x = (p2.x - p1.x).abs() * sx / 2.0;
        let semi_y = (p2.y - p1.y).abs() * sy / 2.0;
        PI * semi_x.max(semi_y) * semi_x.min(semi_y)
    }

    /// Shoelace area of a closed polygon, in mm².
    pub fn polygon_area(&self, points: &[Point]) -> f64 {
        if points.len() < 3 {
            return 0.0;
        }
        let (sx, sy) = self.calibration.scale();
        let twice: f64 = points
            .iter()
            .zip(points.iter().cycle().skip(1))
            .map(|(a, b)| a.x * b.y - b.x * a.y)
            .sum();
        twice.abs() / 2.0 * sx * sy
    }

    /// HU statistics over the pixels whose centres lie inside `region`.
    ///
    /// Values are decoded through the slice's rescale, never taken from the
    /// windowed display bytes.
    pub fn roi_stats(&self, slice: &Slice, region: &RoiRegion) -> Result<RoiStats, MeasurementError> {
        let (lo, hi) = region.bounds();
        let max_x = slice.width() as f64;
        let max_y = slice.height() as f64;
        let x_start = lo.x.floor().clamp(0.0, max_x) as usize;
        let x_end = hi.x.ceil().clamp(0.0, max_x) as usize;
        let y_start = lo.y.floor().clamp(0.0, max_y) as usize;
        let y_end = hi.y.ceil().clamp(0.0, max_y) as usize;

        let mut count = 0usize;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for y in y_start..y_end {
            for x in x_start..x_end {
                let centre = Point::new(x as f64 + 0.5, y as f64 + 0.5);
                if !region.contains(centre) {
                    continue;
                }
                let Some(hu) = slice.hu_at(x, y) else {
                    continue;
                };
                count += 1;
                let delta = hu - mean;
                mean += delta / count as f64;
                m2 += delta * (hu - mean);
                min = min.min(hu);
                max = max.max(hu);
            }
        }

        if count == 0 {
            return Err(MeasurementError::DegenerateGeometry("ROI contains no pixels"));
        }
        Ok(RoiStats {
            mean,
            std_dev: (m2 / count as f64).sqrt(),
            min,
            max,
            count,
        })
    }

    /// Computes a measurement of `kind` from collected points. ROI kinds
    /// also gather HU statistics when the slice is given.
    pub fn measure(
        &self,
        kind: MeasurementKind,
        points: &[Point],
        slice: Option<&Slice>,
    ) -> Result<MeasurementValue, MeasurementError> {
        let required = kind.required_points();
        let enough = match kind {
            MeasurementKind::Freehand => points.len() >= required,
            _ => points.len() == required,
        };
        if !enough {
            return Err(MeasurementError::NotEnoughPoints {
                kind,
                required,
                found: points.len(),
            });
        }

        let calibrated = self.calibration.is_calibrated();
        let value = |quantity, value, roi| MeasurementValue {
            quantity,
            value,
            calibrated,
            roi,
        };
        let stats = |region: RoiRegion| {
            slice
                .map(|slice| self.roi_stats(slice, &region))
                .transpose()
        };

        match kind {
            MeasurementKind::Distance => {
                let length = self.distance(points[0], points[1]);
                if length == 0.0 {
                    return Err(MeasurementError::DegenerateGeometry("zero-length distance"));
                }
                Ok(value(Quantity::Length, length, None))
            }
            MeasurementKind::Angle => {
                let degrees = self.angle(points[0], points[1], points[2])?;
                Ok(MeasurementValue {
                    quantity: Quantity::Angle,
                    value: degrees,
                    calibrated: true,
                    roi: None,
                })
            }
            MeasurementKind::Rectangle => {
                let area = self.rectangle_area(points[0], points[1]);
                if area == 0.0 {
                    return Err(MeasurementError::DegenerateGeometry("zero-area rectangle"));
                }
                let roi = stats(RoiRegion::Rectangle(points[0], points[1]))?;
                Ok(value(Quantity::Area, area, roi))
            }
            MeasurementKind::Ellipse => {
                let area = self.ellipse_area(points[0], points[1]);
                if area == 0.0 {
                    return Err(MeasurementError::DegenerateGeometry("zero-area ellipse"));
                }
                let roi = stats(RoiRegion::Ellipse(points[0], points[1]))?;
                Ok(value(Quantity::Area, area, roi))
            }
            MeasurementKind::Freehand => {
                let area = self.polygon_area(points);
                if area == 0.0 {
                    return Err(MeasurementError::DegenerateGeometry("zero-area outline"));
                }
                let roi = stats(RoiRegion::Polygon(points.to_vec()))?;
                Ok(value(Quantity::Area, area, roi))
            }
        }
    }
}
