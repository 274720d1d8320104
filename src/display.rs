use image::{RgbaImage, imageops};

use crate::coords::{CoordinateMapper, Point, Size};
use crate::intensity::WindowLevel;

/// Clockwise quarter turns applied at raster time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn rotate_cw(self) -> Self {
        match self {
            Self::None => Self::Cw90,
            Self::Cw90 => Self::Cw180,
            Self::Cw180 => Self::Cw270,
            Self::Cw270 => Self::None,
        }
    }

    pub fn rotate_ccw(self) -> Self {
        match self {
            Self::None => Self::Cw270,
            Self::Cw90 => Self::None,
            Self::Cw180 => Self::Cw90,
            Self::Cw270 => Self::Cw180,
        }
    }
}

/// Per-viewport presentation state.
///
/// Rotation and flips only affect the raster produced by [`Self::orient`];
/// image-space coordinates of measurements and annotations are kept
/// un-rotated.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    zoom: f64,
    pub pan: Point,
    pub rotation: Rotation,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub inverted: bool,
    pub window: WindowLevel,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Point::ORIGIN,
            rotation: Rotation::None,
            flip_horizontal: false,
            flip_vertical: false,
            inverted: false,
            window: WindowLevel::default(),
        }
    }
}

impl DisplayState {
    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    /// Sets the zoom clamped to `[min, max]`. Non-finite input is ignored.
    pub fn set_zoom(&mut self, zoom: f64, min: f64, max: f64) {
        if zoom.is_finite() {
            self.zoom = zoom.clamp(min, max);
        }
    }

    /// Resets everything except the window, which is set to `window`.
    pub fn reset(&mut self, window: WindowLevel) {
        *self = Self {
            window,
            ..Self::default()
        };
    }

    pub fn mapper(&self, canvas: Size, image: Size) -> CoordinateMapper {
        CoordinateMapper::new(canvas, image, self.zoom, self.pan)
    }

    /// Applies flips then rotation about the image centre.
    pub fn orient(&self, image: RgbaImage) -> RgbaImage {
        let mut image = image;
        if self.flip_horizontal {
            imageops::flip_horizontal_in_place(&mut image);
        }
        if self.flip_vertical {
            imageops::flip_vertical_in_place(&mut image);
        }
        match self.rotation {
            Rotation::None => image,
            Rotation::Cw90 => imageops::rotate90(&image),
            Rotation::Cw180 => {
                imageops::rotate180_in_place(&mut image);
                image
            }
            Rotation::Cw270 => imageops::rotate270(&image),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn marker_image() -> RgbaImage {
        let mut image = RgbaImage::new(3, 2);
        image.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        image
    }

    #[test]
    fn test_zoom_clamped() {
        let mut state = DisplayState::default();
        state.set_zoom(12.0, 0.1, 5.0);
        assert_eq!(state.zoom(), 5.0);
        state.set_zoom(0.0, 0.1, 5.0);
        assert_eq!(state.zoom(), 0.1);
        state.set_zoom(f64::NAN, 0.1, 5.0);
        assert_eq!(state.zoom(), 0.1);
    }

    #[test]
    fn test_orient_rotation_swaps_dimensions() {
        let state = DisplayState {
            rotation: Rotation::Cw90,
            ..Default::default()
        };
        let oriented = state.orient(marker_image());
        assert_eq!(oriented.dimensions(), (2, 3));
        // top-left moves to top-right under a clockwise quarter turn
        assert_eq!(oriented.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn test_orient_flip() {
        let state = DisplayState {
            flip_horizontal: true,
            flip_vertical: true,
            ..Default::default()
        };
        let oriented = state.orient(marker_image());
        assert_eq!(oriented.get_pixel(2, 1).0[0], 255);
    }

    #[test]
    fn test_rotation_cycle() {
        let mut r = Rotation::None;
        for _ in 0..4 {
            r = r.rotate_cw();
        }
        assert_eq!(r, Rotation::None);
        assert_eq!(Rotation::None.rotate_ccw(), Rotation::Cw270);
    }

    #[test]
    fn test_reset_keeps_given_window() {
        let mut state = DisplayState {
            inverted: true,
            pan: Point::new(4.0, 4.0),
            ..Default::default()
        };
        state.set_zoom(3.0, 0.1, 5.0);
        state.reset(WindowLevel::new(-600.0, 1500.0));
        assert_eq!(state.zoom(), 1.0);
        assert!(!state.inverted);
        assert_eq!(state.window, WindowLevel::new(-600.0, 1500.0));
    }
}
