//! Interaction tools as a tagged union. Each variant carries only the state
//! its gesture needs; the session applies the returned [`ToolOutput`].

use crate::config::ViewerConfig;
use crate::coords::Point;
use crate::measurement::MeasurementKind;

/// Selectable tool, without gesture state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolMode {
    Windowing,
    Pan,
    Zoom,
    MeasureDistance,
    MeasureAngle,
    MeasureRectangle,
    MeasureEllipse,
    MeasureFreehand,
    Annotate,
}

impl ToolMode {
    pub fn measurement_kind(self) -> Option<MeasurementKind> {
        match self {
            Self::MeasureDistance => Some(MeasurementKind::Distance),
            Self::MeasureAngle => Some(MeasurementKind::Angle),
            Self::MeasureRectangle => Some(MeasurementKind::Rectangle),
            Self::MeasureEllipse => Some(MeasurementKind::Ellipse),
            Self::MeasureFreehand => Some(MeasurementKind::Freehand),
            _ => None,
        }
    }
}

/// A pointer position in both coordinate spaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointer {
    pub canvas: Point,
    pub image: Point,
}

/// Point collection of a measurement tool, in image space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasureState {
    pub points: Vec<Point>,
    /// Trailing point following the pointer until it is fixed.
    pub provisional: Option<Point>,
    pub pressed: bool,
}

impl MeasureState {
    pub fn is_collecting(&self) -> bool {
        !self.points.is_empty()
    }

    /// Fixed points followed by the provisional one.
    pub fn preview_points(&self) -> Vec<Point> {
        self.points.iter().copied().chain(self.provisional).collect()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tool {
    Windowing { last: Option<Point> },
    Pan { last: Option<Point> },
    Zoom { last: Option<Point> },
    Measure {
        kind: MeasurementKind,
        state: MeasureState,
    },
    Annotate,
}

/// What the session should do after a tool handled an event.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    None,
    AdjustWindow { width_delta: f64, level_delta: f64 },
    Pan(Point),
    Zoom(f64),
    Preview,
    Complete {
        kind: MeasurementKind,
        points: Vec<Point>,
    },
    PromptAnnotation(Point),
}

impl Tool {
    pub fn new(mode: ToolMode) -> Self {
        match mode {
            ToolMode::Windowing => Self::Windowing { last: None },
            ToolMode::Pan => Self::Pan { last: None },
            ToolMode::Zoom => Self::Zoom { last: None },
            ToolMode::Annotate => Self::Annotate,
            measure => Self::Measure {
                kind: measure
                    .measurement_kind()
                    .unwrap_or(MeasurementKind::Distance),
                state: MeasureState::default(),
            },
        }
    }

    pub fn mode(&self) -> ToolMode {
        match self {
            Self::Windowing { .. } => ToolMode::Windowing,
            Self::Pan { .. } => ToolMode::Pan,
            Self::Zoom { .. } => ToolMode::Zoom,
            Self::Annotate => ToolMode::Annotate,
            Self::Measure { kind, .. } => match kind {
                MeasurementKind::Distance => ToolMode::MeasureDistance,
                MeasurementKind::Angle => ToolMode::MeasureAngle,
                MeasurementKind::Rectangle => ToolMode::MeasureRectangle,
                MeasurementKind::Ellipse => ToolMode::MeasureEllipse,
                MeasurementKind::Freehand => ToolMode::MeasureFreehand,
            },
        }
    }

    pub fn measure_state(&self) -> Option<&MeasureState> {
        match self {
            Self::Measure { state, .. } => Some(state),
            _ => None,
        }
    }

    pub fn pointer_down(&mut self, pointer: Pointer) -> ToolOutput {
        match self {
            Self::Windowing { last } | Self::Pan { last } | Self::Zoom { last } => {
                *last = Some(pointer.canvas);
                ToolOutput::None
            }
            Self::Measure { state, .. } => {
                state.pressed = true;
                if state.points.is_empty() {
                    state.points.push(pointer.image);
                }
                state.provisional = Some(pointer.image);
                ToolOutput::Preview
            }
            Self::Annotate => ToolOutput::PromptAnnotation(pointer.image),
        }
    }

    pub fn pointer_move(&mut self, pointer: Pointer, config: &ViewerConfig) -> ToolOutput {
        match self {
            Self::Windowing { last: Some(last) } => {
                let delta = pointer.canvas - *last;
                *last = pointer.canvas;
                ToolOutput::AdjustWindow {
                    width_delta: delta.x * config.window_width_sensitivity,
                    level_delta: delta.y * config.window_level_sensitivity,
                }
            }
            Self::Pan { last: Some(last) } => {
                let delta = pointer.canvas - *last;
                *last = pointer.canvas;
                ToolOutput::Pan(delta)
            }
            Self::Zoom { last: Some(last) } => {
                let dy = pointer.canvas.y - last.y;
                *last = pointer.canvas;
                ToolOutput::Zoom((-dy * config.zoom_drag_sensitivity).exp())
            }
            Self::Measure { kind, state } if state.is_collecting() => {
                if *kind == MeasurementKind::Freehand {
                    if state.pressed {
                        state.points.push(pointer.image);
                    }
                    return ToolOutput::Preview;
                }
                state.provisional = Some(pointer.image);
                ToolOutput::Preview
            }
            _ => ToolOutput::None,
        }
    }

    pub fn pointer_up(&mut self, pointer: Pointer) -> ToolOutput {
        match self {
            Self::Windowing { last } | Self::Pan { last } | Self::Zoom { last } => {
                *last = None;
                ToolOutput::None
            }
            Self::Measure { kind, state } if state.pressed => {
                state.pressed = false;
                let kind = *kind;
                if kind == MeasurementKind::Freehand {
                    let points = std::mem::take(&mut state.points);
                    state.clear();
                    return ToolOutput::Complete { kind, points };
                }
                state.provisional = Some(pointer.image);
                let mut points = state.preview_points();
                if points.len() >= kind.required_points() {
                    points.truncate(kind.required_points());
                    state.clear();
                    ToolOutput::Complete { kind, points }
                } else {
                    // fix the released point and keep following the pointer
                    state.points.push(pointer.image);
                    ToolOutput::Preview
                }
            }
            _ => ToolOutput::None,
        }
    }

    /// Drops any in-progress gesture without committing it.
    pub fn cancel(&mut self) -> bool {
        match self {
            Self::Measure { state, .. } if state.is_collecting() => {
                state.clear();
                true
            }
            Self::Windowing { last } | Self::Pan { last } | Self::Zoom { last } if last.is_some() => {
                *last = None;
                true
            }
            _ => false,
        }
    }
}

/// Display overlays that can be toggled independently of the active tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overlays {
    pub crosshair: bool,
    pub magnify: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64, y: f64) -> Pointer {
        Pointer {
            canvas: Point::new(x * 2.0, y * 2.0),
            image: Point::new(x, y),
        }
    }

    #[test]
    fn test_windowing_uses_delta_from_last_move() {
        let config = ViewerConfig {
            window_width_sensitivity: 2.0,
            window_level_sensitivity: 0.5,
            ..Default::default()
        };
        let mut tool = Tool::new(ToolMode::Windowing);
        assert_eq!(tool.pointer_move(at(1.0, 1.0), &config), ToolOutput::None);
        tool.pointer_down(at(0.0, 0.0));
        assert_eq!(
            tool.pointer_move(at(5.0, 0.0), &config),
            ToolOutput::AdjustWindow {
                width_delta: 20.0,
                level_delta: 0.0
            }
        );
        assert_eq!(
            tool.pointer_move(at(5.0, 2.0), &config),
            ToolOutput::AdjustWindow {
                width_delta: 0.0,
                level_delta: 2.0
            }
        );
        tool.pointer_up(at(5.0, 2.0));
        assert_eq!(tool.pointer_move(at(9.0, 9.0), &config), ToolOutput::None);
    }

    #[test]
    fn test_zoom_drag_up_zooms_in() {
        let config = ViewerConfig::default();
        let mut tool = Tool::new(ToolMode::Zoom);
        tool.pointer_down(at(0.0, 10.0));
        match tool.pointer_move(at(0.0, 0.0), &config) {
            ToolOutput::Zoom(factor) => assert!(factor > 1.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_distance_completes_on_release() {
        let config = ViewerConfig::default();
        let mut tool = Tool::new(ToolMode::MeasureDistance);
        tool.pointer_down(at(0.0, 0.0));
        assert_eq!(tool.pointer_move(at(4.0, 0.0), &config), ToolOutput::Preview);
        assert_eq!(
            tool.measure_state().unwrap().preview_points(),
            vec![Point::new(0.0, 0.0), Point::new(4.0, 0.0)]
        );
        assert_eq!(
            tool.pointer_up(at(5.0, 0.0)),
            ToolOutput::Complete {
                kind: MeasurementKind::Distance,
                points: vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0)]
            }
        );
        assert!(!tool.measure_state().unwrap().is_collecting());
        assert_eq!(tool.mode(), ToolMode::MeasureDistance);
    }

    #[test]
    fn test_angle_needs_two_gestures() {
        let config = ViewerConfig::default();
        let mut tool = Tool::new(ToolMode::MeasureAngle);
        tool.pointer_down(at(1.0, 0.0));
        assert_eq!(tool.pointer_up(at(0.0, 0.0)), ToolOutput::Preview);
        tool.pointer_move(at(0.0, 3.0), &config);
        tool.pointer_down(at(0.0, 1.0));
        assert_eq!(
            tool.pointer_up(at(0.0, 1.0)),
            ToolOutput::Complete {
                kind: MeasurementKind::Angle,
                points: vec![Point::new(1.0, 0.0), Point::new(0.0, 0.0), Point::new(0.0, 1.0)]
            }
        );
    }

    #[test]
    fn test_freehand_collects_while_pressed() {
        let config = ViewerConfig::default();
        let mut tool = Tool::new(ToolMode::MeasureFreehand);
        tool.pointer_down(at(0.0, 0.0));
        tool.pointer_move(at(4.0, 0.0), &config);
        tool.pointer_move(at(4.0, 4.0), &config);
        match tool.pointer_up(at(4.0, 4.0)) {
            ToolOutput::Complete { points, .. } => assert_eq!(points.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cancel_discards_points() {
        let mut tool = Tool::new(ToolMode::MeasureAngle);
        tool.pointer_down(at(1.0, 0.0));
        tool.pointer_up(at(0.0, 0.0));
        assert!(tool.cancel());
        assert!(!tool.measure_state().unwrap().is_collecting());
        assert!(!tool.cancel());
    }

    #[test]
    fn test_annotate_prompts_immediately() {
        let mut tool = Tool::new(ToolMode::Annotate);
        assert_eq!(
            tool.pointer_down(at(3.0, 4.0)),
            ToolOutput::PromptAnnotation(Point::new(3.0, 4.0))
        );
    }
}
