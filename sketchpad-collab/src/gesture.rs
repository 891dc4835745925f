//! Local input side of a drawing client.
//!
//! A pointer gesture (press → move… → release) is buffered here and painted
//! optimistically segment by segment. Only at release does the buffer turn
//! into one `DrawIntent`, handed to the sync layer by value. Intermediate
//! points never reach the network.

use crate::protocol::DrawIntent;
use crate::room::{Point, Stroke, Tool};

pub const DEFAULT_BRUSH_SIZE: f64 = 5.0;
pub const DEFAULT_ERASER_SIZE: f64 = 20.0;
pub const DEFAULT_COLOR: &str = "#000000";
pub const DEFAULT_BACKGROUND: &str = "#FFFFFF";

/// Drawing surface driven by the client.
///
/// Strokes are painted as connected segments with round caps and joins.
/// An eraser stroke paints in the background color.
pub trait Renderer {
    /// Paint one segment of the gesture in progress.
    fn draw_segment(&mut self, from: Point, to: Point, color: &str, width: f64);

    /// Paint a dot where a gesture starts.
    fn draw_dot(&mut self, at: Point, color: &str, width: f64) {
        self.draw_segment(at, at, color, width);
    }

    /// Append one completed stroke on top of what is shown.
    fn draw_stroke(&mut self, stroke: &Stroke);

    /// Wipe the surface, including remote cursors.
    fn clear(&mut self);

    /// Replace everything shown with `strokes`.
    ///
    /// Full clear then replay, so an authoritative snapshot never leaves a
    /// stroke drawn twice.
    fn redraw(&mut self, strokes: &[Stroke]) {
        self.clear();
        for stroke in strokes {
            self.draw_stroke(stroke);
        }
    }

    fn show_cursor(&mut self, _user_id: &str, _at: Point, _color: &str) {}

    fn remove_cursor(&mut self, _user_id: &str) {}
}

/// Current tool, color and sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct BrushSettings {
    pub tool: Tool,
    pub color: String,
    pub brush_size: f64,
    pub eraser_size: f64,
    pub background: String,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            tool: Tool::Brush,
            color: DEFAULT_COLOR.to_string(),
            brush_size: DEFAULT_BRUSH_SIZE,
            eraser_size: DEFAULT_ERASER_SIZE,
            background: DEFAULT_BACKGROUND.to_string(),
        }
    }
}

impl BrushSettings {
    /// Line width for the active tool.
    pub fn width(&self) -> f64 {
        match self.tool {
            Tool::Brush => self.brush_size,
            Tool::Eraser => self.eraser_size,
        }
    }

    /// Color actually painted by the active tool.
    pub fn paint_color(&self) -> &str {
        match self.tool {
            Tool::Brush => &self.color,
            Tool::Eraser => &self.background,
        }
    }
}

/// Buffers the points of one gesture.
#[derive(Debug, Default)]
pub struct GestureRecorder {
    settings: BrushSettings,
    buffer: Option<Vec<Point>>,
}

impl GestureRecorder {
    pub fn new(settings: BrushSettings) -> Self {
        Self {
            settings,
            buffer: None,
        }
    }

    /// Start a gesture at `at`. A gesture already in progress is discarded.
    pub fn press<R: Renderer + ?Sized>(&mut self, at: Point, renderer: &mut R) {
        renderer.draw_dot(at, self.settings.paint_color(), self.settings.width());
        self.buffer = Some(vec![at]);
    }

    /// Extend the gesture and paint the new segment. Returns false when no
    /// gesture is active.
    pub fn move_to<R: Renderer + ?Sized>(&mut self, at: Point, renderer: &mut R) -> bool {
        let Some(buffer) = self.buffer.as_mut() else {
            return false;
        };
        let from = buffer.last().copied().unwrap_or(at);
        buffer.push(at);
        renderer.draw_segment(from, at, self.settings.paint_color(), self.settings.width());
        true
    }

    /// Finish the gesture.
    ///
    /// Yields a draw intent only for gestures of two or more points; a
    /// single click stays local.
    pub fn release(&mut self) -> Option<DrawIntent> {
        let path = self.buffer.take()?;
        if path.len() < 2 {
            return None;
        }
        Some(DrawIntent::with_path(
            path,
            self.settings.color.clone(),
            self.settings.width(),
            self.settings.tool,
        ))
    }

    pub fn is_active(&self) -> bool {
        self.buffer.is_some()
    }

    /// Points buffered so far.
    pub fn points(&self) -> &[Point] {
        self.buffer.as_deref().unwrap_or(&[])
    }

    pub fn settings(&self) -> &BrushSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut BrushSettings {
        &mut self.settings
    }
}

/// Renderer that records calls, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingRenderer {
    pub segments: Vec<(Point, Point, String, f64)>,
    pub strokes: Vec<Stroke>,
    pub clears: usize,
    pub cursors: std::collections::HashMap<String, Point>,
}

#[cfg(test)]
impl Renderer for RecordingRenderer {
    fn draw_segment(&mut self, from: Point, to: Point, color: &str, width: f64) {
        self.segments.push((from, to, color.to_string(), width));
    }

    fn draw_stroke(&mut self, stroke: &Stroke) {
        self.strokes.push(stroke.clone());
    }

    fn clear(&mut self) {
        self.clears += 1;
        self.strokes.clear();
        self.cursors.clear();
    }

    fn show_cursor(&mut self, user_id: &str, at: Point, _color: &str) {
        self.cursors.insert(user_id.to_string(), at);
    }

    fn remove_cursor(&mut self, user_id: &str) {
        self.cursors.remove(user_id);
    }
}
