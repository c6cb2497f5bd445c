use super::{CaptureError, CaptureResult};
use crate::constants::{DRAWING_CANVAS_HEIGHT, DRAWING_CANVAS_WIDTH, DRAWING_STROKE_WIDTH};
use crate::export::encode_pixmap;
use resvg::tiny_skia::{Color, LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform};

/// Freehand canvas for handwritten formulas.
///
/// The surface is opaque white whenever it is fresh: on creation, after
/// `clear()` and after every `submit()`.
pub struct DrawingCanvas {
    pixmap: Pixmap,
    last: Option<(f32, f32)>,
}

impl DrawingCanvas {
    pub fn new() -> Result<Self, CaptureError> {
        Self::with_size(DRAWING_CANVAS_WIDTH, DRAWING_CANVAS_HEIGHT)
    }

    pub fn with_size(width: u32, height: u32) -> Result<Self, CaptureError> {
        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
            CaptureError::InvalidImage(format!("invalid canvas size {}x{}", width, height))
        })?;
        pixmap.fill(Color::WHITE);
        Ok(Self { pixmap, last: None })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Premultiplied RGBA8 pixels, row-major.
    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    pub fn is_drawing(&self) -> bool {
        self.last.is_some()
    }

    pub fn pointer_down(&mut self, x: f32, y: f32) {
        self.last = Some((x, y));
    }

    /// Extends the current path with one stroked segment.
    pub fn pointer_move(&mut self, x: f32, y: f32) {
        let Some((px, py)) = self.last else {
            return;
        };
        let mut builder = PathBuilder::new();
        builder.move_to(px, py);
        builder.line_to(x, y);
        if let Some(path) = builder.finish() {
            let mut paint = Paint::default();
            paint.set_color_rgba8(0, 0, 0, 255);
            paint.anti_alias = true;
            let stroke = Stroke {
                width: DRAWING_STROKE_WIDTH,
                line_cap: LineCap::Round,
                line_join: LineJoin::Round,
                ..Stroke::default()
            };
            self.pixmap
                .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
        self.last = Some((x, y));
    }

    pub fn pointer_up(&mut self) {
        self.last = None;
    }

    pub fn clear(&mut self) {
        self.pixmap.fill(Color::WHITE);
        self.last = None;
    }

    /// Snapshots the canvas as PNG with the drawing prompt, then clears it.
    pub fn submit(&mut self) -> Result<CaptureResult, CaptureError> {
        let png = encode_pixmap(&self.pixmap)?;
        self.clear();
        tracing::debug!(bytes = png.len(), "Drawing submitted");
        Ok(CaptureResult::drawing(png))
    }
}
