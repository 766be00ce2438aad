use std::sync::{Arc, Mutex};

use image::{imageops, Rgb, RgbImage};

use crate::draw;

/// Fixed raster layout: slots fill a near-square grid row-major, 2x2 for
/// four slots. Cell size never changes at runtime, so detection positions
/// always map back to the same slot geometry.
#[derive(Debug, Clone, Copy)]
pub struct GridGeometry {
    pub cols: u32,
    pub rows: u32,
    pub cell_width: u32,
    pub cell_height: u32,
}

impl GridGeometry {
    pub fn new(slot_count: usize, cell_width: u32, cell_height: u32) -> Self {
        let n = slot_count.max(1) as u32;
        let cols = (n as f64).sqrt().ceil() as u32;
        let rows = n.div_ceil(cols);
        Self {
            cols,
            rows,
            cell_width,
            cell_height,
        }
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.cols * self.cell_width, self.rows * self.cell_height)
    }

    /// Top-left corner of a slot's cell on the canvas.
    pub fn cell_origin(&self, slot: usize) -> (u32, u32) {
        let col = slot as u32 % self.cols;
        let row = slot as u32 / self.cols;
        (col * self.cell_width, row * self.cell_height)
    }

    /// Map a canvas-space point to the slot whose cell contains it. Points on
    /// a cell's right or bottom edge belong to the next cell over; anything
    /// outside the canvas clamps to the nearest cell.
    pub fn slot_for_center(&self, x: f32, y: f32) -> usize {
        let col = (x / self.cell_width as f32).floor() as i64;
        let row = (y / self.cell_height as f32).floor() as i64;
        let col = col.clamp(0, self.cols as i64 - 1) as u32;
        let row = row.clamp(0, self.rows as i64 - 1) as u32;
        (row * self.cols + col) as usize
    }
}

/// Builds and holds the composited canvas. Rebuilds are serialized and the
/// finished canvas is swapped in atomically, so readers keep whatever
/// complete canvas they last cloned.
pub struct MergeEngine {
    geometry: GridGeometry,
    slot_count: usize,
    canvas: Mutex<Arc<RgbImage>>,
    rebuild: Mutex<()>,
}

impl MergeEngine {
    pub fn new(slot_count: usize, cell_width: u32, cell_height: u32) -> Self {
        let geometry = GridGeometry::new(slot_count, cell_width, cell_height);
        let initial = compose(&geometry, slot_count, &vec![None; slot_count]);
        Self {
            geometry,
            slot_count,
            canvas: Mutex::new(Arc::new(initial)),
            rebuild: Mutex::new(()),
        }
    }

    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    /// The current complete canvas. Cheap: clones the Arc, never the pixels.
    pub fn current(&self) -> Arc<RgbImage> {
        Arc::clone(&self.canvas.lock().expect("canvas lock poisoned"))
    }

    /// Rebuild the canvas and swap it in. `snapshot` runs inside the
    /// rebuild lock, so when concurrent slot updates race, the frames each
    /// rebuild composes are at least as new as the canvas it replaces; a
    /// stale snapshot can never be swapped in over a fresher one.
    pub fn recompose_with<F>(&self, snapshot: F) -> Arc<RgbImage>
    where
        F: FnOnce() -> Vec<Option<Arc<RgbImage>>>,
    {
        let _serialize = self.rebuild.lock().expect("rebuild lock poisoned");
        let frames = snapshot();
        let next = Arc::new(compose(&self.geometry, self.slot_count, &frames));
        let mut current = self.canvas.lock().expect("canvas lock poisoned");
        *current = Arc::clone(&next);
        next
    }

    /// Rebuild from an explicit frame list. Prefer `recompose_with` when
    /// the frames come from live slot state.
    pub fn recompose(&self, frames: &[Option<Arc<RgbImage>>]) -> Arc<RgbImage> {
        self.recompose_with(|| frames.to_vec())
    }

    /// A slot's placeholder rendered standalone at cell size, the same
    /// image an empty cell shows on the canvas. Served on a slot's topic
    /// while it has no source.
    pub fn placeholder_cell(&self, slot: usize) -> RgbImage {
        let mut cell = RgbImage::new(self.geometry.cell_width, self.geometry.cell_height);
        draw_placeholder(&mut cell, slot, 0, 0, &self.geometry);
        cell
    }
}

fn compose(
    geometry: &GridGeometry,
    slot_count: usize,
    frames: &[Option<Arc<RgbImage>>],
) -> RgbImage {
    let (width, height) = geometry.canvas_size();
    let mut canvas = RgbImage::new(width, height);
    for slot in 0..slot_count {
        let (ox, oy) = geometry.cell_origin(slot);
        match frames.get(slot).and_then(|f| f.as_ref()) {
            Some(frame) => blit_fitted(&mut canvas, frame, ox, oy, geometry),
            None => draw_placeholder(&mut canvas, slot, ox, oy, geometry),
        }
    }
    canvas
}

/// Resize the frame to fit its cell preserving aspect ratio, then center it
/// with letterbox padding. Never crops.
fn blit_fitted(canvas: &mut RgbImage, frame: &RgbImage, ox: u32, oy: u32, geometry: &GridGeometry) {
    let (fw, fh) = frame.dimensions();
    if fw == 0 || fh == 0 {
        return;
    }
    let (cw, ch) = (geometry.cell_width, geometry.cell_height);
    let scale = (cw as f32 / fw as f32).min(ch as f32 / fh as f32);
    let new_w = ((fw as f32 * scale).round() as u32).clamp(1, cw);
    let new_h = ((fh as f32 * scale).round() as u32).clamp(1, ch);

    let pad_x = (cw - new_w) / 2;
    let pad_y = (ch - new_h) / 2;

    if (new_w, new_h) == (fw, fh) {
        imageops::replace(canvas, frame, (ox + pad_x) as i64, (oy + pad_y) as i64);
    } else {
        let resized = imageops::resize(frame, new_w, new_h, imageops::FilterType::Triangle);
        imageops::replace(canvas, &resized, (ox + pad_x) as i64, (oy + pad_y) as i64);
    }
}

fn draw_placeholder(canvas: &mut RgbImage, slot: usize, ox: u32, oy: u32, geometry: &GridGeometry) {
    let label = format!("CAM {} NO SIGNAL", slot);
    let scale = 2;
    let text_w = draw::text_width(&label, scale);
    let text_h = draw::GLYPH_HEIGHT * scale;
    let x = ox as i64 + (geometry.cell_width.saturating_sub(text_w) / 2) as i64;
    let y = oy as i64 + (geometry.cell_height.saturating_sub(text_h) / 2) as i64;
    draw::draw_text(canvas, &label, x, y, scale, Rgb([200, 200, 200]));
}
