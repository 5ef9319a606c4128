//! Drawing handoff, browser side
//!
//! The renderer owns rendering; this side owns presentation. Painted
//! chunks arrive as sub-rectangles of RGBA pixels and are copied into the
//! presentation surface at the chunk's rectangle. Resizing is synchronous
//! by necessity -- the page proxy only swaps the backing surface once the
//! resize reply carries a full chunk for the new size, so stale or
//! undersized content is never presented.

use crate::messages::{Rect, UpdateChunk};

/// RGBA presentation surface.
#[derive(Debug, Clone)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        let size = width as usize * height as usize * 4;
        Self {
            width,
            height,
            pixels: vec![0; size],
        }
    }

    /// Get pixel at (x, y), or `None` out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ])
    }

    /// Copy a chunk's rows into place, clamped to the surface bounds.
    pub fn apply_chunk(&mut self, chunk: &UpdateChunk) {
        let target = chunk.rect.intersect_with_size(self.width, self.height);
        if target.is_empty() {
            return;
        }
        let chunk_stride = chunk.rect.width as usize * 4;
        let surface_stride = self.width as usize * 4;
        for row in 0..target.height as usize {
            let src_start = row * chunk_stride;
            let src = &chunk.pixels[src_start..src_start + target.width as usize * 4];
            let dst_start =
                (target.y as usize + row) * surface_stride + target.x as usize * 4;
            self.pixels[dst_start..dst_start + src.len()].copy_from_slice(src);
        }
    }
}

/// Browser-side endpoint of the drawing handoff for one page.
#[derive(Debug)]
pub struct DrawingAreaProxy {
    surface: Surface,
}

impl DrawingAreaProxy {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: Surface::new(width, height),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.surface.width, self.surface.height)
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Incorporate a one-way update chunk into the current surface.
    pub fn incorporate_update(&mut self, chunk: &UpdateChunk) {
        self.surface.apply_chunk(chunk);
    }

    /// Swap in a new surface for a completed synchronous resize. The chunk
    /// must cover the full new size; the old buffer is discarded only here.
    pub fn did_resize(&mut self, width: u32, height: u32, chunk: &UpdateChunk) {
        debug_assert_eq!(chunk.rect, Rect::new(0, 0, width, height));
        let mut surface = Surface::new(width, height);
        surface.apply_chunk(chunk);
        self.surface = surface;
    }
}
