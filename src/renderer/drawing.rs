//! Renderer-side drawing area
//!
//! Pure state machine for the chunked paint protocol: dirty-region
//! accumulation, one un-acknowledged update chunk in flight at a time, a
//! full repaint folded into the synchronous resize reply. The page owns
//! the timer and the painting; this type only decides what to paint and
//! when sending is allowed.

use crate::messages::Rect;

#[derive(Debug)]
pub struct ChunkedDrawingArea {
    width: u32,
    height: u32,
    dirty: Rect,
    /// An Update was sent and its ack has not arrived; further paints wait.
    awaiting_ack: bool,
}

impl ChunkedDrawingArea {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            dirty: Rect::new(0, 0, 0, 0),
            awaiting_ack: false,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Accumulate damage. Returns true when this damage needs a display
    /// pass scheduled (it is new and nothing is queued behind an ack).
    pub fn set_needs_display(&mut self, rect: Rect) -> bool {
        let had_damage = !self.dirty.is_empty();
        self.dirty = self.dirty.union(&rect);
        !had_damage && !self.dirty.is_empty() && !self.awaiting_ack
    }

    pub fn set_needs_display_in_entire_area(&mut self) -> bool {
        self.set_needs_display(Rect::new(0, 0, self.width, self.height))
    }

    /// Claim the damage for painting. `None` when there is nothing to
    /// paint or the previous chunk is still unacknowledged. A `Some` rect
    /// transitions into the awaiting-ack state.
    pub fn begin_display(&mut self) -> Option<Rect> {
        if self.awaiting_ack {
            return None;
        }
        let rect = self.dirty.intersect_with_size(self.width, self.height);
        if rect.is_empty() {
            self.dirty = Rect::new(0, 0, 0, 0);
            return None;
        }
        self.dirty = Rect::new(0, 0, 0, 0);
        self.awaiting_ack = true;
        Some(rect)
    }

    /// The browser acknowledged the in-flight chunk. Returns true when
    /// damage accumulated in the meantime and another pass is due.
    pub fn did_update(&mut self) -> bool {
        self.awaiting_ack = false;
        !self.dirty.is_empty()
    }

    /// Resize. The caller paints the returned full rect into the
    /// synchronous reply; accumulated damage is subsumed by it.
    pub fn resize(&mut self, width: u32, height: u32) -> Rect {
        self.width = width;
        self.height = height;
        self.dirty = Rect::new(0, 0, 0, 0);
        Rect::new(0, 0, width, height)
    }
}
