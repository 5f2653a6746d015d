//! Per-module ring cache of generated frames
//!
//! Each module owns one [`FrameBuffer`]: a contiguous window of the most
//! recently generated frames, addressed by the frame index of the last
//! generated position. Rows live in a flat `capacity × dim` allocation and
//! are mapped by `frame mod capacity`, so the physical layout never moves
//! when the window slides forward.
//!
//! The empty state is explicit (`last_pos == None`), never a sentinel frame
//! index. Growing the capacity invalidates all cached content; the shared
//! buffering algorithm recomputes the window under the new layout on the
//! next access.

use crate::vector::FeatureVec;

/// Ring cache holding the window `[last_pos - capacity + 1, last_pos]`.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<f32>,
    dim: usize,
    capacity: usize,
    last_pos: Option<i64>,
}

impl FrameBuffer {
    /// Create an unconfigured, empty buffer.
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            dim: 0,
            capacity: 0,
            last_pos: None,
        }
    }

    /// Set the row width. Discards all content.
    pub fn set_dim(&mut self, dim: usize) {
        assert!(dim > 0, "frame buffer dimension must be positive");
        self.dim = dim;
        self.data = vec![0.0; self.capacity * dim];
        self.last_pos = None;
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grow the window to `capacity` frames, invalidating cached content.
    /// Capacity only ever grows for the lifetime of a module.
    pub fn grow(&mut self, capacity: usize) {
        assert!(
            capacity >= self.capacity,
            "frame buffer capacity must not shrink"
        );
        self.capacity = capacity;
        self.data = vec![0.0; capacity * self.dim];
        self.last_pos = None;
    }

    /// Mark the buffer empty without touching its layout.
    pub fn invalidate(&mut self) {
        self.last_pos = None;
    }

    pub fn last_pos(&self) -> Option<i64> {
        self.last_pos
    }

    /// Move the window so that `frame` is the last valid position.
    pub fn advance_to(&mut self, frame: i64) {
        self.last_pos = Some(frame);
    }

    /// Is `frame` inside the currently valid window?
    pub fn contains(&self, frame: i64) -> bool {
        match self.last_pos {
            Some(last) => frame <= last && frame > last - self.capacity as i64,
            None => false,
        }
    }

    fn row_index(&self, frame: i64) -> usize {
        frame.rem_euclid(self.capacity as i64) as usize * self.dim
    }

    /// Borrow the cache row for `frame` (valid or not).
    pub fn row(&self, frame: i64) -> &[f32] {
        let start = self.row_index(frame);
        &self.data[start..start + self.dim]
    }

    /// Mutably borrow the cache row for `frame`.
    pub fn row_mut(&mut self, frame: i64) -> &mut [f32] {
        let start = self.row_index(frame);
        &mut self.data[start..start + self.dim]
    }

    /// Copy the cache row for `frame` into an owned vector.
    pub fn copy_row(&self, frame: i64) -> FeatureVec {
        FeatureVec::from(self.row(frame))
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(dim: usize, capacity: usize) -> FrameBuffer {
        let mut b = FrameBuffer::new();
        b.set_dim(dim);
        b.grow(capacity);
        b
    }

    #[test]
    fn test_empty_contains_nothing() {
        let b = buffer(2, 4);
        assert!(!b.contains(0));
        assert!(!b.contains(-1));
    }

    #[test]
    fn test_window_membership() {
        let mut b = buffer(2, 4);
        b.advance_to(10);
        assert!(b.contains(10));
        assert!(b.contains(7));
        assert!(!b.contains(6));
        assert!(!b.contains(11));
    }

    #[test]
    fn test_rows_survive_forward_slide() {
        let mut b = buffer(1, 3);
        for f in 0..3 {
            b.advance_to(f);
            b.row_mut(f)[0] = f as f32;
        }
        // Sliding to frame 3 reuses the physical row of frame 0.
        b.advance_to(3);
        b.row_mut(3)[0] = 3.0;
        assert_eq!(b.row(1)[0], 1.0);
        assert_eq!(b.row(2)[0], 2.0);
        assert_eq!(b.row(3)[0], 3.0);
    }

    #[test]
    fn test_negative_frames_map_to_rows() {
        let mut b = buffer(2, 4);
        b.advance_to(-1);
        b.row_mut(-1).copy_from_slice(&[5.0, 6.0]);
        assert_eq!(b.copy_row(-1).as_slice(), &[5.0, 6.0]);
    }

    #[test]
    fn test_grow_invalidates() {
        let mut b = buffer(2, 2);
        b.advance_to(1);
        assert!(b.contains(1));
        b.grow(5);
        assert!(!b.contains(1));
        assert_eq!(b.capacity(), 5);
    }

    #[test]
    #[should_panic]
    fn test_shrink_panics() {
        let mut b = buffer(2, 4);
        b.grow(2);
    }
}
