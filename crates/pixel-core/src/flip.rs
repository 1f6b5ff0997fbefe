//! In-place vertical flip of interleaved pixel buffers.
//!
//! Bottom-up sources (OpenGL readbacks, some capture APIs) deliver the last
//! image row first. Flipping happens in the caller's buffer: the source is
//! altered, not copied.

use framerec_common::error::{FramerecError, FramerecResult};

/// Flips buffers using one scratch row that is reused between calls.
#[derive(Debug, Default, Clone)]
pub struct RowFlipper {
    scratch: Vec<u8>,
}

impl RowFlipper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap row `y` with row `rows - 1 - y` for every `y < rows / 2`.
    ///
    /// `buffer` must hold at least `width * rows * pixel_stride` bytes; any
    /// trailing bytes are left alone. With an odd row count the middle row
    /// stays where it is.
    pub fn flip(
        &mut self,
        buffer: &mut [u8],
        width: u32,
        rows: u32,
        pixel_stride: usize,
    ) -> FramerecResult<()> {
        let row_len = width as usize * pixel_stride;
        let needed = row_len * rows as usize;
        if buffer.len() < needed {
            return Err(FramerecError::FrameSize {
                expected: needed,
                actual: buffer.len(),
            });
        }
        if row_len == 0 || rows < 2 {
            return Ok(());
        }

        self.scratch.resize(row_len, 0);
        let rows = rows as usize;
        for y in 0..rows / 2 {
            let top = y * row_len;
            let bottom = (rows - 1 - y) * row_len;
            self.scratch.copy_from_slice(&buffer[top..top + row_len]);
            buffer.copy_within(bottom..bottom + row_len, top);
            buffer[bottom..bottom + row_len].copy_from_slice(&self.scratch);
        }
        Ok(())
    }
}

/// One-shot flip with a temporary scratch row.
pub fn flip_vertical(
    buffer: &mut [u8],
    width: u32,
    rows: u32,
    pixel_stride: usize,
) -> FramerecResult<()> {
    RowFlipper::new().flip(buffer, width, rows, pixel_stride)
}
