//! Shared types for the capture/diff/encode pipeline.
//!
//! [`Frame`] is the in-memory raster passed between pipeline stages.
//! [`EncodedRegion`] is the serialisable wire unit carried in patch
//! batches and full-frame messages.

use serde::{Deserialize, Serialize};

/// Bytes per pixel of every raster: R, G, B, A.
pub const BYTES_PER_PIXEL: usize = 4;

// ── ScreenSize ───────────────────────────────────────────────────

/// Host screen dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of bytes a tightly packed raster of this size occupies, or
    /// `None` if that does not fit in `usize`.
    pub fn byte_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(BYTES_PER_PIXEL)
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// A rasterized screen sample.
///
/// `pixels` holds `height` rows of `width * 4` bytes, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    /// Create a frame filled with a single byte value.
    ///
    /// # Panics
    ///
    /// Panics if the raster cannot be allocated. Sizes from the wire go
    /// through [`Reassembler`](crate::stream::Reassembler) instead.
    pub fn filled(width: u32, height: u32, fill: u8) -> Self {
        let len = ScreenSize::new(width, height).byte_len().unwrap_or(usize::MAX);
        Self {
            width,
            height,
            pixels: vec![fill; len],
        }
    }

    /// Wrap an existing buffer, checking its length.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        (ScreenSize::new(width, height).byte_len() == Some(pixels.len())).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn size(&self) -> ScreenSize {
        ScreenSize::new(self.width, self.height)
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// The 4 channel bytes of pixel `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let offset = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        &self.pixels[offset..offset + BYTES_PER_PIXEL]
    }

    /// Mutable access to pixel `(x, y)`.
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let offset = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        &mut self.pixels[offset..offset + BYTES_PER_PIXEL]
    }

    /// Copy the pixels of `rect` into a tightly packed buffer.
    pub fn extract(&self, rect: &BlockRect) -> Vec<u8> {
        let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
        let mut out = Vec::with_capacity(row_bytes * rect.height as usize);
        for row in 0..rect.height {
            let offset =
                (rect.y + row) as usize * self.stride() + rect.x as usize * BYTES_PER_PIXEL;
            out.extend_from_slice(&self.pixels[offset..offset + row_bytes]);
        }
        out
    }
}

// ── BlockRect ────────────────────────────────────────────────────

/// A rectangular region of a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BlockRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the rectangle lies fully inside a `size` raster.
    pub fn fits_within(&self, size: ScreenSize) -> bool {
        self.width > 0
            && self.height > 0
            && (self.x as u64 + self.width as u64) <= size.width as u64
            && (self.y as u64 + self.height as u64) <= size.height as u64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

// ── EncodedRegion ────────────────────────────────────────────────

/// One changed rectangle and its encoded pixels: `{x, y, w, h, encodedBytes}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedRegion {
    pub rect: BlockRect,
    pub encoded: Vec<u8>,
}
