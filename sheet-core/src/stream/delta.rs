//! Block-level change detection between consecutive rasters.
//!
//! Divides the screen into `block_size × block_size` tiles and compares
//! each tile pixel-by-pixel against the previous raster, stopping at the
//! first differing pixel. Only tiles that differ are reported.

use std::cmp;

use crate::stream::types::{BYTES_PER_PIXEL, BlockRect, Frame};

/// Default tile edge in pixels.
pub const DEFAULT_BLOCK_SIZE: u32 = 64;

// ── Partitioning ─────────────────────────────────────────────────

/// Row-major grid of tiles covering a `width × height` raster.
///
/// Edge tiles are clipped to `min(block_size, remaining)`, so every tile
/// has a positive size and the tiles cover the raster exactly once.
pub fn partition(width: u32, height: u32, block_size: u32) -> impl Iterator<Item = BlockRect> {
    assert!(block_size > 0, "block_size must be > 0");
    let blocks_x = width.div_ceil(block_size);
    let blocks_y = height.div_ceil(block_size);

    (0..blocks_y).flat_map(move |by| {
        (0..blocks_x).map(move |bx| {
            let x = bx * block_size;
            let y = by * block_size;
            BlockRect {
                x,
                y,
                width: cmp::min(block_size, width - x),
                height: cmp::min(block_size, height - y),
            }
        })
    })
}

// ── DeltaDetector ────────────────────────────────────────────────

/// Stateless comparator for two equally sized rasters.
#[derive(Debug, Clone, Copy)]
pub struct DeltaDetector {
    block_size: u32,
}

impl DeltaDetector {
    /// Create a detector with the given tile size (in pixels).
    pub fn new(block_size: u32) -> Self {
        assert!(block_size > 0, "block_size must be > 0");
        Self { block_size }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Tiles of `current` that differ from `previous`.
    ///
    /// Both rasters must have the same dimensions.
    pub fn changed_blocks(&self, previous: &Frame, current: &Frame) -> Vec<BlockRect> {
        debug_assert_eq!(previous.size(), current.size());
        partition(current.width, current.height, self.block_size)
            .filter(|rect| Self::block_differs(previous, current, rect))
            .collect()
    }

    /// Pixel-by-pixel scan of one tile; returns at the first difference.
    fn block_differs(previous: &Frame, current: &Frame, rect: &BlockRect) -> bool {
        let stride = current.stride();

        for y in rect.y..rect.y + rect.height {
            let row = y as usize * stride;
            for x in rect.x..rect.x + rect.width {
                let offset = row + x as usize * BYTES_PER_PIXEL;
                let cur = &current.pixels[offset..offset + BYTES_PER_PIXEL];
                let prev = &previous.pixels[offset..offset + BYTES_PER_PIXEL];
                if cur != prev {
                    return true;
                }
            }
        }
        false
    }
}

impl Default for DeltaDetector {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

// ── Tests ────────────────────────────────────────────────────────
