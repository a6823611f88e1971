//! Viewer-side raster reconstruction.
//!
//! Keeps a full-screen buffer sized to the announced host dimensions and
//! patches decoded regions into it. Each region is decoded completely
//! before a single byte of the buffer is touched, so a blit is either
//! applied whole or not at all.

use tracing::{debug, warn};

use crate::codec::MAX_PAYLOAD_SIZE;
use crate::error::SheetError;
use crate::stream::encoder::decode_region;
use crate::stream::types::{BYTES_PER_PIXEL, EncodedRegion, Frame, ScreenSize};

fn blank(size: ScreenSize) -> Result<Frame, SheetError> {
    match size.byte_len() {
        Some(len) if len <= MAX_PAYLOAD_SIZE => Ok(Frame::filled(size.width, size.height, 0)),
        _ => Err(SheetError::Protocol(format!(
            "screen size {}x{} exceeds the {MAX_PAYLOAD_SIZE}-byte raster limit",
            size.width, size.height
        ))),
    }
}

// ── Reassembler ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct Reassembler {
    frame: Frame,
    /// Regions successfully blitted since creation.
    applied: u64,
    /// Regions skipped as malformed.
    skipped: u64,
}

impl Reassembler {
    /// Create a buffer for the announced screen size, initially black.
    ///
    /// Sizes whose raster could not travel in one link frame are refused.
    pub fn new(size: ScreenSize) -> Result<Self, SheetError> {
        Ok(Self {
            frame: blank(size)?,
            applied: 0,
            skipped: 0,
        })
    }

    pub fn size(&self) -> ScreenSize {
        self.frame.size()
    }

    /// The current reconstructed raster.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Re-announce the screen size. A change discards the buffer; a
    /// refused size leaves it untouched.
    pub fn resize(&mut self, size: ScreenSize) -> Result<(), SheetError> {
        if size != self.frame.size() {
            self.frame = blank(size)?;
            debug!(?size, "reassembly buffer resized");
        }
        Ok(())
    }

    /// Replace the whole buffer with a full-frame region.
    ///
    /// The region must cover the announced dimensions exactly.
    pub fn apply_full(&mut self, region: &EncodedRegion) -> Result<(), SheetError> {
        let size = self.frame.size();
        if region.rect.x != 0
            || region.rect.y != 0
            || region.rect.width != size.width
            || region.rect.height != size.height
        {
            self.skipped += 1;
            return Err(SheetError::Protocol(format!(
                "full frame {:?} does not match {}x{} buffer",
                region.rect, size.width, size.height
            )));
        }
        let pixels = decode_region(region).inspect_err(|_| self.skipped += 1)?;
        self.frame.pixels = pixels;
        self.applied += 1;
        Ok(())
    }

    /// Blit every well-formed region of a patch batch.
    ///
    /// Malformed or out-of-bounds regions are skipped; returns the number
    /// of regions applied.
    pub fn apply_batch(&mut self, batch: &[EncodedRegion]) -> usize {
        let mut count = 0;
        for region in batch {
            match self.apply_region(region) {
                Ok(()) => count += 1,
                Err(e) => {
                    self.skipped += 1;
                    warn!(rect = ?region.rect, "skipping malformed patch: {e}");
                }
            }
        }
        self.applied += count as u64;
        count
    }

    fn apply_region(&mut self, region: &EncodedRegion) -> Result<(), SheetError> {
        let rect = region.rect;
        if !rect.fits_within(self.frame.size()) {
            return Err(SheetError::Protocol(format!(
                "patch {rect:?} outside {}x{} buffer",
                self.frame.width, self.frame.height
            )));
        }

        let pixels = decode_region(region)?;

        let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
        let stride = self.frame.stride();
        for (row, src) in pixels.chunks_exact(row_bytes).enumerate() {
            let dst = (rect.y as usize + row) * stride + rect.x as usize * BYTES_PER_PIXEL;
            self.frame.pixels[dst..dst + row_bytes].copy_from_slice(src);
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
