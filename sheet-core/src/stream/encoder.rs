//! Region encoder with zstd compression and a quality knob.
//!
//! Every changed rectangle is encoded independently so the viewer can
//! decode and blit each one on its own:
//!
//! - the rectangle's pixels are copied out tightly packed (RGBA rows),
//! - below quality 100 the low bits of the colour channels are cleared
//!   (alpha is kept), which trades fidelity for compressibility,
//! - the result is zstd-compressed.

use crate::error::SheetError;
use crate::stream::types::{BYTES_PER_PIXEL, BlockRect, EncodedRegion, Frame};

/// Default quality (0..=100, 100 = lossless).
pub const DEFAULT_QUALITY: u8 = 70;

// ── RegionEncoder ────────────────────────────────────────────────

/// Encodes one rectangle of a raster.
pub trait RegionEncoder: Send + Sync {
    fn encode(&self, frame: &Frame, rect: &BlockRect) -> Result<Vec<u8>, SheetError>;
}

// ── ZstdRegionEncoder ────────────────────────────────────────────

/// Default encoder: optional colour quantisation followed by zstd.
#[derive(Debug, Clone)]
pub struct ZstdRegionEncoder {
    /// Quality slider 0..=100.
    quality: u8,
    /// zstd compression level (1 = fastest).
    compression_level: i32,
}

impl ZstdRegionEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.min(100),
            compression_level: 1,
        }
    }

    /// Override the zstd level (clamped to 1..=19).
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level.clamp(1, 19);
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Number of low colour bits dropped at the current quality.
    fn dropped_bits(&self) -> u32 {
        ((100 - self.quality as u32) / 25).min(3)
    }

    fn quantize(&self, pixels: &mut [u8]) {
        let bits = self.dropped_bits();
        if bits == 0 {
            return;
        }
        let mask = 0xFFu8 << bits;
        for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            px[0] &= mask;
            px[1] &= mask;
            px[2] &= mask;
        }
    }
}

impl Default for ZstdRegionEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl RegionEncoder for ZstdRegionEncoder {
    fn encode(&self, frame: &Frame, rect: &BlockRect) -> Result<Vec<u8>, SheetError> {
        if !rect.fits_within(frame.size()) {
            return Err(SheetError::Encoding(format!(
                "region {rect:?} outside {}x{} raster",
                frame.width, frame.height
            )));
        }
        let mut raw = frame.extract(rect);
        self.quantize(&mut raw);
        zstd::encode_all(raw.as_slice(), self.compression_level)
            .map_err(|e| SheetError::Encoding(format!("zstd encode failed: {e}")))
    }
}

/// Encode `rect` of `frame` into a wire region.
pub fn encode_region(
    encoder: &dyn RegionEncoder,
    frame: &Frame,
    rect: BlockRect,
) -> Result<EncodedRegion, SheetError> {
    Ok(EncodedRegion {
        rect,
        encoded: encoder.encode(frame, &rect)?,
    })
}

/// Decode a region produced by [`ZstdRegionEncoder`].
///
/// Fails unless the payload decompresses to exactly `w * h * 4` bytes.
pub fn decode_region(region: &EncodedRegion) -> Result<Vec<u8>, SheetError> {
    let pixels = zstd::decode_all(region.encoded.as_slice())
        .map_err(|e| SheetError::Encoding(format!("zstd decode failed: {e}")))?;
    let expected = region.rect.area() as usize * BYTES_PER_PIXEL;
    if pixels.len() != expected {
        return Err(SheetError::Encoding(format!(
            "region {:?} decoded to {} bytes, expected {expected}",
            region.rect,
            pixels.len()
        )));
    }
    Ok(pixels)
}

// ── Tests ────────────────────────────────────────────────────────
