//! Continuous-encoder variant of the relayed stream.
//!
//! No diffing: every sampled raster goes through an inter-frame encoder
//! and comes out as one timestamp-ordered [`StreamChunk`]. The decoder
//! keeps state across chunks and therefore needs gapless, in-order
//! delivery.
//!
//! The built-in codec is `xor-zstd`:
//!
//! - keyframe: zstd-compressed raster,
//! - inter frame: zstd-compressed XOR against the previous raster (static
//!   screen regions turn into runs of zeroes).

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SheetError;
use crate::stream::types::{Frame, ScreenSize};

/// Name of the built-in inter-frame codec.
pub const XOR_ZSTD: &str = "xor-zstd";

/// Codecs this build can encode and decode.
pub const SUPPORTED_CODECS: &[&str] = &[XOR_ZSTD];

/// Default number of chunks between keyframes.
pub const DEFAULT_KEYFRAME_INTERVAL: u32 = 60;

/// Pick the first entry of `preferences` that is in `supported`.
///
/// Fails with [`SheetError::NoSupportedCodec`] when nothing matches.
pub fn negotiate(preferences: &[String], supported: &[&str]) -> Result<String, SheetError> {
    preferences
        .iter()
        .find(|p| supported.iter().any(|s| s.eq_ignore_ascii_case(p)))
        .map(|p| p.to_ascii_lowercase())
        .ok_or_else(|| SheetError::NoSupportedCodec(preferences.to_vec()))
}

// ── StreamChunk ──────────────────────────────────────────────────

/// One unit of the continuous bitstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Gapless counter starting at 0.
    pub sequence: u64,
    /// Microseconds since the encoder started.
    pub timestamp_us: u64,
    pub keyframe: bool,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

// ── ContinuousEncoder ────────────────────────────────────────────

pub struct ContinuousEncoder {
    codec: String,
    keyframe_interval: u32,
    compression_level: i32,
    previous: Option<Frame>,
    sequence: u64,
    since_keyframe: u32,
    started: Instant,
}

impl ContinuousEncoder {
    /// Build an encoder for a negotiated codec name.
    pub fn for_codec(codec: &str, keyframe_interval: u32) -> Result<Self, SheetError> {
        if !codec.eq_ignore_ascii_case(XOR_ZSTD) {
            return Err(SheetError::NoSupportedCodec(vec![codec.to_string()]));
        }
        Ok(Self {
            codec: XOR_ZSTD.to_string(),
            keyframe_interval: keyframe_interval.max(1),
            compression_level: 1,
            previous: None,
            sequence: 0,
            since_keyframe: 0,
            started: Instant::now(),
        })
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    /// Force the next chunk to be a keyframe.
    pub fn request_keyframe(&mut self) {
        self.previous = None;
    }

    /// Encode one raster into the next chunk of the stream.
    pub fn encode(&mut self, frame: &Frame) -> Result<StreamChunk, SheetError> {
        let keyframe = match &self.previous {
            None => true,
            Some(prev) => {
                prev.size() != frame.size() || self.since_keyframe >= self.keyframe_interval
            }
        };

        let payload = match (&self.previous, keyframe) {
            (Some(prev), false) => xor(&prev.pixels, &frame.pixels),
            _ => frame.pixels.clone(),
        };
        let bytes = zstd::encode_all(payload.as_slice(), self.compression_level)
            .map_err(|e| SheetError::Encoding(format!("chunk encode failed: {e}")))?;

        let chunk = StreamChunk {
            sequence: self.sequence,
            timestamp_us: self.started.elapsed().as_micros() as u64,
            keyframe,
            width: frame.width,
            height: frame.height,
            bytes,
        };

        self.sequence = self.sequence.wrapping_add(1);
        self.since_keyframe = if keyframe { 1 } else { self.since_keyframe + 1 };
        self.previous = Some(frame.clone());
        Ok(chunk)
    }
}

// ── OrderedChunkDecoder ──────────────────────────────────────────

/// Streaming decoder that refuses to run past a gap.
#[derive(Debug, Default)]
pub struct OrderedChunkDecoder {
    next_sequence: Option<u64>,
    previous: Option<Frame>,
}

impl OrderedChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an inter frame would currently be accepted.
    pub fn is_synchronized(&self) -> bool {
        self.previous.is_some()
    }

    /// Feed the next chunk in arrival order.
    ///
    /// A sequence gap, or an inter frame without decoder state, is a
    /// protocol error; the decoder then waits for the next keyframe.
    pub fn decode(&mut self, chunk: &StreamChunk) -> Result<&Frame, SheetError> {
        if let Some(expected) = self.next_sequence {
            if chunk.sequence != expected {
                warn!(expected, got = chunk.sequence, "chunk sequence gap");
                self.previous = None;
                if !chunk.keyframe {
                    self.next_sequence = Some(chunk.sequence.wrapping_add(1));
                    return Err(SheetError::Protocol(format!(
                        "sequence gap: expected {expected}, got {}",
                        chunk.sequence
                    )));
                }
            }
        }
        self.next_sequence = Some(chunk.sequence.wrapping_add(1));

        let size = ScreenSize::new(chunk.width, chunk.height);
        let payload = zstd::decode_all(chunk.bytes.as_slice()).map_err(|e| {
            self.previous = None;
            SheetError::Encoding(format!("chunk decode failed: {e}"))
        })?;
        if size.byte_len() != Some(payload.len()) {
            self.previous = None;
            return Err(SheetError::Encoding(format!(
                "chunk {} decoded to {} bytes, not a {}x{} raster",
                chunk.sequence,
                payload.len(),
                size.width,
                size.height
            )));
        }

        let frame = if chunk.keyframe {
            Frame::from_pixels(chunk.width, chunk.height, payload)
        } else {
            match self.previous.take() {
                Some(prev) if prev.size() == size => {
                    Frame::from_pixels(chunk.width, chunk.height, xor(&prev.pixels, &payload))
                }
                _ => {
                    debug!(sequence = chunk.sequence, "inter frame without keyframe");
                    return Err(SheetError::Protocol(format!(
                        "inter frame {} without a preceding keyframe",
                        chunk.sequence
                    )));
                }
            }
        };

        match frame {
            Some(frame) => Ok(&*self.previous.insert(frame)),
            None => Err(SheetError::Encoding("chunk raster size mismatch".into())),
        }
    }
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

// ── Tests ────────────────────────────────────────────────────────
