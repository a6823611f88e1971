//! Diff pipeline: baseline raster, changed-block detection, per-block encode.
//!
//! One pipeline exists per relayed session. Each call to
//! [`next_increment`](DiffPipeline::next_increment) consumes a freshly
//! rasterized frame and returns the batch of changed regions to ship:
//!
//! 1. No baseline yet → the frame becomes the baseline, nothing is sent.
//! 2. Otherwise the frame is tiled and compared against the baseline.
//! 3. Every differing tile is encoded on its own; a tile that fails to
//!    encode is dropped from the batch, the others still ship.
//! 4. The frame replaces the baseline.
//!
//! [`full_frame`](DiffPipeline::full_frame) encodes a whole raster
//! regardless of diff state, for seeding late joiners.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::stream::delta::{DEFAULT_BLOCK_SIZE, DeltaDetector};
use crate::stream::encoder::{DEFAULT_QUALITY, RegionEncoder, ZstdRegionEncoder, encode_region};
use crate::stream::types::{BlockRect, EncodedRegion, Frame};

// ── PipelineConfig ───────────────────────────────────────────────

/// Tunables for [`DiffPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Tile edge in pixels (> 0).
    pub block_size: u32,
    /// Encode quality 0..=100.
    pub quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            quality: DEFAULT_QUALITY,
        }
    }
}

// ── DiffPipeline ─────────────────────────────────────────────────

pub struct DiffPipeline {
    detector: DeltaDetector,
    encoder: Arc<dyn RegionEncoder>,
    previous: Option<Frame>,
    increments: u64,
}

impl DiffPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_encoder(config, Arc::new(ZstdRegionEncoder::new(config.quality)))
    }

    /// Use a custom region encoder.
    pub fn with_encoder(config: PipelineConfig, encoder: Arc<dyn RegionEncoder>) -> Self {
        Self {
            detector: DeltaDetector::new(config.block_size),
            encoder,
            previous: None,
            increments: 0,
        }
    }

    /// Whether a baseline raster exists.
    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Number of non-empty batches produced so far.
    pub fn increments(&self) -> u64 {
        self.increments
    }

    /// Drop the baseline; the next frame becomes a new baseline.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Diff `current` against the baseline and encode the changed tiles.
    ///
    /// Returns `None` when there is nothing to send.
    pub fn next_increment(&mut self, current: Frame) -> Option<Vec<EncodedRegion>> {
        let previous = match self.previous.take() {
            Some(prev) if prev.size() == current.size() => prev,
            Some(prev) => {
                debug!(
                    from = ?prev.size(),
                    to = ?current.size(),
                    "raster size changed; rebasing"
                );
                self.previous = Some(current);
                return None;
            }
            None => {
                self.previous = Some(current);
                return None;
            }
        };

        let changed = self.detector.changed_blocks(&previous, &current);
        let batch: Vec<EncodedRegion> = changed
            .into_iter()
            .filter_map(|rect| self.encode_block(&current, rect))
            .collect();

        self.previous = Some(current);

        if batch.is_empty() {
            None
        } else {
            self.increments += 1;
            Some(batch)
        }
    }

    /// Encode an entire raster as one region, independent of diff state.
    ///
    /// A failed encode yields `None`; retrying is the caller's decision.
    pub fn full_frame(&self, frame: &Frame) -> Option<EncodedRegion> {
        let rect = BlockRect::new(0, 0, frame.width, frame.height);
        match encode_region(self.encoder.as_ref(), frame, rect) {
            Ok(region) => Some(region),
            Err(e) => {
                warn!("full-frame encode failed: {e}");
                None
            }
        }
    }

    /// Make `frame` the baseline and encode it whole.
    pub fn rebase(&mut self, frame: Frame) -> Option<EncodedRegion> {
        let region = self.full_frame(&frame);
        self.previous = Some(frame);
        region
    }

    fn encode_block(&self, frame: &Frame, rect: BlockRect) -> Option<EncodedRegion> {
        match encode_region(self.encoder.as_ref(), frame, rect) {
            Ok(region) => Some(region),
            Err(e) => {
                warn!(?rect, "dropping block from batch: {e}");
                None
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SheetError;
    use crate::stream::encoder::decode_region;

    fn pipeline() -> DiffPipeline {
        DiffPipeline::new(PipelineConfig {
            block_size: 64,
            quality: 100,
        })
    }

    #[test]
    fn first_frame_becomes_baseline_and_sends_nothing() {
        let mut p = pipeline();
        assert!(p.next_increment(Frame::filled(130, 70, 0)).is_none());
        assert!(p.has_baseline());
    }

    #[test]
    fn identical_frames_send_nothing() {
        let mut p = pipeline();
        let frame = Frame::filled(130, 70, 9);
        p.next_increment(frame.clone());
        assert!(p.next_increment(frame).is_none());
        assert_eq!(p.increments(), 0);
    }

    #[test]
    fn change_inside_one_block_yields_exactly_that_block() {
        let mut p = pipeline();
        let base = Frame::filled(130, 70, 0);
        p.next_increment(base.clone());

        let mut next = base;
        next.pixel_mut(70, 66).copy_from_slice(&[1, 2, 3, 4]);
        let batch = p.next_increment(next.clone()).unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].rect, BlockRect::new(64, 64, 64, 6));
        assert_eq!(decode_region(&batch[0]).unwrap(), next.extract(&batch[0].rect));
    }

    #[test]
    fn baseline_advances_after_each_increment() {
        let mut p = pipeline();
        let base = Frame::filled(64, 64, 0);
        p.next_increment(base.clone());

        let mut changed = base;
        changed.pixel_mut(0, 0)[0] = 1;
        assert!(p.next_increment(changed.clone()).is_some());
        assert!(p.next_increment(changed).is_none());
    }

    #[test]
    fn size_change_rebases_without_sending() {
        let mut p = pipeline();
        p.next_increment(Frame::filled(64, 64, 0));
        assert!(p.next_increment(Frame::filled(32, 32, 1)).is_none());
        assert!(p.next_increment(Frame::filled(32, 32, 1)).is_none());
    }

    struct FailingEncoder {
        fail: BlockRect,
    }

    impl RegionEncoder for FailingEncoder {
        fn encode(&self, frame: &Frame, rect: &BlockRect) -> Result<Vec<u8>, SheetError> {
            if *rect == self.fail {
                return Err(SheetError::Encoding("boom".into()));
            }
            ZstdRegionEncoder::new(100).encode(frame, rect)
        }
    }

    #[test]
    fn failed_block_is_dropped_and_rest_ships() {
        let fail = BlockRect::new(0, 0, 64, 64);
        let mut p = DiffPipeline::with_encoder(
            PipelineConfig {
                block_size: 64,
                quality: 100,
            },
            Arc::new(FailingEncoder { fail }),
        );
        p.next_increment(Frame::filled(128, 64, 0));

        let batch = p.next_increment(Frame::filled(128, 64, 1)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].rect, BlockRect::new(64, 0, 64, 64));
    }

    #[test]
    fn failed_full_frame_yields_no_data() {
        let fail = BlockRect::new(0, 0, 10, 10);
        let p = DiffPipeline::with_encoder(PipelineConfig::default(), Arc::new(FailingEncoder { fail }));
        assert!(p.full_frame(&Frame::filled(10, 10, 0)).is_none());
    }

    #[test]
    fn full_frame_ignores_diff_state() {
        let mut p = pipeline();
        let frame = Frame::filled(100, 50, 3);
        let region = p.full_frame(&frame).unwrap();
        assert_eq!(region.rect, BlockRect::new(0, 0, 100, 50));
        assert!(!p.has_baseline());

        p.rebase(frame.clone());
        assert!(p.has_baseline());
        assert!(p.next_increment(frame).is_none());
    }
}
