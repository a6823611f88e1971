//! # Screen stream pipeline
//!
//! Host-side capture, block diffing and encoding for the relayed
//! transport, plus viewer-side reassembly.
//!
//! ```text
//! HOST                                         VIEWER
//! ┌──────────────────────────┐                ┌──────────────────────┐
//! │ CaptureStream::grab      │                │ Reassembler          │
//! │   ↓  (CaptureLoop tick)  │                │   or                 │
//! │ DiffPipeline             │    relay       │ OrderedChunkDecoder  │
//! │   or ContinuousEncoder   │ ──────────►    │   ↓                  │
//! │   ↓                      │                │ current raster       │
//! │ StreamUpdate             │                │                      │
//! └──────────────────────────┘                └──────────────────────┘
//! ```
//!
//! ## Sub-modules
//!
//! | Module       | Purpose                                              |
//! |--------------|------------------------------------------------------|
//! | `types`      | Rasters, rectangles and encoded regions              |
//! | `delta`      | Block partitioning and short-circuit change scan     |
//! | `encoder`    | Per-region zstd encoder with a quality knob          |
//! | `pipeline`   | Baseline tracking, `next_increment` and `full_frame` |
//! | `continuous` | Codec negotiation and the ordered inter-frame codec  |
//! | `capture`    | Capture collaborators and the skipping capture loop  |
//! | `reassembly` | Viewer-side raster reconstruction                    |

pub mod capture;
pub mod continuous;
pub mod delta;
pub mod encoder;
pub mod pipeline;
pub mod reassembly;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use capture::{
    CaptureConstraints, CaptureLoop, CaptureStats, CaptureStream, ContinuousStage, DiffStage,
    FrameStage, MediaTrack, ScreenCaptureSource, StreamUpdate, TrackKind, UpdateSink,
};
pub use continuous::{ContinuousEncoder, OrderedChunkDecoder, StreamChunk, negotiate};
pub use delta::{DeltaDetector, partition};
pub use encoder::{RegionEncoder, ZstdRegionEncoder, decode_region, encode_region};
pub use pipeline::{DiffPipeline, PipelineConfig};
pub use reassembly::Reassembler;
pub use types::{BlockRect, EncodedRegion, Frame, ScreenSize};
