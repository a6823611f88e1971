//! Capture collaborators and the per-session capture loop.
//!
//! The screen itself is an external collaborator: a [`ScreenCaptureSource`]
//! hands out a [`CaptureStream`] that can be sampled synchronously. The
//! [`CaptureLoop`] samples it at a fixed cadence and feeds each raster to
//! a [`FrameStage`] (diff pipeline or continuous encoder).
//!
//! At most one tick is in flight: a tick that fires while the previous
//! one is still running is skipped, never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, trace, warn};

use crate::error::SheetError;
use crate::stream::continuous::{ContinuousEncoder, StreamChunk};
use crate::stream::pipeline::DiffPipeline;
use crate::stream::types::{EncodedRegion, Frame, ScreenSize};

/// Default sampling rate.
pub const DEFAULT_FPS: u32 = 15;

// ── Media tracks ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Handle to one outgoing media track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    /// Generated silence rather than a live source.
    pub silent: bool,
}

impl MediaTrack {
    pub fn video(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Video,
            silent: false,
        }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Audio,
            silent: false,
        }
    }

    /// A silent audio track used while audio sharing is off.
    pub fn silence() -> Self {
        Self {
            id: "silence".into(),
            kind: TrackKind::Audio,
            silent: true,
        }
    }
}

// ── Collaborators ────────────────────────────────────────────────

/// What the session asks of the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Request an audio track alongside video.
    pub audio: bool,
    pub fps: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            audio: false,
            fps: DEFAULT_FPS,
        }
    }
}

/// Provider of live screen streams.
pub trait ScreenCaptureSource: Send + Sync {
    /// Acquire a stream. Fails with [`SheetError::CaptureUnavailable`]
    /// when the screen cannot be captured.
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Arc<dyn CaptureStream>, SheetError>;
}

/// A live screen stream.
pub trait CaptureStream: Send + Sync {
    /// Native resolution.
    fn size(&self) -> ScreenSize;

    /// Rasterize the current screen contents. May block.
    fn grab(&self) -> Result<Frame, SheetError>;

    /// Media tracks for a direct peer transport.
    fn tracks(&self) -> Vec<MediaTrack>;

    /// Live audio track, if the stream carries one.
    fn audio_track(&self) -> Option<MediaTrack> {
        self.tracks().into_iter().find(|t| t.kind == TrackKind::Audio)
    }

    /// Stop the stream. Called once, after the capture loop is cancelled.
    fn release(&self);
}

// ── Stages ───────────────────────────────────────────────────────

/// Output of a capture stage, ready to be relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    /// The raster dimensions changed; announced before the first update
    /// at the new size.
    Resized(ScreenSize),
    FullFrame(EncodedRegion),
    Patches(Vec<EncodedRegion>),
    Chunk(StreamChunk),
}

/// Delivers stage output. An error means the update was not queued.
pub type UpdateSink = Arc<dyn Fn(StreamUpdate) -> Result<(), SheetError> + Send + Sync>;

/// Consumes sampled rasters.
pub trait FrameStage: Send + 'static {
    fn process(&mut self, frame: Frame);
}

/// Block-diff stage.
///
/// An update the sink refuses is dropped and the next tick resyncs the
/// viewer with a full frame instead of a patch batch.
pub struct DiffStage {
    pipeline: DiffPipeline,
    size: Option<ScreenSize>,
    /// Next tick ships the raster whole.
    needs_full: bool,
    /// Next full frame is preceded by a size announcement.
    announce: bool,
    sink: UpdateSink,
}

impl DiffStage {
    /// With `seed_full_frame`, the first raster ships whole instead of
    /// silently becoming the baseline.
    pub fn new(pipeline: DiffPipeline, seed_full_frame: bool, sink: UpdateSink) -> Self {
        Self {
            pipeline,
            size: None,
            needs_full: seed_full_frame,
            announce: false,
            sink,
        }
    }

    fn emit(&self, update: StreamUpdate) -> bool {
        match (self.sink)(update) {
            Ok(()) => true,
            Err(e) => {
                debug!("stream update dropped, resyncing with a full frame: {e}");
                false
            }
        }
    }
}

impl FrameStage for DiffStage {
    fn process(&mut self, frame: Frame) {
        let size = frame.size();
        if resized(&mut self.size, size) {
            debug!(?size, "raster resized; sending full frame");
            self.announce = true;
            self.needs_full = true;
        }
        if self.announce {
            if !self.emit(StreamUpdate::Resized(size)) {
                return;
            }
            self.announce = false;
        }
        if self.needs_full {
            // an encode failure leaves `needs_full` set; retried next tick
            if let Some(region) = self.pipeline.rebase(frame) {
                self.needs_full = !self.emit(StreamUpdate::FullFrame(region));
            }
            return;
        }
        if let Some(batch) = self.pipeline.next_increment(frame) {
            trace!(regions = batch.len(), "patch batch");
            if !self.emit(StreamUpdate::Patches(batch)) {
                self.needs_full = true;
            }
        }
    }
}

/// Continuous-encoder stage.
///
/// The bitstream tolerates no gaps: once the sink refuses a chunk the
/// stage goes quiet and the session is expected to end.
pub struct ContinuousStage {
    encoder: ContinuousEncoder,
    size: Option<ScreenSize>,
    halted: bool,
    sink: UpdateSink,
}

impl ContinuousStage {
    pub fn new(encoder: ContinuousEncoder, sink: UpdateSink) -> Self {
        Self {
            encoder,
            size: None,
            halted: false,
            sink,
        }
    }

    fn emit(&mut self, update: StreamUpdate) {
        if let Err(e) = (self.sink)(update) {
            warn!("continuous stream halted: {e}");
            self.halted = true;
        }
    }
}

impl FrameStage for ContinuousStage {
    fn process(&mut self, frame: Frame) {
        if self.halted {
            return;
        }
        // the encoder keyframes on its own when the size changes
        if resized(&mut self.size, frame.size()) {
            self.emit(StreamUpdate::Resized(frame.size()));
            if self.halted {
                return;
            }
        }
        match self.encoder.encode(&frame) {
            Ok(chunk) => self.emit(StreamUpdate::Chunk(chunk)),
            Err(e) => {
                // the next chunk must not reference a raster the viewer never saw
                self.encoder.request_keyframe();
                warn!("dropping chunk: {e}");
            }
        }
    }
}

/// Record `next` and report whether it differs from a previously seen size.
fn resized(seen: &mut Option<ScreenSize>, next: ScreenSize) -> bool {
    seen.replace(next).is_some_and(|prev| prev != next)
}

// ── CaptureLoop ──────────────────────────────────────────────────

/// Counters for one capture loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub ticks: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

struct LoopState {
    cancelled: bool,
}

/// Fixed-cadence sampler for one relayed session.
pub struct CaptureLoop {
    stream: Arc<dyn CaptureStream>,
    /// Held by a tick while it touches the stream.
    state: Arc<Mutex<LoopState>>,
    busy: Arc<AtomicBool>,
    counters: Arc<Counters>,
    task: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl CaptureLoop {
    /// Start sampling `stream` at `fps` into `stage`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(stream: Arc<dyn CaptureStream>, fps: u32, stage: Box<dyn FrameStage>) -> Self {
        let period = Duration::from_secs_f64(1.0 / fps.clamp(1, 60) as f64);
        let state = Arc::new(Mutex::new(LoopState { cancelled: false }));
        let busy = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let stage = Arc::new(Mutex::new(stage));

        let task = tokio::spawn({
            let stream = Arc::clone(&stream);
            let state = Arc::clone(&state);
            let busy = Arc::clone(&busy);
            let counters = Arc::clone(&counters);
            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if state.lock().cancelled {
                        break;
                    }
                    counters.ticks.fetch_add(1, Ordering::Relaxed);
                    if busy.swap(true, Ordering::AcqRel) {
                        counters.skipped.fetch_add(1, Ordering::Relaxed);
                        trace!("capture tick skipped: previous tick still running");
                        continue;
                    }
                    let job = Tick {
                        stream: Arc::clone(&stream),
                        state: Arc::clone(&state),
                        busy: Arc::clone(&busy),
                        counters: Arc::clone(&counters),
                        stage: Arc::clone(&stage),
                    };
                    tokio::task::spawn_blocking(move || job.run());
                }
            }
        });

        debug!(fps, "capture loop started");
        Self {
            stream,
            state,
            busy,
            counters,
            task: Mutex::new(Some(task)),
            released: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Whether a tick is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Cancel the pending tick, then release the stream. Idempotent.
    ///
    /// Blocks while an in-flight tick finishes its grab; no tick touches
    /// the stream after this returns.
    pub fn stop(&self) {
        self.state.lock().cancelled = true;
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if !self.released.swap(true, Ordering::AcqRel) {
            self.stream.release();
            debug!("capture loop stopped");
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Tick {
    stream: Arc<dyn CaptureStream>,
    state: Arc<Mutex<LoopState>>,
    busy: Arc<AtomicBool>,
    counters: Arc<Counters>,
    stage: Arc<Mutex<Box<dyn FrameStage>>>,
}

impl Tick {
    fn run(self) {
        let grabbed = {
            let state = self.state.lock();
            if state.cancelled {
                None
            } else {
                Some(self.stream.grab())
            }
        };
        match grabbed.map(|result| result.and_then(well_formed)) {
            Some(Ok(frame)) => self.stage.lock().process(frame),
            Some(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("capture failed: {e}");
            }
            None => {}
        }
    }
}

impl Drop for Tick {
    // also runs if a stage panics, so later ticks are not skipped forever
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Reject rasters whose buffer does not match their dimensions.
fn well_formed(frame: Frame) -> Result<Frame, SheetError> {
    let Frame {
        width,
        height,
        pixels,
    } = frame;
    let len = pixels.len();
    Frame::from_pixels(width, height, pixels).ok_or_else(|| {
        SheetError::Encoding(format!("malformed {width}x{height} raster with {len} bytes"))
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::pipeline::PipelineConfig;
    use std::sync::atomic::AtomicUsize;

    struct SlowStream {
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        grabs: AtomicUsize,
        released: AtomicBool,
        grab_after_release: AtomicBool,
        value: AtomicUsize,
    }

    impl SlowStream {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                grabs: AtomicUsize::new(0),
                released: AtomicBool::new(false),
                grab_after_release: AtomicBool::new(false),
                value: AtomicUsize::new(0),
            })
        }
    }

    impl CaptureStream for SlowStream {
        fn size(&self) -> ScreenSize {
            ScreenSize::new(16, 16)
        }

        fn grab(&self) -> Result<Frame, SheetError> {
            if self.released.load(Ordering::SeqCst) {
                self.grab_after_release.store(true, Ordering::SeqCst);
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.grabs.fetch_add(1, Ordering::SeqCst);
            let v = self.value.fetch_add(1, Ordering::SeqCst) as u8;
            Ok(Frame::filled(16, 16, v))
        }

        fn tracks(&self) -> Vec<MediaTrack> {
            vec![MediaTrack::video("screen")]
        }

        fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn collecting_sink() -> (UpdateSink, Arc<Mutex<Vec<StreamUpdate>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink: UpdateSink = {
            let out = Arc::clone(&out);
            Arc::new(move |u: StreamUpdate| {
                out.lock().push(u);
                Ok(())
            })
        };
        (sink, out)
    }

    #[tokio::test]
    async fn slow_ticks_are_skipped_not_overlapped() {
        let stream = SlowStream::new(Duration::from_millis(80));
        let (sink, _out) = collecting_sink();
        let stage = DiffStage::new(DiffPipeline::new(PipelineConfig::default()), false, sink);

        let capture = CaptureLoop::start(stream.clone(), 60, Box::new(stage));
        tokio::time::sleep(Duration::from_millis(400)).await;
        capture.stop();

        let stats = capture.stats();
        assert!(stats.skipped > 0, "{stats:?}");
        assert_eq!(stream.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(stream.grabs.load(Ordering::SeqCst) >= 2);
    }

    /// Hands back a raster with a truncated buffer on its second grab.
    struct TruncatingStream {
        grabs: AtomicUsize,
    }

    impl CaptureStream for TruncatingStream {
        fn size(&self) -> ScreenSize {
            ScreenSize::new(16, 16)
        }

        fn grab(&self) -> Result<Frame, SheetError> {
            let n = self.grabs.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                return Ok(Frame {
                    width: 16,
                    height: 16,
                    pixels: vec![0; 10],
                });
            }
            Ok(Frame::filled(16, 16, n as u8))
        }

        fn tracks(&self) -> Vec<MediaTrack> {
            vec![MediaTrack::video("screen")]
        }

        fn release(&self) {}
    }

    #[tokio::test]
    async fn malformed_raster_is_dropped_and_sampling_continues() {
        let stream = Arc::new(TruncatingStream {
            grabs: AtomicUsize::new(0),
        });
        let (sink, out) = collecting_sink();
        let stage = DiffStage::new(DiffPipeline::new(PipelineConfig::default()), true, sink);

        let capture = CaptureLoop::start(stream.clone(), 30, Box::new(stage));
        tokio::time::sleep(Duration::from_millis(400)).await;
        capture.stop();

        let stats = capture.stats();
        assert_eq!(stats.failed, 1, "{stats:?}");
        assert!(stream.grabs.load(Ordering::SeqCst) > 3, "{stats:?}");
        assert!(!capture.is_busy());
        let updates = out.lock();
        assert!(matches!(updates[0], StreamUpdate::FullFrame(_)));
        assert!(updates[1..].iter().any(|u| matches!(u, StreamUpdate::Patches(_))));
    }

    #[tokio::test]
    async fn stop_releases_once_and_no_grab_follows() {
        let stream = SlowStream::new(Duration::from_millis(20));
        let (sink, _out) = collecting_sink();
        let stage = DiffStage::new(DiffPipeline::new(PipelineConfig::default()), false, sink);

        let capture = CaptureLoop::start(stream.clone(), 30, Box::new(stage));
        tokio::time::sleep(Duration::from_millis(100)).await;
        capture.stop();
        capture.stop();

        let grabs = stream.grabs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(stream.released.load(Ordering::SeqCst));
        assert!(!stream.grab_after_release.load(Ordering::SeqCst));
        assert_eq!(stream.grabs.load(Ordering::SeqCst), grabs);
    }

    #[tokio::test]
    async fn diff_stage_seeds_full_frame_then_patches() {
        let stream = SlowStream::new(Duration::from_millis(1));
        let (sink, out) = collecting_sink();
        let stage = DiffStage::new(DiffPipeline::new(PipelineConfig::default()), true, sink);

        let capture = CaptureLoop::start(stream, 30, Box::new(stage));
        tokio::time::sleep(Duration::from_millis(250)).await;
        capture.stop();

        let updates = out.lock();
        assert!(updates.len() >= 2, "{} updates", updates.len());
        assert!(matches!(updates[0], StreamUpdate::FullFrame(_)));
        assert!(updates[1..].iter().all(|u| matches!(u, StreamUpdate::Patches(_))));
    }

    #[test]
    fn diff_stage_without_seed_starts_silent() {
        let (sink, out) = collecting_sink();
        let mut stage = DiffStage::new(DiffPipeline::new(PipelineConfig::default()), false, sink);
        stage.process(Frame::filled(8, 8, 0));
        assert!(out.lock().is_empty());
        stage.process(Frame::filled(8, 8, 1));
        assert!(matches!(out.lock()[0], StreamUpdate::Patches(ref b) if b.len() == 1));
    }

    #[test]
    fn diff_stage_announces_resize_with_full_frame() {
        let (sink, out) = collecting_sink();
        let mut stage = DiffStage::new(DiffPipeline::new(PipelineConfig::default()), true, sink);
        stage.process(Frame::filled(8, 8, 0));
        stage.process(Frame::filled(16, 4, 0));
        stage.process(Frame::filled(16, 4, 9));

        let updates = out.lock();
        assert_eq!(updates.len(), 4);
        assert_eq!(updates[1], StreamUpdate::Resized(ScreenSize::new(16, 4)));
        assert!(matches!(&updates[2], StreamUpdate::FullFrame(r) if r.rect.width == 16 && r.rect.height == 4));
        assert!(matches!(updates[3], StreamUpdate::Patches(_)));
    }

    #[test]
    fn refused_patches_are_replaced_by_a_full_frame() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let refuse = Arc::new(AtomicBool::new(false));
        let sink: UpdateSink = {
            let out = Arc::clone(&out);
            let refuse = Arc::clone(&refuse);
            Arc::new(move |u: StreamUpdate| {
                if refuse.load(Ordering::SeqCst) {
                    return Err(SheetError::QueueFull("S1".into()));
                }
                out.lock().push(u);
                Ok(())
            })
        };
        let mut stage = DiffStage::new(DiffPipeline::new(PipelineConfig::default()), true, sink);
        stage.process(Frame::filled(8, 8, 0));

        refuse.store(true, Ordering::SeqCst);
        stage.process(Frame::filled(8, 8, 1));
        refuse.store(false, Ordering::SeqCst);
        stage.process(Frame::filled(8, 8, 1));
        stage.process(Frame::filled(8, 8, 2));

        let updates = out.lock();
        assert_eq!(updates.len(), 3);
        assert!(matches!(updates[0], StreamUpdate::FullFrame(_)));
        assert!(matches!(updates[1], StreamUpdate::FullFrame(_)));
        assert!(matches!(updates[2], StreamUpdate::Patches(_)));
    }

    #[test]
    fn continuous_stage_goes_quiet_after_a_refused_chunk() {
        let sent = Arc::new(AtomicUsize::new(0));
        let sink: UpdateSink = {
            let sent = Arc::clone(&sent);
            Arc::new(move |_: StreamUpdate| {
                if sent.fetch_add(1, Ordering::SeqCst) == 1 {
                    return Err(SheetError::QueueFull("S1".into()));
                }
                Ok(())
            })
        };
        let encoder = ContinuousEncoder::for_codec("xor-zstd", 10).unwrap();
        let mut stage = ContinuousStage::new(encoder, sink);
        for v in 0..4 {
            stage.process(Frame::filled(8, 8, v));
        }
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn continuous_stage_emits_chunks() {
        let (sink, out) = collecting_sink();
        let encoder = ContinuousEncoder::for_codec("xor-zstd", 10).unwrap();
        let mut stage = ContinuousStage::new(encoder, sink);
        stage.process(Frame::filled(8, 8, 0));
        stage.process(Frame::filled(8, 8, 0));
        let updates = out.lock();
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[0], StreamUpdate::Chunk(c) if c.keyframe));
        assert!(matches!(&updates[1], StreamUpdate::Chunk(c) if !c.keyframe && c.sequence == 1));
    }

    #[test]
    fn silence_track_is_silent_audio() {
        let t = MediaTrack::silence();
        assert_eq!(t.kind, TrackKind::Audio);
        assert!(t.silent);
    }
}
