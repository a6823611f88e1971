//! Relayed transport: encoded screen updates and control over the relay.
//!
//! There is no media path and no negotiation: the descriptor carries the
//! screen size and stream mode, the session counts as connected as soon
//! as it is produced, and relay-link loss means disconnected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::SheetError;
use crate::input::control::ControlMessage;
use crate::relay::{Direction, Relay, RelayFrame};
use crate::session::SessionId;
use crate::session::state::{ConnectivityClass, ConnectivityTracker};
use crate::stream::capture::{
    CaptureLoop, CaptureStream, ContinuousStage, DEFAULT_FPS, DiffStage, FrameStage, MediaTrack,
    StreamUpdate, UpdateSink,
};
use crate::stream::continuous::{
    ContinuousEncoder, DEFAULT_KEYFRAME_INTERVAL, SUPPORTED_CODECS, XOR_ZSTD, negotiate,
};
use crate::stream::pipeline::{DiffPipeline, PipelineConfig};
use crate::transport::{
    ControlHandler, HandshakeDescriptor, RelayMode, StateHandler, Transport, TransportKind,
};

/// Stream settings for relayed sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedOptions {
    pub mode: RelayMode,
    pub fps: u32,
    pub pipeline: PipelineConfig,
    /// Ordered codec preference list for continuous mode.
    pub codec_preferences: Vec<String>,
    pub keyframe_interval: u32,
    /// Ship the first raster whole instead of making it a silent baseline.
    pub seed_full_frame: bool,
}

impl Default for RelayedOptions {
    fn default() -> Self {
        Self {
            mode: RelayMode::Diff,
            fps: DEFAULT_FPS,
            pipeline: PipelineConfig::default(),
            codec_preferences: vec![XOR_ZSTD.to_string()],
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            seed_full_frame: true,
        }
    }
}

#[derive(Default)]
struct Shared {
    control: Mutex<Option<ControlHandler>>,
    state_handler: Mutex<Option<StateHandler>>,
    tracker: Mutex<ConnectivityTracker>,
}

impl Shared {
    fn advance(&self, class: ConnectivityClass) {
        let advanced = self.tracker.lock().advance(class);
        if let Some(class) = advanced {
            let handler = self.state_handler.lock().clone();
            if let Some(handler) = handler {
                handler(class);
            }
        }
    }
}

// ── RelayedTransport ─────────────────────────────────────────────

pub struct RelayedTransport {
    session: SessionId,
    relay: Arc<dyn Relay>,
    options: RelayedOptions,
    shared: Arc<Shared>,
    /// Held until the capture loop takes over releasing it.
    capture: Mutex<Option<Arc<dyn CaptureStream>>>,
    capture_loop: Mutex<Option<CaptureLoop>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl RelayedTransport {
    pub fn new(session: SessionId, relay: Arc<dyn Relay>, options: RelayedOptions) -> Self {
        Self {
            session,
            relay,
            options,
            shared: Arc::new(Shared::default()),
            capture: Mutex::new(None),
            capture_loop: Mutex::new(None),
            reader: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Publishes stage output downstream. A continuous stream that cannot
    /// be queued ends the session; the diff stage resyncs on its own.
    fn downstream_sink(&self) -> UpdateSink {
        let relay = Arc::clone(&self.relay);
        let shared = Arc::clone(&self.shared);
        let session = self.session.clone();
        Arc::new(move |update: StreamUpdate| {
            let gapless = matches!(update, StreamUpdate::Chunk(_));
            let frame = match update {
                StreamUpdate::Resized(size) => RelayFrame::ScreenSize(size),
                StreamUpdate::FullFrame(region) => RelayFrame::FullFrame(region),
                StreamUpdate::Patches(batch) => RelayFrame::PatchBatch(batch),
                StreamUpdate::Chunk(chunk) => RelayFrame::Chunk(chunk),
            };
            match relay.publish(&session, Direction::Downstream, frame) {
                Ok(_) => Ok(()),
                Err(e) if gapless => {
                    warn!(%session, "viewer fell behind the continuous stream: {e}");
                    shared.advance(ConnectivityClass::Disconnected);
                    Err(SheetError::Transport(e.to_string()))
                }
                Err(e) => {
                    debug!(%session, "stream update not relayed: {e}");
                    Err(e)
                }
            }
        })
    }

    fn build_stage(&self, codec: Option<&str>) -> Result<Box<dyn FrameStage>, SheetError> {
        let sink = self.downstream_sink();
        Ok(match (self.options.mode, codec) {
            (RelayMode::Continuous, Some(codec)) => Box::new(ContinuousStage::new(
                ContinuousEncoder::for_codec(codec, self.options.keyframe_interval)?,
                sink,
            )),
            (RelayMode::Continuous, None) => {
                return Err(SheetError::NoSupportedCodec(
                    self.options.codec_preferences.clone(),
                ));
            }
            (RelayMode::Diff, _) => Box::new(DiffStage::new(
                DiffPipeline::new(self.options.pipeline),
                self.options.seed_full_frame,
                sink,
            )),
        })
    }

    /// Forward upstream control messages until the relay link ends.
    fn spawn_reader(&self) -> JoinHandle<()> {
        let mut upstream = self.relay.subscribe(&self.session, Direction::Upstream);
        let shared = Arc::clone(&self.shared);
        let session = self.session.clone();
        tokio::spawn(async move {
            while let Some(frame) = upstream.recv().await {
                match frame {
                    RelayFrame::Control(bytes) => match ControlMessage::parse(&bytes) {
                        Ok(msg) => {
                            let handler = shared.control.lock().clone();
                            if let Some(handler) = handler {
                                handler(msg);
                            }
                        }
                        Err(e) => debug!(%session, "dropping malformed control message: {e}"),
                    },
                    other => trace!(%session, kind = other.kind(), "ignoring upstream frame"),
                }
            }
            info!(%session, "relay link lost");
            shared.advance(ConnectivityClass::Disconnected);
        })
    }
}

#[async_trait]
impl Transport for RelayedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relayed
    }

    fn connectivity(&self) -> ConnectivityClass {
        self.shared.tracker.lock().current()
    }

    async fn create_offer(
        &self,
        capture: Arc<dyn CaptureStream>,
        _audio_enabled: bool,
    ) -> Result<HandshakeDescriptor, SheetError> {
        *self.capture.lock() = Some(Arc::clone(&capture));

        let codec = match self.options.mode {
            RelayMode::Continuous => {
                Some(negotiate(&self.options.codec_preferences, SUPPORTED_CODECS)?)
            }
            RelayMode::Diff => None,
        };
        let stage = self.build_stage(codec.as_deref())?;

        let size = capture.size();
        self.relay.publish(
            &self.session,
            Direction::Downstream,
            RelayFrame::ScreenSize(size),
        )?;

        *self.reader.lock() = Some(self.spawn_reader());

        let capture = self.capture.lock().take();
        if let Some(capture) = capture {
            *self.capture_loop.lock() =
                Some(CaptureLoop::start(capture, self.options.fps, stage));
        }

        info!(
            session = %self.session,
            mode = ?self.options.mode,
            codec = codec.as_deref().unwrap_or("-"),
            "relayed stream started"
        );
        self.shared.advance(ConnectivityClass::Connected);

        Ok(HandshakeDescriptor::Relayed {
            width: size.width,
            height: size.height,
            mode: self.options.mode,
            codec,
        })
    }

    async fn accept_remote_answer(&self, _answer: HandshakeDescriptor) -> Result<(), SheetError> {
        Ok(())
    }

    fn attach_control_channel(&self, on_message: ControlHandler) {
        *self.shared.control.lock() = Some(on_message);
    }

    fn on_state_change(&self, handler: StateHandler) {
        *self.shared.state_handler.lock() = Some(handler);
    }

    async fn replace_audio_track(
        &self,
        _enabled: bool,
        _source: Option<MediaTrack>,
    ) -> Result<(), SheetError> {
        trace!(session = %self.session, "relayed transport carries no audio");
        Ok(())
    }

    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.shared.state_handler.lock() = None;
        *self.shared.control.lock() = None;

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if let Some(capture_loop) = self.capture_loop.lock().take() {
            capture_loop.stop();
        }
        let capture = self.capture.lock().take();
        if let Some(capture) = capture {
            capture.release();
        }
        self.relay.close_session(&self.session);
        debug!(session = %self.session, "relayed transport torn down");
    }
}

// ── Tests ────────────────────────────────────────────────────────
