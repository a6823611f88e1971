//! Relay link to a sharing host.
//!
//! Sends the connection request, waits for the host's answer, then keeps
//! a local copy of the remote screen up to date from full frames, patch
//! batches or continuous chunks. The latest raster and per-update
//! statistics are published over `watch` channels.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use sheet_core::error::{ErrorClass, SheetError};
use sheet_core::input::{
    ControlChannel, KeyMethod, Modifiers, PointerButton, PointerMethod, ViewerControl,
};
use sheet_core::network::{RelayConnection, RelaySender};
use sheet_core::relay::RelayFrame;
use sheet_core::session::SessionId;
use sheet_core::signaling::SignalMessage;
use sheet_core::stream::{Frame, OrderedChunkDecoder, Reassembler, ScreenSize};
use sheet_core::transport::{HandshakeDescriptor, RelayMode};

use crate::config::ViewerConfig;

const FPS_WINDOW: usize = 60;

// ── FrameStats ───────────────────────────────────────────────────

/// Per-update statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Smoothed updates per second.
    pub fps: f64,
    pub total_updates: u64,
    /// Encoded bytes received.
    pub total_bytes: u64,
    /// Patches that could not be applied.
    pub skipped_regions: u64,
    pub width: u32,
    pub height: u32,
}

struct LinkChannel {
    link: RelaySender,
}

impl ControlChannel for LinkChannel {
    fn send(&self, payload: Vec<u8>) -> Result<(), SheetError> {
        self.link
            .try_send(RelayFrame::Control(payload))
            .map_err(|e| SheetError::Transport(e.to_string()))
    }
}

// ── ViewerSession ────────────────────────────────────────────────

pub struct ViewerSession {
    link: RelaySender,
    inbound: mpsc::Receiver<RelayFrame>,
    timeout: Duration,
    session: Option<SessionId>,
    mode: Option<RelayMode>,
    control: ViewerControl,
    screen: Option<Reassembler>,
    chunks: OrderedChunkDecoder,
    running: Arc<AtomicBool>,
    frame_tx: watch::Sender<Frame>,
    stats_tx: watch::Sender<FrameStats>,
    stats: FrameStats,
    last_update: Option<Instant>,
    intervals: VecDeque<Duration>,
}

impl ViewerSession {
    /// Connect to the host and send the connection request.
    pub async fn connect(config: &ViewerConfig) -> Result<Self, SheetError> {
        let credential = config.credential()?;
        info!("connecting to host at {}", config.network.host_address);
        let conn = RelayConnection::connect(config.network.host_address.as_str(), config.timeout())
            .await?;
        let (link, inbound) = conn.into_split();

        link.send(RelayFrame::Signal(SignalMessage::Request {
            session_id: SessionId::default(),
            remote_address: None,
            credential: Some(credential),
        }))
        .await?;

        let mut session = Self::from_link(link, inbound, config.timeout());
        session.set_rendered_size(config.display.width as f64, config.display.height as f64);
        Ok(session)
    }

    /// Wrap an already-open link.
    pub fn from_link(link: RelaySender, inbound: mpsc::Receiver<RelayFrame>, timeout: Duration) -> Self {
        let (frame_tx, _) = watch::channel(Frame::filled(0, 0, 0));
        let (stats_tx, _) = watch::channel(FrameStats::default());
        Self {
            link,
            inbound,
            timeout,
            session: None,
            mode: None,
            control: ViewerControl::new(),
            screen: None,
            chunks: OrderedChunkDecoder::new(),
            running: Arc::new(AtomicBool::new(false)),
            frame_tx,
            stats_tx,
            stats: FrameStats::default(),
            last_update: None,
            intervals: VecDeque::with_capacity(FPS_WINDOW),
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn mode(&self) -> Option<RelayMode> {
        self.mode
    }

    /// Latest reconstructed screen.
    pub fn frame_receiver(&self) -> watch::Receiver<Frame> {
        self.frame_tx.subscribe()
    }

    pub fn stats_receiver(&self) -> watch::Receiver<FrameStats> {
        self.stats_tx.subscribe()
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    // ── Handshake ─────────────────────────────────────────────────

    /// Wait for the host's answer to the request.
    pub async fn handshake(&mut self) -> Result<HandshakeDescriptor, SheetError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let frame = match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
                Ok(Some(frame)) => frame,
                Ok(None) | Err(_) => {
                    return Err(SheetError::Rejected(ErrorClass::HandshakeTimeout));
                }
            };

            if let RelayFrame::Signal(SignalMessage::Accepted {
                session_id,
                transport_kind,
                descriptor,
            }) = frame
            {
                info!(%session_id, ?transport_kind, "accepted by host");
                self.session = Some(session_id);
                self.control.attach(Arc::new(LinkChannel {
                    link: self.link.clone(),
                }));
                if let HandshakeDescriptor::Relayed {
                    width,
                    height,
                    mode,
                    codec,
                } = &descriptor
                {
                    debug!(?mode, ?codec, "relayed stream");
                    self.mode = Some(*mode);
                    self.on_screen_size(ScreenSize::new(*width, *height));
                }
                return Ok(descriptor);
            }

            if let Some(class) = self.handle(frame) {
                return Err(SheetError::Rejected(class));
            }
        }
    }

    // ── Receive loop ──────────────────────────────────────────────

    /// Process one inbound frame. Fails with [`SheetError::Rejected`]
    /// once the host ends the session or the link drops.
    pub async fn process_next(&mut self) -> Result<(), SheetError> {
        let Some(frame) = self.inbound.recv().await else {
            self.control.reset();
            return Err(SheetError::Rejected(ErrorClass::RemoteDisconnect));
        };
        match self.handle(frame) {
            Some(class) => {
                self.control.reset();
                Err(SheetError::Rejected(class))
            }
            None => Ok(()),
        }
    }

    /// Keep the screen up to date until stopped or the host ends the
    /// session. A local stop tells the host we are leaving.
    pub async fn run(&mut self) -> Result<(), SheetError> {
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                result = self.process_next() => result?,
                _ = Self::wait_for_stop(&running) => break,
            }
        }
        self.disconnect().await
    }

    /// Tell the host we are leaving.
    pub async fn disconnect(&mut self) -> Result<(), SheetError> {
        self.control.reset();
        if let Some(session_id) = self.session.take() {
            info!(%session_id, "leaving session");
            self.link
                .send(RelayFrame::Signal(SignalMessage::Disconnect { session_id }))
                .await?;
        }
        Ok(())
    }

    fn handle(&mut self, frame: RelayFrame) -> Option<ErrorClass> {
        match frame {
            RelayFrame::ScreenSize(size) => self.on_screen_size(size),
            RelayFrame::FullFrame(region) => {
                let Some(screen) = self.screen.as_mut() else {
                    debug!("full frame before screen size; dropped");
                    return None;
                };
                match screen.apply_full(&region) {
                    Ok(()) => {
                        let frame = screen.frame().clone();
                        self.publish(frame, region.encoded.len(), 0);
                    }
                    Err(e) => warn!("full frame rejected: {e}"),
                }
            }
            RelayFrame::PatchBatch(batch) => {
                let Some(screen) = self.screen.as_mut() else {
                    debug!("patches before screen size; dropped");
                    return None;
                };
                let applied = screen.apply_batch(&batch);
                let frame = screen.frame().clone();
                let bytes = batch.iter().map(|r| r.encoded.len()).sum();
                self.publish(frame, bytes, batch.len() - applied);
            }
            RelayFrame::Chunk(chunk) => match self.chunks.decode(&chunk) {
                Ok(frame) => {
                    let frame = frame.clone();
                    if self.control.screen_size() != Some(frame.size()) {
                        self.on_screen_size(frame.size());
                    }
                    self.publish(frame, chunk.bytes.len(), 0);
                }
                Err(e) => debug!(sequence = chunk.sequence, "chunk dropped: {e}"),
            },
            RelayFrame::Signal(SignalMessage::Disconnect { .. }) => {
                return Some(ErrorClass::RemoteDisconnect);
            }
            RelayFrame::Signal(SignalMessage::Declined { .. }) => return Some(ErrorClass::Declined),
            RelayFrame::Signal(SignalMessage::Error { class, .. }) => return Some(class),
            RelayFrame::Signal(other) => debug!(kind = other.kind(), "ignoring signal"),
            RelayFrame::Control(_) => trace!("ignoring control frame from host"),
        }
        None
    }

    fn on_screen_size(&mut self, size: ScreenSize) {
        let outcome = match self.screen.as_mut() {
            Some(screen) => screen.resize(size),
            None => Reassembler::new(size).map(|screen| self.screen = Some(screen)),
        };
        if let Err(e) = outcome {
            warn!("screen size dropped: {e}");
            return;
        }
        self.control.announce(size);
    }

    fn publish(&mut self, frame: Frame, bytes: usize, skipped: usize) {
        let now = Instant::now();
        if let Some(last) = self.last_update.replace(now) {
            if self.intervals.len() == FPS_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(now.duration_since(last));
        }
        let avg_secs = if self.intervals.is_empty() {
            0.0
        } else {
            self.intervals.iter().map(Duration::as_secs_f64).sum::<f64>()
                / self.intervals.len() as f64
        };

        self.stats.fps = if avg_secs > 0.0 { 1.0 / avg_secs } else { 0.0 };
        self.stats.total_updates += 1;
        self.stats.total_bytes += bytes as u64;
        self.stats.skipped_regions += skipped as u64;
        self.stats.width = frame.width;
        self.stats.height = frame.height;
        self.stats_tx.send_replace(self.stats.clone());
        self.frame_tx.send_replace(frame);
    }

    /// Async helper: resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    // ── Input ─────────────────────────────────────────────────────

    pub fn set_rendered_size(&mut self, width: f64, height: f64) {
        self.control.set_rendered_size(width, height);
    }

    /// Whether input can be sent yet.
    pub fn events_ready(&self) -> bool {
        self.control.events_ready()
    }

    /// Pointer event in rendered-surface coordinates.
    pub fn pointer(&self, x: f64, y: f64, method: PointerMethod, button: Option<PointerButton>) -> bool {
        self.control.pointer(x, y, method, button)
    }

    pub fn key(
        &self,
        code: &str,
        character: &str,
        virtual_key_code: u32,
        modifiers: Modifiers,
        method: KeyMethod,
    ) -> bool {
        self.control
            .key(code, character, virtual_key_code, modifiers, method)
    }

    pub fn scroll(&self, delta_x: f64, delta_y: f64, delta_mode: u32) -> bool {
        self.control.scroll(delta_x, delta_y, delta_mode)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sheet_core::input::ControlMessage;
    use sheet_core::signaling::Credential;
    use sheet_core::stream::continuous::ContinuousEncoder;
    use sheet_core::stream::pipeline::{DiffPipeline, PipelineConfig};
    use sheet_core::transport::TransportKind;
    use tokio::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(3);

    fn config(addr: std::net::SocketAddr) -> ViewerConfig {
        let mut cfg = ViewerConfig::default();
        cfg.network.host_address = addr.to_string();
        cfg.session.code = "AB12CD34".into();
        cfg.display.width = 128;
        cfg.display.height = 128;
        cfg
    }

    fn accepted(mode: RelayMode) -> RelayFrame {
        RelayFrame::Signal(SignalMessage::Accepted {
            session_id: SessionId::from("S1"),
            transport_kind: TransportKind::Relayed,
            descriptor: HandshakeDescriptor::Relayed {
                width: 64,
                height: 64,
                mode,
                codec: None,
            },
        })
    }

    /// Accept one viewer and hand its link to `script`.
    async fn fake_host<F, Fut>(script: F) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>)
    where
        F: FnOnce(RelayConnection) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = RelayConnection::new(stream);
            let Some(RelayFrame::Signal(SignalMessage::Request { credential, .. })) =
                conn.recv().await
            else {
                panic!("expected a request");
            };
            assert_eq!(credential, Some(Credential::Code("AB12CD34".into())));
            script(conn).await;
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn diff_session_reassembles_and_sends_rescaled_input() {
        let a = Frame::filled(64, 64, 0x10);
        let mut b = a.clone();
        b.pixel_mut(40, 40).copy_from_slice(&[1, 2, 3, 4]);
        let expected = b.clone();

        let (tx, mut control_rx) = mpsc::unbounded_channel();
        let (addr, host) = fake_host(move |mut conn| async move {
            let mut pipeline = DiffPipeline::new(PipelineConfig::default());
            let full = pipeline.rebase(a).unwrap();
            let patches = pipeline.next_increment(b).unwrap();

            conn.send(RelayFrame::ScreenSize(ScreenSize::new(64, 64))).await.unwrap();
            conn.send(accepted(RelayMode::Diff)).await.unwrap();
            conn.send(RelayFrame::FullFrame(full)).await.unwrap();
            conn.send(RelayFrame::PatchBatch(patches)).await.unwrap();

            if let Some(RelayFrame::Control(bytes)) = conn.recv().await {
                tx.send(bytes).unwrap();
            }
            conn.send(RelayFrame::Signal(SignalMessage::Disconnect {
                session_id: SessionId::from("S1"),
            }))
            .await
            .unwrap();
            // hold the link until the viewer has read the disconnect
            conn.recv().await;
        })
        .await;

        let mut viewer = ViewerSession::connect(&config(addr)).await.unwrap();
        assert!(!viewer.pointer(1.0, 1.0, PointerMethod::Move, None));

        let descriptor = viewer.handshake().await.unwrap();
        assert!(matches!(descriptor, HandshakeDescriptor::Relayed { width: 64, .. }));
        assert_eq!(viewer.session_id(), Some(&SessionId::from("S1")));
        assert_eq!(viewer.mode(), Some(RelayMode::Diff));
        assert!(viewer.events_ready());

        let frames = viewer.frame_receiver();
        let stats = viewer.stats_receiver();
        viewer.process_next().await.unwrap();
        viewer.process_next().await.unwrap();
        assert_eq!(*frames.borrow(), expected);
        assert_eq!(stats.borrow().total_updates, 2);
        assert_eq!(stats.borrow().skipped_regions, 0);

        assert!(viewer.pointer(32.0, 16.0, PointerMethod::Move, None));
        let bytes = tokio::time::timeout(WAIT, control_rx.recv()).await.unwrap().unwrap();
        let ControlMessage::Pointer(p) = ControlMessage::parse(&bytes).unwrap() else {
            panic!("expected a pointer event");
        };
        assert_eq!((p.x, p.y), (16.0, 8.0));

        let err = tokio::time::timeout(WAIT, viewer.process_next())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.error_class(), ErrorClass::RemoteDisconnect);
        assert!(!viewer.events_ready());
        drop(viewer);
        tokio::time::timeout(WAIT, host).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn continuous_session_decodes_chunks() {
        let frame = Frame::filled(64, 64, 0x33);
        let expected = frame.clone();
        let (addr, host) = fake_host(move |mut conn| async move {
            let mut encoder = ContinuousEncoder::for_codec("xor-zstd", 60).unwrap();
            conn.send(accepted(RelayMode::Continuous)).await.unwrap();
            conn.send(RelayFrame::Chunk(encoder.encode(&frame).unwrap()))
                .await
                .unwrap();
            conn.send(RelayFrame::Chunk(encoder.encode(&frame).unwrap()))
                .await
                .unwrap();
            conn.recv().await;
        })
        .await;

        let mut viewer = ViewerSession::connect(&config(addr)).await.unwrap();
        viewer.handshake().await.unwrap();
        viewer.process_next().await.unwrap();
        viewer.process_next().await.unwrap();
        assert_eq!(*viewer.frame_receiver().borrow(), expected);
        assert_eq!(viewer.stats_receiver().borrow().total_updates, 2);

        viewer.disconnect().await.unwrap();
        drop(viewer);
        tokio::time::timeout(WAIT, host).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn impossible_screen_size_is_dropped() {
        let frame = Frame::filled(64, 64, 0x22);
        let expected = frame.clone();
        let (addr, host) = fake_host(move |mut conn| async move {
            let full = DiffPipeline::new(PipelineConfig::default())
                .rebase(frame)
                .unwrap();
            conn.send(accepted(RelayMode::Diff)).await.unwrap();
            conn.send(RelayFrame::ScreenSize(ScreenSize::new(u32::MAX, u32::MAX)))
                .await
                .unwrap();
            conn.send(RelayFrame::ScreenSize(ScreenSize::new(40_000, 40_000)))
                .await
                .unwrap();
            conn.send(RelayFrame::FullFrame(full)).await.unwrap();
            conn.recv().await;
        })
        .await;

        let mut viewer = ViewerSession::connect(&config(addr)).await.unwrap();
        viewer.handshake().await.unwrap();
        viewer.process_next().await.unwrap();
        viewer.process_next().await.unwrap();
        viewer.process_next().await.unwrap();
        assert_eq!(*viewer.frame_receiver().borrow(), expected);
        assert!(viewer.events_ready());

        viewer.disconnect().await.unwrap();
        drop(viewer);
        tokio::time::timeout(WAIT, host).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn declined_and_invalid_code_surface_as_classes() {
        for (reply, class) in [
            (
                SignalMessage::Declined {
                    session_id: SessionId::from("S1"),
                },
                ErrorClass::Declined,
            ),
            (
                SignalMessage::Error {
                    session_id: None,
                    class: ErrorClass::InvalidCode,
                },
                ErrorClass::InvalidCode,
            ),
        ] {
            let (addr, host) = fake_host(move |mut conn| async move {
                conn.send(RelayFrame::Signal(reply)).await.unwrap();
                conn.recv().await;
            })
            .await;

            let mut viewer = ViewerSession::connect(&config(addr)).await.unwrap();
            let err = viewer.handshake().await.unwrap_err();
            assert_eq!(err.error_class(), class);
            assert!(!viewer.events_ready());
            drop(viewer);
            tokio::time::timeout(WAIT, host).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn silent_host_times_out() {
        let (addr, host) = fake_host(|mut conn| async move {
            conn.recv().await;
        })
        .await;

        let mut cfg = config(addr);
        cfg.network.timeout_ms = 100;
        let mut viewer = ViewerSession::connect(&cfg).await.unwrap();
        let err = viewer.handshake().await.unwrap_err();
        assert_eq!(err.error_class().code(), 408);
        drop(viewer);
        tokio::time::timeout(WAIT, host).await.unwrap().unwrap();
    }
}
