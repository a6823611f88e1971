//! Direct transport: media over a peer link, control over a side-channel.
//!
//! The `input` channel is opened when the transport is created. When it
//! opens, the host pushes one screen-size message; viewers hold back
//! every event until they have seen it.
//!
//! The offer is only returned after local path discovery reports
//! complete, so the descriptor carries every candidate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::SheetError;
use crate::input::control::ControlMessage;
use crate::session::SessionId;
use crate::session::state::{ConnectivityClass, ConnectivityTracker};
use crate::stream::capture::{CaptureStream, MediaTrack, TrackKind};
use crate::stream::types::ScreenSize;
use crate::transport::peer::{DataChannel, GatheringState, PeerLink};
use crate::transport::{
    ControlHandler, DescriptorKind, HandshakeDescriptor, StateHandler, Transport, TransportKind,
};

/// Label of the control side-channel.
pub const INPUT_CHANNEL: &str = "input";

#[derive(Default)]
struct Shared {
    screen: Mutex<Option<ScreenSize>>,
    channel_open: AtomicBool,
    size_sent: AtomicBool,
    control: Mutex<Option<ControlHandler>>,
    state_handler: Mutex<Option<StateHandler>>,
    tracker: Mutex<ConnectivityTracker>,
}

impl Shared {
    /// Push the screen size once both the channel is open and the size
    /// is known.
    fn push_screen_size(&self, channel: &dyn DataChannel) {
        if !self.channel_open.load(Ordering::SeqCst) {
            return;
        }
        let Some(size) = *self.screen.lock() else {
            return;
        };
        if self.size_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        match serde_json::to_string(&size) {
            Ok(json) => {
                if let Err(e) = channel.send(&json) {
                    warn!("failed to send screen size: {e}");
                }
            }
            Err(e) => warn!("failed to encode screen size: {e}"),
        }
    }
}

// ── DirectTransport ──────────────────────────────────────────────

pub struct DirectTransport {
    session: SessionId,
    peer: Arc<dyn PeerLink>,
    channel: Arc<dyn DataChannel>,
    handshake_timeout: Duration,
    shared: Arc<Shared>,
    capture: Mutex<Option<Arc<dyn CaptureStream>>>,
    torn_down: AtomicBool,
}

impl DirectTransport {
    /// Wrap a fresh peer link and open the control side-channel.
    pub fn new(
        session: SessionId,
        peer: Arc<dyn PeerLink>,
        handshake_timeout: Duration,
    ) -> Result<Self, SheetError> {
        let channel = peer.create_data_channel(INPUT_CHANNEL)?;
        let shared = Arc::new(Shared::default());

        let weak: Weak<dyn DataChannel> = Arc::downgrade(&channel);
        channel.on_open(Box::new({
            let shared = Arc::clone(&shared);
            move || {
                shared.channel_open.store(true, Ordering::SeqCst);
                if let Some(channel) = weak.upgrade() {
                    shared.push_screen_size(channel.as_ref());
                }
            }
        }));

        channel.on_message(Box::new({
            let shared = Arc::clone(&shared);
            let session = session.clone();
            move |bytes: &[u8]| match ControlMessage::parse(bytes) {
                Ok(msg) => {
                    let handler = shared.control.lock().clone();
                    if let Some(handler) = handler {
                        handler(msg);
                    }
                }
                Err(e) => debug!(%session, "dropping malformed control message: {e}"),
            }
        }));

        peer.on_state_change(Box::new({
            let shared = Arc::clone(&shared);
            let session = session.clone();
            move |state| {
                let advanced = shared.tracker.lock().observe(state);
                if let Some(class) = advanced {
                    debug!(%session, ?state, %class, "peer connectivity changed");
                    let handler = shared.state_handler.lock().clone();
                    if let Some(handler) = handler {
                        handler(class);
                    }
                }
            }
        }));

        Ok(Self {
            session,
            peer,
            channel,
            handshake_timeout,
            shared,
            capture: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        })
    }

    /// Wait until path discovery is complete.
    async fn wait_gathering_complete(&self) -> Result<(), SheetError> {
        let mut state = self.peer.gathering_state();
        match tokio::time::timeout(
            self.handshake_timeout,
            state.wait_for(|s| *s == GatheringState::Complete),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SheetError::Transport(
                "peer closed before path discovery completed".into(),
            )),
            Err(_) => Err(SheetError::Timeout(self.handshake_timeout)),
        }
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    fn connectivity(&self) -> ConnectivityClass {
        self.shared.tracker.lock().current()
    }

    async fn create_offer(
        &self,
        capture: Arc<dyn CaptureStream>,
        audio_enabled: bool,
    ) -> Result<HandshakeDescriptor, SheetError> {
        *self.shared.screen.lock() = Some(capture.size());
        *self.capture.lock() = Some(Arc::clone(&capture));
        self.shared.push_screen_size(self.channel.as_ref());

        for track in capture.tracks().into_iter().filter(|t| t.kind == TrackKind::Video) {
            self.peer.add_track(track)?;
        }
        // always carry an audio track so it can be swapped in place later
        let audio = match (audio_enabled, capture.audio_track()) {
            (true, Some(track)) => track,
            _ => MediaTrack::silence(),
        };
        self.peer.add_track(audio)?;

        let offer = self.peer.create_offer().await?;
        self.peer
            .set_local_description(DescriptorKind::Offer, offer)
            .await?;
        self.wait_gathering_complete().await?;

        let sdp = self
            .peer
            .local_description()
            .ok_or_else(|| SheetError::Transport("no local description after gathering".into()))?;
        info!(session = %self.session, "direct offer ready");
        Ok(HandshakeDescriptor::Session {
            kind: DescriptorKind::Offer,
            sdp,
        })
    }

    async fn accept_remote_answer(&self, answer: HandshakeDescriptor) -> Result<(), SheetError> {
        let HandshakeDescriptor::Session {
            kind: DescriptorKind::Answer,
            sdp,
        } = answer
        else {
            return Err(SheetError::Protocol(
                "direct transport expects a session answer".into(),
            ));
        };
        tokio::time::timeout(
            self.handshake_timeout,
            self.peer.set_remote_description(DescriptorKind::Answer, sdp),
        )
        .await
        .map_err(|_| SheetError::Timeout(self.handshake_timeout))?
    }

    fn attach_control_channel(&self, on_message: ControlHandler) {
        *self.shared.control.lock() = Some(on_message);
    }

    fn on_state_change(&self, handler: StateHandler) {
        *self.shared.state_handler.lock() = Some(handler);
    }

    async fn replace_audio_track(
        &self,
        enabled: bool,
        source: Option<MediaTrack>,
    ) -> Result<(), SheetError> {
        let track = match (enabled, source) {
            (true, Some(track)) => track,
            _ => MediaTrack::silence(),
        };
        debug!(session = %self.session, silent = track.silent, "replacing audio track");
        self.peer.replace_audio_track(track)
    }

    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.channel.close();
        self.peer.close().await;
        let capture = self.capture.lock().take();
        if let Some(capture) = capture {
            capture.release();
        }
        *self.shared.control.lock() = None;
        *self.shared.state_handler.lock() = None;
        debug!(session = %self.session, "direct transport torn down");
    }
}

// ── Tests ────────────────────────────────────────────────────────
