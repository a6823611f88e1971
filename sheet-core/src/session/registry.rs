//! Session registry: the authoritative pending/connected sets.
//!
//! ```text
//!  add_pending_request ──► pending ──approve──► approving ──handshake ok──► connected
//!                            │                     │                          │
//!                         decline             handshake failed      disconnect / link lost
//!                            ▼                     ▼                          ▼
//!                                         (entry removed)
//! ```
//!
//! Mutations happen under one short lock. Everything that suspends
//! (capture acquisition, transport handshake, teardown) runs outside it,
//! referenced by session id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SheetError;
use crate::input::control::ControlMessage;
use crate::session::state::{AggregateStatus, ConnectivityClass, SessionState, StatusFilter};
use crate::session::{PendingRequest, Session, SessionId};
use crate::signaling::{SignalMessage, SignalSink};
use crate::stream::capture::{CaptureConstraints, CaptureStream, ScreenCaptureSource};
use crate::transport::{HandshakeDescriptor, Transport, TransportKind, TransportStrategy};

/// Receives every control message of every connected session.
pub type ControlSink = Arc<dyn Fn(&SessionId, ControlMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    pub capture_constraints: CaptureConstraints,
    /// Initial host-wide audio toggle.
    pub audio_enabled: bool,
}

struct ConnectedSession {
    info: Session,
    transport: Arc<dyn Transport>,
    capture: Arc<dyn CaptureStream>,
}

#[derive(Default)]
struct Sessions {
    pending: HashMap<SessionId, PendingRequest>,
    /// Approved, handshake still running.
    approving: HashMap<SessionId, PendingRequest>,
    connected: HashMap<SessionId, ConnectedSession>,
    ever_connected: bool,
}

impl Sessions {
    fn contains(&self, id: &SessionId) -> bool {
        self.pending.contains_key(id)
            || self.approving.contains_key(id)
            || self.connected.contains_key(id)
    }

    fn aggregate(&self) -> AggregateStatus {
        if !self.connected.is_empty() {
            AggregateStatus::Connected
        } else if self.ever_connected {
            AggregateStatus::Disconnected
        } else {
            AggregateStatus::Idle
        }
    }
}

struct Inner {
    config: RegistryConfig,
    sessions: Mutex<Sessions>,
    capture: Arc<dyn ScreenCaptureSource>,
    strategy: TransportStrategy,
    signals: Arc<dyn SignalSink>,
    control: RwLock<Option<ControlSink>>,
    status: watch::Sender<AggregateStatus>,
    audio: AtomicBool,
}

impl Inner {
    /// Must be called with the session lock held, after every transition.
    fn recompute(&self, sessions: &Sessions) {
        let next = sessions.aggregate();
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("host status: {current:?} -> {next:?}");
            *current = next;
            true
        });
    }

    /// A transport reached the terminal connectivity class.
    fn transport_lost(&self, id: &SessionId) {
        let removed = {
            let mut sessions = self.sessions.lock();
            if sessions.approving.remove(id).is_some() {
                debug!(session = %id, "transport lost during handshake");
                None
            } else {
                let removed = sessions.connected.remove(id);
                if removed.is_some() {
                    self.recompute(&sessions);
                }
                removed
            }
        };
        let Some(entry) = removed else { return };

        info!(session = %id, "transport disconnected");
        self.signals.send(SignalMessage::Disconnect {
            session_id: id.clone(),
        });
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { entry.transport.teardown().await });
            }
            Err(_) => warn!(session = %id, "no runtime to tear down transport on"),
        }
    }
}

// ── SessionRegistry ──────────────────────────────────────────────

/// Owns every viewer session of one host. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(
        config: RegistryConfig,
        capture: Arc<dyn ScreenCaptureSource>,
        strategy: TransportStrategy,
        signals: Arc<dyn SignalSink>,
    ) -> Self {
        let (status, _) = watch::channel(AggregateStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                sessions: Mutex::new(Sessions::default()),
                capture,
                strategy,
                signals,
                control: RwLock::new(None),
                status,
                audio: AtomicBool::new(config.audio_enabled),
            }),
        }
    }

    pub fn with_control_sink(self, sink: ControlSink) -> Self {
        self.set_control_sink(sink);
        self
    }

    pub fn set_control_sink(&self, sink: ControlSink) {
        *self.inner.control.write() = Some(sink);
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.inner.strategy.kind()
    }

    // ── Requests ──────────────────────────────────────────────────

    /// Insert or overwrite a pending request. Ids already approving or
    /// connected are rejected.
    pub fn add_pending_request(
        &self,
        id: SessionId,
        remote_address: Option<String>,
    ) -> Result<(), SheetError> {
        let mut sessions = self.inner.sessions.lock();
        if sessions.approving.contains_key(&id) || sessions.connected.contains_key(&id) {
            return Err(SheetError::Protocol(format!("session {id} is already active")));
        }
        debug!(session = %id, ?remote_address, "connection request pending");
        sessions.pending.insert(
            id.clone(),
            PendingRequest {
                session_id: id,
                remote_address,
                requested_at: SystemTime::now(),
            },
        );
        Ok(())
    }

    /// Drop a pending request without notifying the viewer.
    pub fn remove_pending(&self, id: &SessionId) -> bool {
        self.inner.sessions.lock().pending.remove(id).is_some()
    }

    /// Approve a pending request: acquire the screen, build the transport,
    /// run the handshake and register the session as connected. Returns
    /// the descriptor to send back. On failure the id ends up in neither
    /// set; a non-pending id fails without touching anything.
    pub async fn approve(&self, id: &SessionId) -> Result<HandshakeDescriptor, SheetError> {
        let request = {
            let mut sessions = self.inner.sessions.lock();
            let request = sessions
                .pending
                .remove(id)
                .ok_or_else(|| SheetError::NotPending(id.clone()))?;
            sessions.approving.insert(id.clone(), request.clone());
            request
        };

        let (transport, capture, descriptor) = match self.establish(id).await {
            Ok(established) => established,
            Err(e) => {
                self.inner.sessions.lock().approving.remove(id);
                warn!(session = %id, "approval failed: {e}");
                return Err(e);
            }
        };

        self.admit(id, request, Arc::clone(&transport), capture).await?;
        info!(session = %id, kind = ?transport.kind(), "session connected");
        Ok(descriptor)
    }

    /// Move an approving request into the connected table. Any failure
    /// tears the fresh transport down before it is reported.
    async fn admit(
        &self,
        id: &SessionId,
        request: PendingRequest,
        transport: Arc<dyn Transport>,
        capture: Arc<dyn CaptureStream>,
    ) -> Result<(), SheetError> {
        let admitted = {
            let mut sessions = self.inner.sessions.lock();
            if sessions.approving.remove(id).is_none() {
                Err(SheetError::Transport(format!(
                    "session {id} closed during handshake"
                )))
            } else {
                let mut info = Session {
                    id: id.clone(),
                    state: SessionState::Pending,
                    remote_address: request.remote_address,
                    connected_at: Some(SystemTime::now()),
                    transport_kind: Some(transport.kind()),
                    connectivity: None,
                };
                match info.state.connect() {
                    Ok(()) => {
                        sessions.connected.insert(
                            id.clone(),
                            ConnectedSession {
                                info,
                                transport: Arc::clone(&transport),
                                capture,
                            },
                        );
                        sessions.ever_connected = true;
                        self.inner.recompute(&sessions);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = admitted {
            transport.teardown().await;
            return Err(e);
        }
        Ok(())
    }

    async fn establish(
        &self,
        id: &SessionId,
    ) -> Result<(Arc<dyn Transport>, Arc<dyn CaptureStream>, HandshakeDescriptor), SheetError> {
        let capture = self
            .inner
            .capture
            .acquire(&self.inner.config.capture_constraints)?;
        let transport = match self.inner.strategy.create(id) {
            Ok(transport) => transport,
            Err(e) => {
                capture.release();
                return Err(e);
            }
        };
        self.wire(id, transport.as_ref());

        let audio = self.inner.audio.load(Ordering::SeqCst);
        match transport.create_offer(Arc::clone(&capture), audio).await {
            Ok(descriptor) => Ok((transport, capture, descriptor)),
            Err(e) => {
                transport.teardown().await;
                Err(e)
            }
        }
    }

    fn wire(&self, id: &SessionId, transport: &dyn Transport) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let session = id.clone();
        transport.attach_control_channel(Arc::new(move |msg: ControlMessage| {
            let Some(inner) = weak.upgrade() else { return };
            let sink = inner.control.read().clone();
            if let Some(sink) = sink {
                sink(&session, msg);
            }
        }));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let session = id.clone();
        transport.on_state_change(Arc::new(move |class: ConnectivityClass| {
            if class != ConnectivityClass::Disconnected {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.transport_lost(&session);
            }
        }));
    }

    /// Reject a pending request and notify the viewer.
    pub fn decline(&self, id: &SessionId) -> Result<(), SheetError> {
        if self.inner.sessions.lock().pending.remove(id).is_none() {
            return Err(SheetError::NotPending(id.clone()));
        }
        info!(session = %id, "request declined");
        self.inner.signals.send(SignalMessage::Declined {
            session_id: id.clone(),
        });
        Ok(())
    }

    /// Forward the viewer's answer to the session's transport.
    pub async fn accept_answer(
        &self,
        id: &SessionId,
        answer: HandshakeDescriptor,
    ) -> Result<(), SheetError> {
        let transport = self
            .inner
            .sessions
            .lock()
            .connected
            .get(id)
            .map(|s| Arc::clone(&s.transport))
            .ok_or_else(|| SheetError::UnknownSession(id.clone()))?;
        transport.accept_remote_answer(answer).await
    }

    // ── Teardown ──────────────────────────────────────────────────

    /// Tear down a connected session and notify the viewer. Returns the
    /// final record, or `None` when the id is not connected.
    pub async fn disconnect(&self, id: &SessionId) -> Option<Session> {
        let removed = {
            let mut sessions = self.inner.sessions.lock();
            let removed = sessions.connected.remove(id);
            if removed.is_some() {
                self.inner.recompute(&sessions);
            }
            removed
        };
        let mut entry = removed?;

        if let Err(e) = entry.info.state.disconnect() {
            debug!(session = %id, "{e}");
        }
        entry.info.connectivity = Some(ConnectivityClass::Disconnected);
        self.inner.signals.send(SignalMessage::Disconnect {
            session_id: id.clone(),
        });
        entry.transport.teardown().await;
        info!(session = %id, "session disconnected");
        Some(entry.info)
    }

    /// The viewer's link is gone. Pending and approving entries are
    /// dropped; a connected session is torn down without notice.
    pub async fn link_lost(&self, id: &SessionId) -> bool {
        let removed = {
            let mut sessions = self.inner.sessions.lock();
            if sessions.pending.remove(id).is_some() || sessions.approving.remove(id).is_some() {
                debug!(session = %id, "link lost before approval completed");
                return true;
            }
            let removed = sessions.connected.remove(id);
            if removed.is_some() {
                self.inner.recompute(&sessions);
            }
            removed
        };
        match removed {
            Some(entry) => {
                entry.transport.teardown().await;
                info!(session = %id, "link lost, session closed");
                true
            }
            None => false,
        }
    }

    /// Tear down every session and clear both sets. Safe to repeat and to
    /// run alongside individual disconnects.
    pub async fn disconnect_all(&self) {
        let (connected, waiting) = {
            let mut sessions = self.inner.sessions.lock();
            let connected: Vec<_> = sessions.connected.drain().collect();
            let mut waiting: Vec<SessionId> = sessions.pending.drain().map(|(id, _)| id).collect();
            waiting.extend(sessions.approving.drain().map(|(id, _)| id));
            self.inner.recompute(&sessions);
            (connected, waiting)
        };
        if connected.is_empty() && waiting.is_empty() {
            return;
        }
        info!(
            connected = connected.len(),
            waiting = waiting.len(),
            "disconnecting all sessions"
        );

        for id in waiting {
            self.inner
                .signals
                .send(SignalMessage::Disconnect { session_id: id });
        }
        for (id, entry) in connected {
            self.inner
                .signals
                .send(SignalMessage::Disconnect { session_id: id });
            entry.transport.teardown().await;
        }
    }

    // ── Audio ─────────────────────────────────────────────────────

    pub fn audio_enabled(&self) -> bool {
        self.inner.audio.load(Ordering::SeqCst)
    }

    /// Flip host audio and hot-swap the track on every connected session.
    pub async fn set_audio(&self, enabled: bool) {
        self.inner.audio.store(enabled, Ordering::SeqCst);
        let targets: Vec<_> = self
            .inner
            .sessions
            .lock()
            .connected
            .iter()
            .map(|(id, s)| (id.clone(), Arc::clone(&s.transport), s.capture.audio_track()))
            .collect();

        for (id, transport, track) in targets {
            if let Err(e) = transport.replace_audio_track(enabled, track).await {
                warn!(session = %id, "audio swap failed: {e}");
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Session metadata by status. `All` lists the connected set.
    pub fn filter(&self, filter: StatusFilter) -> Vec<Session> {
        let sessions = self.inner.sessions.lock();
        let mut out: Vec<Session> = match filter {
            StatusFilter::Pending => sessions
                .pending
                .values()
                .chain(sessions.approving.values())
                .map(|p| Session {
                    id: p.session_id.clone(),
                    state: SessionState::Pending,
                    remote_address: p.remote_address.clone(),
                    connected_at: None,
                    transport_kind: None,
                    connectivity: None,
                })
                .collect(),
            _ => sessions
                .connected
                .values()
                .filter_map(|s| {
                    let class = s.transport.connectivity();
                    let keep = match filter {
                        StatusFilter::All => true,
                        StatusFilter::Connected => class == ConnectivityClass::Connected,
                        StatusFilter::Connecting => class == ConnectivityClass::Connecting,
                        StatusFilter::Disconnected => class == ConnectivityClass::Disconnected,
                        StatusFilter::Pending => false,
                    };
                    keep.then(|| Session {
                        connectivity: Some(class),
                        ..s.info.clone()
                    })
                })
                .collect(),
        };
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn contains_pending(&self, id: &SessionId) -> bool {
        let sessions = self.inner.sessions.lock();
        sessions.pending.contains_key(id) || sessions.approving.contains_key(id)
    }

    pub fn contains_connected(&self, id: &SessionId) -> bool {
        self.inner.sessions.lock().connected.contains_key(id)
    }

    /// Whether the id is known in any state.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.sessions.lock().contains(id)
    }

    pub fn connected_count(&self) -> usize {
        self.inner.sessions.lock().connected.len()
    }

    pub fn status(&self) -> AggregateStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AggregateStatus> {
        self.inner.status.subscribe()
    }
}

// ── Tests ────────────────────────────────────────────────────────
