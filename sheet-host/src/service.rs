//! Host service core logic.
//!
//! Accepts viewer links over TCP and bridges each one onto the in-memory
//! relay topics of the session it requested. The link layer assigns the
//! session id; everything else is decided by the [`HostExchange`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use sheet_core::error::SheetError;
use sheet_core::input::{ControlMessage, InputDispatcher, InputInjector};
use sheet_core::network::{RelayConnection, RelaySender};
use sheet_core::relay::{Direction, LocalRelay, Relay, RelayFrame};
use sheet_core::session::{HostExchange, SessionId, SessionRegistry};
use sheet_core::signaling::{SignalMessage, SignalSink};
use sheet_core::stream::capture::ScreenCaptureSource;
use sheet_core::transport::TransportStrategy;

use crate::config::SheetHostConfig;

// ── LinkRouter ───────────────────────────────────────────────────

/// Delivers outbound signaling to the link of the session it names.
#[derive(Default)]
pub struct LinkRouter {
    links: Mutex<HashMap<SessionId, RelaySender>>,
}

impl LinkRouter {
    pub fn register(&self, session: SessionId, link: RelaySender) {
        self.links.lock().insert(session, link);
    }

    pub fn unregister(&self, session: &SessionId) {
        self.links.lock().remove(session);
    }

    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }
}

impl SignalSink for LinkRouter {
    fn send(&self, message: SignalMessage) {
        let Some(session) = message.session_id().cloned() else {
            warn!(kind = message.kind(), "dropping signal without a session");
            return;
        };
        let link = self.links.lock().get(&session).cloned();
        match link {
            Some(link) => {
                let kind = message.kind();
                if let Err(e) = link.try_send(RelayFrame::Signal(message)) {
                    warn!(%session, kind, "signal not delivered: {e}");
                }
            }
            None => debug!(%session, kind = message.kind(), "no link for signal"),
        }
    }
}

// ── HostService ──────────────────────────────────────────────────

/// The top-level sharing host.
pub struct HostService {
    config: SheetHostConfig,
    exchange: HostExchange,
    dispatcher: Arc<InputDispatcher>,
    links: LinkContext,
    running: Arc<AtomicBool>,
}

impl HostService {
    pub fn new(
        config: SheetHostConfig,
        capture: Arc<dyn ScreenCaptureSource>,
        injector: Arc<dyn InputInjector>,
    ) -> Result<Self, SheetError> {
        let relay = Arc::new(LocalRelay::new());
        let router = Arc::new(LinkRouter::default());

        config.transport_kind()?;
        let strategy = TransportStrategy::Relayed {
            relay: Arc::clone(&relay) as Arc<dyn Relay>,
            options: config.to_relayed_options()?,
        };

        let dispatcher = Arc::new(InputDispatcher::new(
            injector,
            config.session.remote_control,
        ));
        let sink = Arc::clone(&dispatcher);
        let registry = SessionRegistry::new(
            config.to_registry_config(),
            capture,
            strategy,
            Arc::clone(&router) as Arc<dyn SignalSink>,
        )
        .with_control_sink(Arc::new(move |id: &SessionId, msg: ControlMessage| {
            sink.dispatch(id, &msg)
        }));
        let exchange = HostExchange::new(registry, router.clone(), config.to_host_config());

        let links = LinkContext {
            exchange: exchange.clone(),
            relay,
            router,
            request_timeout: config.handshake_timeout(),
            active: Arc::new(AtomicUsize::new(0)),
        };

        Ok(Self {
            config,
            exchange,
            dispatcher,
            links,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn exchange(&self) -> &HostExchange {
        &self.exchange
    }

    pub fn dispatcher(&self) -> &Arc<InputDispatcher> {
        &self.dispatcher
    }

    /// Number of open viewer links.
    pub fn active_links(&self) -> usize {
        self.links.active.load(Ordering::SeqCst)
    }

    /// Obtain a handle that can be used to stop the service from
    /// another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn bind(&self) -> Result<TcpListener, SheetError> {
        Ok(TcpListener::bind(self.config.listen_addr()).await?)
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> Result<(), SheetError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept viewer links until stopped, then close every session.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), SheetError> {
        self.running.store(true, Ordering::SeqCst);
        info!("host listening on {}", listener.local_addr()?);

        while self.running.load(Ordering::SeqCst) {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = Self::wait_for_stop(&self.running) => break,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            if self.active_links() >= self.config.network.max_links {
                warn!(%peer, "refusing link: {} links open", self.active_links());
                continue;
            }

            let link = self.links.clone();
            link.active.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let active = Arc::clone(&link.active);
                link.serve(stream, peer).await;
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }

        self.exchange.stop().await;
        self.running.store(false, Ordering::SeqCst);
        info!("host service stopped");
        Ok(())
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
}

// ── Per-link bridge ──────────────────────────────────────────────

#[derive(Clone)]
struct LinkContext {
    exchange: HostExchange,
    relay: Arc<LocalRelay>,
    router: Arc<LinkRouter>,
    request_timeout: Duration,
    active: Arc<AtomicUsize>,
}

impl LinkContext {
    async fn serve(self, stream: TcpStream, peer: SocketAddr) {
        let (tx, mut rx) = RelayConnection::new(stream).into_split();

        let credential = match tokio::time::timeout(self.request_timeout, rx.recv()).await {
            Ok(Some(RelayFrame::Signal(SignalMessage::Request { credential, .. }))) => credential,
            Ok(Some(other)) => {
                warn!(%peer, kind = other.kind(), "expected a request; closing link");
                return;
            }
            Ok(None) => {
                debug!(%peer, "link closed before a request arrived");
                return;
            }
            Err(_) => {
                warn!(%peer, "no request within {:?}", self.request_timeout);
                return;
            }
        };

        let session = SessionId::generate();
        self.router.register(session.clone(), tx.clone());
        let mut downstream = self.relay.subscribe(&session, Direction::Downstream);
        let forward = tokio::spawn(async move {
            while let Some(frame) = downstream.recv().await {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        });
        info!(%peer, %session, "viewer link opened");

        let request = SignalMessage::Request {
            session_id: session.clone(),
            remote_address: Some(peer.to_string()),
            credential,
        };
        if let Err(e) = self.exchange.on_signal(request).await {
            warn!(%session, "request failed: {e}");
        }

        while let Some(frame) = rx.recv().await {
            match frame {
                RelayFrame::Control(bytes) => {
                    if let Err(e) =
                        self.relay
                            .publish(&session, Direction::Upstream, RelayFrame::Control(bytes))
                    {
                        debug!(%session, "control not relayed: {e}");
                    }
                }
                RelayFrame::Signal(message) => {
                    if message.session_id() != Some(&session) {
                        warn!(%session, kind = message.kind(), "dropping signal for another session");
                        continue;
                    }
                    let leaving = matches!(message, SignalMessage::Disconnect { .. });
                    if let Err(e) = self.exchange.on_signal(message).await {
                        warn!(%session, "signal failed: {e}");
                    }
                    if leaving {
                        break;
                    }
                }
                other => debug!(%session, kind = other.kind(), "ignoring frame from viewer"),
            }
        }

        self.router.unregister(&session);
        self.relay.close_session(&session);
        self.exchange.link_lost(&session).await;
        forward.abort();
        info!(%peer, %session, "viewer link closed");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::LoggingInjector;
    use crate::source::TestPatternSource;
    use sheet_core::error::ErrorClass;
    use sheet_core::session::AggregateStatus;
    use sheet_core::signaling::Credential;
    use sheet_core::transport::{HandshakeDescriptor, TransportKind};

    const WAIT: Duration = Duration::from_secs(5);

    fn local_config() -> SheetHostConfig {
        let mut cfg = SheetHostConfig::default();
        cfg.network.listen_address = "127.0.0.1".into();
        cfg.network.port = 0;
        cfg.screen.width = 96;
        cfg.screen.height = 64;
        cfg.screen.fps = 30;
        cfg
    }

    fn service(cfg: SheetHostConfig) -> (Arc<HostService>, Arc<LoggingInjector>) {
        let injector = Arc::new(LoggingInjector::new());
        let svc = HostService::new(
            cfg.clone(),
            Arc::new(TestPatternSource::new(cfg.screen.width, cfg.screen.height)),
            injector.clone(),
        )
        .unwrap();
        (Arc::new(svc), injector)
    }

    fn request(code: &str) -> RelayFrame {
        RelayFrame::Signal(SignalMessage::Request {
            session_id: SessionId::default(),
            remote_address: None,
            credential: Some(Credential::Code(code.into())),
        })
    }

    #[test]
    fn service_creates_with_defaults() {
        let (svc, _) = service(SheetHostConfig::default());
        assert!(!svc.is_running());
        assert_eq!(svc.active_links(), 0);
    }

    #[test]
    fn direct_transport_is_refused() {
        let mut cfg = SheetHostConfig::default();
        cfg.session.transport = "direct".into();
        let result = HostService::new(
            cfg,
            Arc::new(TestPatternSource::new(8, 8)),
            Arc::new(LoggingInjector::new()),
        );
        assert!(matches!(result, Err(SheetError::Configuration(_))));
    }

    #[tokio::test]
    async fn viewer_link_streams_and_controls() {
        let (svc, injector) = service(local_config());
        let code = svc.exchange().start();
        let listener = svc.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.serve(listener).await })
        };

        let mut viewer = RelayConnection::connect(addr, WAIT).await.unwrap();
        viewer.send(request(code.as_str())).await.unwrap();

        let mut session = None;
        let mut size = None;
        let mut full_frame = false;
        while session.is_none() || size.is_none() || !full_frame {
            match tokio::time::timeout(WAIT, viewer.recv()).await.unwrap().unwrap() {
                RelayFrame::Signal(SignalMessage::Accepted {
                    session_id,
                    transport_kind,
                    descriptor,
                }) => {
                    assert_eq!(transport_kind, TransportKind::Relayed);
                    assert!(matches!(descriptor, HandshakeDescriptor::Relayed { width: 96, .. }));
                    session = Some(session_id);
                }
                RelayFrame::ScreenSize(s) => size = Some(s),
                RelayFrame::FullFrame(region) => {
                    assert_eq!(region.rect.width, 96);
                    full_frame = true;
                }
                _ => {}
            }
        }
        assert_eq!(svc.exchange().registry().status(), AggregateStatus::Connected);

        viewer
            .send(RelayFrame::Control(
                br#"{"type":"pointer","x":10,"y":20,"method":"down","button":"left"}"#.to_vec(),
            ))
            .await
            .unwrap();
        tokio::time::timeout(WAIT, async {
            while injector.applied() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let session = session.unwrap();
        viewer
            .send(RelayFrame::Signal(SignalMessage::Disconnect {
                session_id: session.clone(),
            }))
            .await
            .unwrap();
        let mut status = svc.exchange().registry().subscribe_status();
        tokio::time::timeout(WAIT, async {
            while status.borrow_and_update().is_connected() {
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(!svc.exchange().registry().contains(&session));

        svc.stop();
        tokio::time::timeout(WAIT, server).await.unwrap().unwrap().unwrap();
        assert!(svc.exchange().active_code().is_none());
    }

    #[tokio::test]
    async fn wrong_code_gets_invalid_code() {
        let (svc, _) = service(local_config());
        svc.exchange().start();
        let listener = svc.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move { svc.serve(listener).await })
        };

        let mut viewer = RelayConnection::connect(addr, WAIT).await.unwrap();
        viewer.send(request("NOTACODE")).await.unwrap();
        let reply = tokio::time::timeout(WAIT, viewer.recv()).await.unwrap();
        assert!(matches!(
            reply,
            Some(RelayFrame::Signal(SignalMessage::Error {
                class: ErrorClass::InvalidCode,
                ..
            }))
        ));

        svc.stop();
        tokio::time::timeout(WAIT, server).await.unwrap().unwrap().unwrap();
    }
}
