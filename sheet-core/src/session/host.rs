//! Host side of the signaling exchange.
//!
//! [`HostExchange`] owns the connection code, checks credentials, and
//! turns inbound [`SignalMessage`]s into registry operations. Every
//! outcome the viewer must learn about goes out through the
//! [`SignalSink`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ErrorClass, SheetError};
use crate::session::registry::SessionRegistry;
use crate::session::{Session, SessionId};
use crate::signaling::{ConnectionCode, Credential, CredentialStore, SignalMessage, SignalSink};

/// Default time a manual approval may take before the viewer gets 408.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Approve every authorized request immediately.
    pub auto_approve: bool,
    pub approval_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            auto_approve: true,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct HostExchange {
    registry: SessionRegistry,
    signals: Arc<dyn SignalSink>,
    credentials: Option<Arc<dyn CredentialStore>>,
    code: Arc<Mutex<Option<ConnectionCode>>>,
    config: HostConfig,
}

impl HostExchange {
    pub fn new(registry: SessionRegistry, signals: Arc<dyn SignalSink>, config: HostConfig) -> Self {
        Self {
            registry,
            signals,
            credentials: None,
            code: Arc::new(Mutex::new(None)),
            config,
        }
    }

    /// Accept `Login` credentials checked against `store`.
    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ── Sharing ───────────────────────────────────────────────────

    /// Start sharing under a fresh connection code.
    pub fn start(&self) -> ConnectionCode {
        let code = ConnectionCode::generate();
        *self.code.lock() = Some(code.clone());
        info!(%code, "sharing started");
        code
    }

    /// Stop sharing: forget the code and close every session.
    pub async fn stop(&self) {
        if self.code.lock().take().is_some() {
            info!("sharing stopped");
        }
        self.registry.disconnect_all().await;
    }

    pub fn active_code(&self) -> Option<ConnectionCode> {
        self.code.lock().clone()
    }

    fn authorize(&self, credential: Option<&Credential>) -> bool {
        if self.code.lock().is_none() {
            return false;
        }
        match credential {
            Some(Credential::Code(input)) => self
                .code
                .lock()
                .as_ref()
                .is_some_and(|code| code.matches(input)),
            Some(Credential::Login { username, password }) => self
                .credentials
                .as_ref()
                .is_some_and(|store| store.verify(username, password)),
            None => false,
        }
    }

    // ── Inbound ───────────────────────────────────────────────────

    /// Handle one message from a viewer.
    pub async fn on_signal(&self, message: SignalMessage) -> Result<(), SheetError> {
        debug!(kind = message.kind(), session = ?message.session_id(), "inbound signal");
        match message {
            SignalMessage::Request {
                session_id,
                remote_address,
                credential,
            } => {
                self.on_request(session_id, remote_address, credential)
                    .await
            }
            SignalMessage::Answer {
                session_id,
                descriptor,
            } => self.registry.accept_answer(&session_id, descriptor).await,
            SignalMessage::Disconnect { session_id } => {
                if self.registry.link_lost(&session_id).await {
                    info!(session = %session_id, "viewer disconnected");
                }
                Ok(())
            }
            other => Err(SheetError::Protocol(format!(
                "unexpected {} message from viewer",
                other.kind()
            ))),
        }
    }

    async fn on_request(
        &self,
        session_id: SessionId,
        remote_address: Option<String>,
        credential: Option<Credential>,
    ) -> Result<(), SheetError> {
        if session_id.is_unassigned() {
            return Err(SheetError::Protocol("request without a session id".into()));
        }
        if !self.authorize(credential.as_ref()) {
            warn!(session = %session_id, ?remote_address, "rejected request with invalid credential");
            self.reject(&session_id, ErrorClass::InvalidCode);
            return Ok(());
        }

        self.registry
            .add_pending_request(session_id.clone(), remote_address)?;
        if self.config.auto_approve {
            self.approve(&session_id).await
        } else {
            self.spawn_approval_timeout(session_id);
            Ok(())
        }
    }

    fn spawn_approval_timeout(&self, session_id: SessionId) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.config.approval_timeout).await;
            if this.registry.remove_pending(&session_id) {
                info!(session = %session_id, "approval timed out");
                this.reject(&session_id, ErrorClass::HandshakeTimeout);
            }
        });
    }

    fn reject(&self, session_id: &SessionId, class: ErrorClass) {
        self.signals.send(SignalMessage::Error {
            session_id: Some(session_id.clone()),
            class,
        });
    }

    // ── Host decisions ────────────────────────────────────────────

    /// Approve a pending request and answer the viewer either way.
    pub async fn approve(&self, session_id: &SessionId) -> Result<(), SheetError> {
        match self.registry.approve(session_id).await {
            Ok(descriptor) => {
                self.signals.send(SignalMessage::Accepted {
                    session_id: session_id.clone(),
                    transport_kind: self.registry.transport_kind(),
                    descriptor,
                });
                Ok(())
            }
            Err(e) => {
                self.reject(session_id, e.error_class());
                Err(e)
            }
        }
    }

    pub fn decline(&self, session_id: &SessionId) -> Result<(), SheetError> {
        self.registry.decline(session_id)
    }

    pub async fn disconnect(&self, session_id: &SessionId) -> Option<Session> {
        self.registry.disconnect(session_id).await
    }

    /// The viewer's link dropped.
    pub async fn link_lost(&self, session_id: &SessionId) {
        if self.registry.link_lost(session_id).await {
            info!(session = %session_id, "viewer link lost");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
