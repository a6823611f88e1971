//! # Transports
//!
//! How media and control flow for one session. Exactly two
//! implementations exist, chosen once per session by the registry's
//! [`TransportStrategy`]:
//!
//! | Variant                                 | Media                     | Control                   |
//! |-----------------------------------------|---------------------------|---------------------------|
//! | [`DirectTransport`](direct::DirectTransport)   | peer media tracks         | ordered `input` channel   |
//! | [`RelayedTransport`](relayed::RelayedTransport) | encoded updates via relay | relay upstream topic      |

pub mod direct;
pub mod peer;
pub mod relayed;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SheetError;
use crate::input::control::ControlMessage;
use crate::relay::Relay;
use crate::session::SessionId;
use crate::session::state::ConnectivityClass;
use crate::stream::capture::{CaptureStream, MediaTrack};

pub use direct::DirectTransport;
pub use peer::{DataChannel, GatheringState, PeerFactory, PeerLink};
pub use relayed::{RelayedOptions, RelayedTransport};

/// Default deadline for one handshake step.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Descriptors ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Direct,
    Relayed,
}

/// How a relayed session encodes the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayMode {
    /// Block diffing with independent patches.
    Diff,
    /// Ordered inter-frame bitstream.
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorKind {
    Offer,
    Answer,
}

/// Setup payload exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeDescriptor {
    /// Direct transport session description.
    Session { kind: DescriptorKind, sdp: String },
    /// Relayed transport parameters; no answer is expected.
    Relayed {
        width: u32,
        height: u32,
        mode: RelayMode,
        codec: Option<String>,
    },
}

// ── Transport ────────────────────────────────────────────────────

/// Called once per inbound control message.
pub type ControlHandler = Arc<dyn Fn(ControlMessage) + Send + Sync>;

/// Called whenever the connectivity class advances.
pub type StateHandler = Arc<dyn Fn(ConnectivityClass) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Current connectivity class.
    fn connectivity(&self) -> ConnectivityClass;

    /// Produce the local handshake descriptor. Takes ownership of the
    /// capture stream; it is released on teardown.
    async fn create_offer(
        &self,
        capture: Arc<dyn CaptureStream>,
        audio_enabled: bool,
    ) -> Result<HandshakeDescriptor, SheetError>;

    /// Complete the handshake with the viewer's answer.
    async fn accept_remote_answer(&self, answer: HandshakeDescriptor) -> Result<(), SheetError>;

    /// Malformed inbound payloads are dropped before reaching `on_message`.
    fn attach_control_channel(&self, on_message: ControlHandler);

    /// The handler sees a monotonic sequence of classes.
    fn on_state_change(&self, handler: StateHandler);

    /// Swap outgoing audio between silence (`enabled == false` or no
    /// source) and `source`, without renegotiating.
    async fn replace_audio_track(
        &self,
        enabled: bool,
        source: Option<MediaTrack>,
    ) -> Result<(), SheetError>;

    /// Release everything. Idempotent.
    async fn teardown(&self);
}

// ── TransportStrategy ────────────────────────────────────────────

/// Which transport new sessions get.
#[derive(Clone)]
pub enum TransportStrategy {
    Direct {
        peers: Arc<dyn PeerFactory>,
        handshake_timeout: Duration,
    },
    Relayed {
        relay: Arc<dyn Relay>,
        options: RelayedOptions,
    },
}

impl TransportStrategy {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Direct { .. } => TransportKind::Direct,
            Self::Relayed { .. } => TransportKind::Relayed,
        }
    }

    /// Build the transport for one session.
    pub fn create(&self, session: &SessionId) -> Result<Arc<dyn Transport>, SheetError> {
        Ok(match self {
            Self::Direct {
                peers,
                handshake_timeout,
            } => Arc::new(DirectTransport::new(
                session.clone(),
                peers.create()?,
                *handshake_timeout,
            )?),
            Self::Relayed { relay, options } => Arc::new(RelayedTransport::new(
                session.clone(),
                Arc::clone(relay),
                options.clone(),
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_survive_bincode() {
        let d = HandshakeDescriptor::Relayed {
            width: 1280,
            height: 720,
            mode: RelayMode::Continuous,
            codec: Some("xor-zstd".into()),
        };
        let back: HandshakeDescriptor = bincode::deserialize(&bincode::serialize(&d).unwrap()).unwrap();
        assert_eq!(back, d);
    }
}
