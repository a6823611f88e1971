//! Signaling schema and collaborators.
//!
//! The messages are transport-agnostic: the TCP relay link carries them
//! as bincode inside [`RelayFrame::Signal`](crate::relay::RelayFrame),
//! an in-process host hands them to a [`SignalSink`] directly.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;
use crate::session::SessionId;
use crate::transport::{HandshakeDescriptor, TransportKind};

/// Length of a connection code.
pub const CODE_LEN: usize = 8;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// ── ConnectionCode ───────────────────────────────────────────────

/// Short code a viewer types to reach a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionCode(String);

impl ConnectionCode {
    /// Random 8-character uppercase alphanumeric code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalise user input: uppercase, strip anything that is not
    /// alphanumeric. `None` unless exactly 8 characters remain.
    pub fn parse(input: &str) -> Option<Self> {
        let code: String = input
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        (code.len() == CODE_LEN).then_some(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against raw viewer input after normalisation.
    pub fn matches(&self, input: &str) -> bool {
        Self::parse(input).is_some_and(|c| c == *self)
    }
}

impl fmt::Display for ConnectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Messages ─────────────────────────────────────────────────────

/// How a viewer proves it may connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    Code(String),
    Login { username: String, password: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalMessage {
    /// Viewer → host. `session_id` is assigned by the link layer.
    Request {
        session_id: SessionId,
        remote_address: Option<String>,
        credential: Option<Credential>,
    },
    /// Host → viewer.
    Accepted {
        session_id: SessionId,
        transport_kind: TransportKind,
        descriptor: HandshakeDescriptor,
    },
    /// Host → viewer.
    Declined { session_id: SessionId },
    /// Viewer → host, direct transport only.
    Answer {
        session_id: SessionId,
        descriptor: HandshakeDescriptor,
    },
    /// Either direction.
    Disconnect { session_id: SessionId },
    /// Host → viewer.
    Error {
        session_id: Option<SessionId>,
        class: ErrorClass,
    },
}

impl SignalMessage {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Request { session_id, .. }
            | Self::Accepted { session_id, .. }
            | Self::Declined { session_id }
            | Self::Answer { session_id, .. }
            | Self::Disconnect { session_id } => Some(session_id),
            Self::Error { session_id, .. } => session_id.as_ref(),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Accepted { .. } => "accepted",
            Self::Declined { .. } => "declined",
            Self::Answer { .. } => "answer",
            Self::Disconnect { .. } => "disconnect",
            Self::Error { .. } => "error",
        }
    }
}

// ── Collaborators ────────────────────────────────────────────────

/// Outbound signaling toward viewers. Delivery is best-effort.
pub trait SignalSink: Send + Sync {
    fn send(&self, message: SignalMessage);
}

/// Verifies login credentials. Storage and hashing live elsewhere.
pub trait CredentialStore: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> bool;
}
