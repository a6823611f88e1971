//! # Sessions
//!
//! The host-authoritative side of a share: the [`SessionRegistry`] owns
//! every pending and connected viewer session, and the [`HostExchange`]
//! drives it from inbound signaling messages.
//!
//! | Module     | Purpose                                                  |
//! |------------|----------------------------------------------------------|
//! | `state`    | Lifecycle state machine, connectivity buckets, filters   |
//! | `registry` | Pending/connected sets, approve/decline/disconnect       |
//! | `host`     | Connection code, access policy, signaling dispatch       |

pub mod host;
pub mod registry;
pub mod state;

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::transport::TransportKind;

pub use host::{HostConfig, HostExchange};
pub use registry::{ControlSink, RegistryConfig, SessionRegistry};
pub use state::{
    AggregateStatus, ConnectivityClass, ConnectivityTracker, PeerConnectionState, SessionState,
    StatusFilter,
};

// ── SessionId ────────────────────────────────────────────────────

/// Opaque session identifier, unique per viewer connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh random id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the link layer still has to assign an id.
    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Records ──────────────────────────────────────────────────────

/// A connection request waiting for approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub session_id: SessionId,
    pub remote_address: Option<String>,
    pub requested_at: SystemTime,
}

/// Metadata of one session as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub remote_address: Option<String>,
    pub connected_at: Option<SystemTime>,
    pub transport_kind: Option<TransportKind>,
    /// Live connectivity bucket; `None` while pending.
    pub connectivity: Option<ConnectivityClass>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(!a.is_unassigned());
        assert!(SessionId::default().is_unassigned());
        assert_eq!(SessionId::from("S1").to_string(), "S1");
    }
}
