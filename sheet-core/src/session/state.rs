//! Session lifecycle and connectivity classification.
//!
//! Two independent state machines live here:
//!
//! - [`SessionState`]: the host-authoritative lifecycle of one viewer
//!   session, with validated transitions that return `Result`.
//! - [`ConnectivityTracker`]: folds native peer-connection states into the
//!   3-bucket [`ConnectivityClass`] and only ever moves forward.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SheetError;

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle of one viewer session.
///
/// ```text
///  Pending ──► Connected ──► Disconnected
///     │                          ▲
///     └──────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Pending,
    Connected,
    /// Terminal.
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl SessionState {
    /// Valid from: `Pending`.
    pub fn connect(&mut self) -> Result<(), SheetError> {
        match self {
            Self::Pending => {
                *self = Self::Connected;
                Ok(())
            }
            other => Err(SheetError::Protocol(format!(
                "cannot connect: session is {other}"
            ))),
        }
    }

    /// Valid from: `Pending`, `Connected`.
    pub fn disconnect(&mut self) -> Result<(), SheetError> {
        match self {
            Self::Pending | Self::Connected => {
                *self = Self::Disconnected;
                Ok(())
            }
            Self::Disconnected => Err(SheetError::Protocol(
                "cannot disconnect: session already disconnected".into(),
            )),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

// ── Peer connection states ───────────────────────────────────────

/// Native connection states reported by a direct peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerConnectionState {
    New,
    Checking,
    Connecting,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl FromStr for PeerConnectionState {
    type Err = SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "new" => Self::New,
            "checking" => Self::Checking,
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            "completed" => Self::Completed,
            "disconnected" => Self::Disconnected,
            "failed" => Self::Failed,
            "closed" => Self::Closed,
            other => {
                return Err(SheetError::Protocol(format!(
                    "unknown peer connection state {other:?}"
                )));
            }
        })
    }
}

// ── ConnectivityClass ────────────────────────────────────────────

/// The 3-bucket connectivity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectivityClass {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectivityClass {
    pub fn from_peer_state(state: PeerConnectionState) -> Self {
        use PeerConnectionState as P;
        match state {
            P::New | P::Checking | P::Connecting => Self::Connecting,
            P::Connected | P::Completed => Self::Connected,
            P::Disconnected | P::Failed | P::Closed => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectivityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Monotonic view over a stream of connectivity classes.
///
/// Never regresses from `Connected` to `Connecting`; `Disconnected` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityTracker {
    current: ConnectivityClass,
}

impl ConnectivityTracker {
    pub fn new(initial: ConnectivityClass) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> ConnectivityClass {
        self.current
    }

    /// Feed the next observed class. Returns it if the tracked class
    /// changed.
    pub fn advance(&mut self, next: ConnectivityClass) -> Option<ConnectivityClass> {
        if next > self.current {
            self.current = next;
            Some(next)
        } else {
            None
        }
    }

    /// Feed a native peer state.
    pub fn observe(&mut self, state: PeerConnectionState) -> Option<ConnectivityClass> {
        self.advance(ConnectivityClass::from_peer_state(state))
    }
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new(ConnectivityClass::Connecting)
    }
}

// ── Filters & aggregate status ───────────────────────────────────

/// Selector for [`SessionRegistry::filter`](crate::session::SessionRegistry::filter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFilter {
    /// Every session in the connected set, whatever its connectivity.
    All,
    Connected,
    Connecting,
    Disconnected,
    Pending,
}

impl FromStr for StatusFilter {
    type Err = SheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "connected" => Ok(Self::Connected),
            "connecting" => Ok(Self::Connecting),
            "disconnected" => Ok(Self::Disconnected),
            "pending" => Ok(Self::Pending),
            other => Err(SheetError::Protocol(format!("unknown status filter {other:?}"))),
        }
    }
}

/// Host-wide status: `Connected` iff at least one session is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggregateStatus {
    /// No session has connected yet.
    #[default]
    Idle,
    Connected,
    /// Every previously connected session is gone.
    Disconnected,
}

impl AggregateStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}
