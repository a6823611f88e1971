//! Message relay keyed by session.
//!
//! Every session has two topics: `Downstream` (host → viewer: screen
//! size, frames, signals) and `Upstream` (viewer → host: control
//! messages, signals). [`LocalRelay`] is an in-process bus; the host
//! binary bridges TCP links onto it.
//!
//! Closing a session drops every subscriber sender, so receivers observe
//! end-of-stream; the relayed transport treats that as link loss.
//!
//! Subscriber queues are bounded. A subscriber that falls behind misses
//! frames and the publisher gets [`SheetError::QueueFull`].

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::SheetError;
use crate::session::SessionId;
use crate::signaling::SignalMessage;
use crate::stream::continuous::StreamChunk;
use crate::stream::types::{EncodedRegion, ScreenSize};

/// Frames buffered per subscriber before publishing reports a full queue.
pub const TOPIC_CAPACITY: usize = 32;

// ── RelayFrame ───────────────────────────────────────────────────

/// Unit carried by the relay and by the TCP link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayFrame {
    Signal(SignalMessage),
    ScreenSize(ScreenSize),
    FullFrame(EncodedRegion),
    PatchBatch(Vec<EncodedRegion>),
    Chunk(StreamChunk),
    /// Raw JSON control message.
    Control(Vec<u8>),
}

impl RelayFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Signal(_) => "signal",
            Self::ScreenSize(_) => "screen-size",
            Self::FullFrame(_) => "full-frame",
            Self::PatchBatch(_) => "patch-batch",
            Self::Chunk(_) => "chunk",
            Self::Control(_) => "control",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host → viewer.
    Downstream,
    /// Viewer → host.
    Upstream,
}

// ── Relay ────────────────────────────────────────────────────────

/// Per-session, in-order message relay.
pub trait Relay: Send + Sync {
    /// Deliver to every current subscriber of the topic. Returns how many
    /// subscribers received the frame; zero subscribers is not an error.
    ///
    /// Fails with [`SheetError::QueueFull`] if any subscriber's queue had
    /// no room; that subscriber does not get the frame.
    fn publish(
        &self,
        session: &SessionId,
        direction: Direction,
        frame: RelayFrame,
    ) -> Result<usize, SheetError>;

    /// Subscribe to a topic. The receiver ends when the session closes.
    fn subscribe(
        &self,
        session: &SessionId,
        direction: Direction,
    ) -> mpsc::Receiver<RelayFrame>;

    /// Drop both topics of a session.
    fn close_session(&self, session: &SessionId);
}

// ── LocalRelay ───────────────────────────────────────────────────

type Topic = (SessionId, Direction);

/// In-process relay over bounded channels.
pub struct LocalRelay {
    topics: RwLock<HashMap<Topic, Vec<mpsc::Sender<RelayFrame>>>>,
    capacity: usize,
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::with_capacity(TOPIC_CAPACITY)
    }
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay whose subscribers buffer at most `capacity` frames each.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of sessions with at least one topic.
    pub fn session_count(&self) -> usize {
        let topics = self.topics.read();
        let mut ids: Vec<&SessionId> = topics.keys().map(|(id, _)| id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}

impl Relay for LocalRelay {
    fn publish(
        &self,
        session: &SessionId,
        direction: Direction,
        frame: RelayFrame,
    ) -> Result<usize, SheetError> {
        let key = (session.clone(), direction);
        let mut topics = self.topics.write();
        let Some(subscribers) = topics.get_mut(&key) else {
            trace!(%session, ?direction, kind = frame.kind(), "no subscribers");
            return Ok(0);
        };
        let mut delivered = 0;
        let mut full = 0;
        subscribers.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                full += 1;
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if full > 0 {
            debug!(%session, ?direction, kind = frame.kind(), full, "subscriber queue full");
            return Err(SheetError::QueueFull(session.clone()));
        }
        Ok(delivered)
    }

    fn subscribe(&self, session: &SessionId, direction: Direction) -> mpsc::Receiver<RelayFrame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.topics
            .write()
            .entry((session.clone(), direction))
            .or_default()
            .push(tx);
        rx
    }

    fn close_session(&self, session: &SessionId) {
        let mut topics = self.topics.write();
        topics.remove(&(session.clone(), Direction::Downstream));
        topics.remove(&(session.clone(), Direction::Upstream));
    }
}
