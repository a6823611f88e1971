//! Peer media link abstraction used by the direct transport.
//!
//! The network primitives (session descriptions, path discovery, media
//! tracks, data channels) belong to an external peer-connection stack;
//! these traits are the seam the direct transport drives it through.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::SheetError;
use crate::session::state::PeerConnectionState;
use crate::stream::capture::MediaTrack;
use crate::transport::DescriptorKind;

/// Local network-path discovery progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

pub type PeerStateHandler = Box<dyn Fn(PeerConnectionState) + Send + Sync>;

#[async_trait]
pub trait PeerLink: Send + Sync {
    fn add_track(&self, track: MediaTrack) -> Result<(), SheetError>;

    /// Swap the outgoing audio track in place.
    fn replace_audio_track(&self, track: MediaTrack) -> Result<(), SheetError>;

    /// Open an ordered, reliable side-channel.
    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SheetError>;

    async fn create_offer(&self) -> Result<String, SheetError>;

    async fn set_local_description(&self, kind: DescriptorKind, sdp: String) -> Result<(), SheetError>;

    async fn set_remote_description(&self, kind: DescriptorKind, sdp: String) -> Result<(), SheetError>;

    /// Local description including every candidate discovered so far.
    fn local_description(&self) -> Option<String>;

    /// Path-discovery progress; starts gathering once a local
    /// description is set.
    fn gathering_state(&self) -> watch::Receiver<GatheringState>;

    fn on_state_change(&self, handler: PeerStateHandler);

    async fn close(&self);
}

pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn send(&self, text: &str) -> Result<(), SheetError>;

    fn on_open(&self, handler: Box<dyn Fn() + Send + Sync>);

    fn on_message(&self, handler: Box<dyn Fn(&[u8]) + Send + Sync>);

    fn close(&self);
}

/// Creates one peer link per session.
pub trait PeerFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn PeerLink>, SheetError>;
}
