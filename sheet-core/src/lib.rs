//! # sheet-core
//!
//! Session and transport orchestration for Screensheet screen sharing.
//!
//! This crate contains:
//! - **Session**: `SessionRegistry` (pending/connected sets) and `HostExchange`
//!   (connection code, access policy, signaling dispatch)
//! - **Transport**: the `Transport` contract with `DirectTransport` (peer media
//!   link plus ordered input channel) and `RelayedTransport` (encoded updates
//!   through the relay)
//! - **Stream**: block diffing, region encoding, reassembly, the `xor-zstd`
//!   continuous codec, and the per-session capture loop
//! - **Input**: control message schema, key table, host dispatch and the
//!   viewer-side `eventsReady` gate
//! - **Relay**: per-session topics, `RelayCodec` for framed TCP links and
//!   `RelayConnection`
//! - **Error**: `SheetError`, typed and `thiserror`-based

pub mod codec;
pub mod error;
pub mod input;
pub mod network;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod stream;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{HEADER_LENGTH, MAX_PAYLOAD_SIZE, RelayCodec};
pub use error::{ErrorCategory, ErrorClass, SheetError};
pub use input::{ControlMessage, InputDispatcher, InputInjector, ViewerControl};
pub use network::{RelayConnection, RelaySender};
pub use relay::{Direction, LocalRelay, Relay, RelayFrame};
pub use session::{
    AggregateStatus, ConnectivityClass, HostConfig, HostExchange, RegistryConfig, Session,
    SessionId, SessionRegistry, SessionState, StatusFilter,
};
pub use signaling::{ConnectionCode, Credential, CredentialStore, SignalMessage, SignalSink};
pub use stream::{
    CaptureStream, DiffPipeline, EncodedRegion, Frame, OrderedChunkDecoder, Reassembler,
    ScreenCaptureSource, ScreenSize,
};
pub use transport::{
    HandshakeDescriptor, RelayMode, RelayedOptions, Transport, TransportKind, TransportStrategy,
};
