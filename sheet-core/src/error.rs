//! Domain-specific error types for screen-sharing sessions.
//!
//! All fallible operations return `Result<T, SheetError>`.
//! Errors are grouped into the four failure categories the session layer
//! reacts to differently (see [`ErrorCategory`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionId;

/// The canonical error type for the session and transport layer.
#[derive(Debug, Error)]
pub enum SheetError {
    // ── Configuration Errors ─────────────────────────────────────
    /// The capture source could not be acquired.
    #[error("capture source unavailable: {0}")]
    CaptureUnavailable(String),

    /// No entry of the codec preference list is supported locally.
    #[error("no supported codec in preference list {0:?}")]
    NoSupportedCodec(Vec<String>),

    /// Any other setup problem that makes a session impossible to start.
    #[error("configuration error: {0}")]
    Configuration(String),

    // ── Protocol Errors ──────────────────────────────────────────
    /// An inbound message could not be parsed or violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Received bytes that do not start with the link magic sequence.
    #[error("invalid magic bytes: expected SHT0")]
    InvalidMagic,

    /// A link frame failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Transport Errors ─────────────────────────────────────────
    /// The underlying link or peer connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// A relay subscriber is not keeping up; the frame was not queued.
    #[error("relay queue full for session {0}")]
    QueueFull(SessionId),

    /// A handshake step exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The host refused or ended the session.
    #[error("rejected by host: {0}")]
    Rejected(ErrorClass),

    // ── Encoding Errors ──────────────────────────────────────────
    /// Encoding or decoding of an image region, frame or chunk failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Registry Errors ──────────────────────────────────────────
    /// The session is not waiting for approval.
    #[error("session {0} is not pending")]
    NotPending(SessionId),

    /// The session is not known to the registry.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── ErrorCategory ────────────────────────────────────────────────

/// How the session layer reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fatal to session start, surfaced, never retried.
    Configuration,
    /// Message dropped and logged; the channel continues.
    Protocol,
    /// Link loss; drives automatic teardown, no retry.
    Transport,
    /// A single block or frame failed; only that unit is lost.
    Encoding,
    /// Registry misuse (wrong state, unknown id); no state was mutated.
    Registry,
}

impl SheetError {
    /// Category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CaptureUnavailable(_) | Self::NoSupportedCodec(_) | Self::Configuration(_) => {
                ErrorCategory::Configuration
            }
            Self::Protocol(_)
            | Self::InvalidMagic
            | Self::ChecksumMismatch
            | Self::FrameTooLarge { .. } => ErrorCategory::Protocol,
            Self::Transport(_)
            | Self::Connection(_)
            | Self::ChannelClosed
            | Self::QueueFull(_)
            | Self::Timeout(_)
            | Self::Rejected(_)
            | Self::Other(_) => ErrorCategory::Transport,
            Self::Encoding(_) => ErrorCategory::Encoding,
            Self::NotPending(_) | Self::UnknownSession(_) => ErrorCategory::Registry,
        }
    }

    /// Configuration errors end the session start; nothing else does.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Viewer-facing class to report for this error.
    pub fn error_class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) => ErrorClass::HandshakeTimeout,
            Self::Rejected(class) => *class,
            Self::NotPending(_) | Self::UnknownSession(_) => ErrorClass::InvalidCode,
            _ => ErrorClass::Unknown,
        }
    }
}

// ── ErrorClass ───────────────────────────────────────────────────

/// Error classes reported to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Invalid connection code or credential.
    InvalidCode,
    /// The host declined, or the viewer is not authorized.
    Declined,
    /// The host ended the session.
    RemoteDisconnect,
    /// The host did not answer in time.
    HandshakeTimeout,
    /// Anything else.
    Unknown,
}

impl ErrorClass {
    /// HTTP-style status code for the class.
    pub const fn code(self) -> u16 {
        match self {
            ErrorClass::InvalidCode => 404,
            ErrorClass::Declined => 403,
            ErrorClass::RemoteDisconnect => 410,
            ErrorClass::HandshakeTimeout => 408,
            ErrorClass::Unknown => 500,
        }
    }

    /// Human-readable message shown to the viewer.
    pub const fn message(self) -> &'static str {
        match self {
            ErrorClass::InvalidCode => "It looks like this connection code is invalid.",
            ErrorClass::Declined => "The host declined the connection request.",
            ErrorClass::RemoteDisconnect => "The host ended the session.",
            ErrorClass::HandshakeTimeout => "Connection was closed unexpectedly.",
            ErrorClass::Unknown => "An unknown error occurred.",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.message())
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for SheetError {
    fn from(s: String) -> Self {
        SheetError::Other(s)
    }
}

impl From<&str> for SheetError {
    fn from(s: &str) -> Self {
        SheetError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SheetError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SheetError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for SheetError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        SheetError::Protocol(e.to_string())
    }
}

impl From<serde_json::Error> for SheetError {
    fn from(e: serde_json::Error) -> Self {
        SheetError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = SheetError::FrameTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = SheetError::NotPending(SessionId::from("S1"));
        assert!(e.to_string().contains("S1"));
    }

    #[test]
    fn categories() {
        assert_eq!(
            SheetError::CaptureUnavailable("gone".into()).category(),
            ErrorCategory::Configuration
        );
        assert!(SheetError::NoSupportedCodec(vec!["vp9".into()]).is_fatal());
        assert_eq!(
            SheetError::Protocol("bad json".into()).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(SheetError::ChannelClosed.category(), ErrorCategory::Transport);
        assert_eq!(
            SheetError::Encoding("zstd".into()).category(),
            ErrorCategory::Encoding
        );
        assert!(!SheetError::Encoding("zstd".into()).is_fatal());
    }

    #[test]
    fn error_class_codes() {
        assert_eq!(ErrorClass::InvalidCode.code(), 404);
        assert_eq!(ErrorClass::Declined.code(), 403);
        assert_eq!(ErrorClass::RemoteDisconnect.code(), 410);
        assert_eq!(ErrorClass::HandshakeTimeout.code(), 408);
        assert_eq!(
            SheetError::Timeout(Duration::from_secs(1)).error_class(),
            ErrorClass::HandshakeTimeout
        );
    }

    #[test]
    fn from_string() {
        let e: SheetError = "something broke".into();
        assert!(matches!(e, SheetError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: SheetError = io_err.into();
        assert!(matches!(e, SheetError::Connection(_)));
    }

    #[test]
    fn from_json() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let e: SheetError = err.into();
        assert_eq!(e.category(), ErrorCategory::Protocol);
    }
}
