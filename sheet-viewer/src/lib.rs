//! # sheet-viewer — headless Screensheet viewer
//!
//! Joins a host with a connection code, keeps a reconstructed copy of
//! the shared screen, and forwards rescaled input back over the same
//! relay link.

pub mod config;
pub mod connection;
