//! # sheet-host — Screensheet sharing host
//!
//! Listens for viewer links over TCP, checks each request against the
//! active connection code, and streams the screen to approved viewers
//! through the relayed transport. Viewer input is replayed through an
//! [`InputInjector`](sheet_core::input::InputInjector).
//!
//! The bundled capture source renders a test pattern and the bundled
//! injector only logs; real platform backends plug in through the
//! same traits.

pub mod config;
pub mod injector;
pub mod service;
pub mod source;
