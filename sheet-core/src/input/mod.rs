//! # Input relay
//!
//! Viewer → host control messages: pointer, keyboard and scroll events.
//!
//! | Module     | Purpose                                                  |
//! |------------|----------------------------------------------------------|
//! | `control`  | JSON wire format, key classification, injector actions  |
//! | `keymap`   | Browser key code → injector key name table              |
//! | `dispatch` | Host-side replay with the remote-control toggle         |
//! | `viewer`   | Viewer-side `eventsReady` gate and pointer rescaling    |

pub mod control;
pub mod dispatch;
pub mod keymap;
pub mod viewer;

pub use control::{
    ControlMessage, InputAction, KeyEvent, KeyMethod, PointerButton, PointerEvent, PointerMethod,
    ScrollEvent,
};
pub use dispatch::{InputDispatcher, InputInjector};
pub use viewer::{ControlChannel, Modifiers, ViewerControl};
