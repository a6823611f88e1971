//! Viewer-side control: the `eventsReady` gate and coordinate mapping.
//!
//! Nothing is sent until the host's screen dimensions are known. Local
//! pointer coordinates are rescaled by `host / rendered` so the host only
//! ever sees its own pixel space.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, trace};

use crate::error::SheetError;
use crate::input::control::{
    ControlMessage, KeyEvent, KeyMethod, PointerButton, PointerEvent, PointerMethod, ScrollEvent,
};
use crate::stream::types::ScreenSize;

bitflags! {
    /// Modifier keys held while an event was produced.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const ALT   = 0b0001;
        const CTRL  = 0b0010;
        const META  = 0b0100;
        const SHIFT = 0b1000;
    }
}

/// Outbound control path toward the host.
pub trait ControlChannel: Send + Sync {
    fn send(&self, payload: Vec<u8>) -> Result<(), SheetError>;
}

/// Size of the element the remote screen is rendered into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedSize {
    pub width: f64,
    pub height: f64,
}

// ── ViewerControl ────────────────────────────────────────────────

pub struct ViewerControl {
    channel: Option<Arc<dyn ControlChannel>>,
    screen: Option<ScreenSize>,
    rendered: Option<RenderedSize>,
}

impl ViewerControl {
    pub fn new() -> Self {
        Self {
            channel: None,
            screen: None,
            rendered: None,
        }
    }

    /// Install the control path. Events stay gated until the screen
    /// size is known too.
    pub fn attach(&mut self, channel: Arc<dyn ControlChannel>) {
        self.channel = Some(channel);
    }

    pub fn set_rendered_size(&mut self, width: f64, height: f64) {
        self.rendered = Some(RenderedSize { width, height });
    }

    /// Host dimensions learned out of band (relayed descriptor).
    pub fn announce(&mut self, size: ScreenSize) {
        debug!(?size, "host screen size known; events ready");
        self.screen = Some(size);
    }

    /// Message received on the control channel. Only a screen-size
    /// message opens the gate; anything else is ignored.
    pub fn on_channel_message(&mut self, bytes: &[u8]) {
        match serde_json::from_slice::<ScreenSize>(bytes) {
            Ok(size) if size.width > 0 && size.height > 0 => self.announce(size),
            _ => trace!("ignoring non screen-size channel message"),
        }
    }

    pub fn events_ready(&self) -> bool {
        self.channel.is_some() && self.screen.is_some()
    }

    pub fn screen_size(&self) -> Option<ScreenSize> {
        self.screen
    }

    /// Close the gate (disconnect).
    pub fn reset(&mut self) {
        self.channel = None;
        self.screen = None;
    }

    /// Map a local pointer position into host pixels.
    pub fn rescale(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let screen = self.screen?;
        let rendered = self.rendered?;
        if rendered.width <= 0.0 || rendered.height <= 0.0 {
            return None;
        }
        Some((
            x * screen.width as f64 / rendered.width,
            y * screen.height as f64 / rendered.height,
        ))
    }

    /// Send a pointer event given in local coordinates.
    pub fn pointer(
        &self,
        x: f64,
        y: f64,
        method: PointerMethod,
        button: Option<PointerButton>,
    ) -> bool {
        if !self.events_ready() {
            return false;
        }
        let Some((x, y)) = self.rescale(x, y) else {
            return false;
        };
        self.send(ControlMessage::Pointer(PointerEvent {
            x,
            y,
            method,
            button,
        }))
    }

    pub fn key(
        &self,
        code: &str,
        character: &str,
        virtual_key_code: u32,
        modifiers: Modifiers,
        method: KeyMethod,
    ) -> bool {
        self.send(ControlMessage::Key(KeyEvent {
            code: code.to_string(),
            character: character.to_string(),
            virtual_key_code,
            relying_modifier_active: !modifiers.is_empty(),
            method,
        }))
    }

    pub fn scroll(&self, delta_x: f64, delta_y: f64, delta_mode: u32) -> bool {
        self.send(ControlMessage::Scroll(ScrollEvent {
            delta_x,
            delta_y,
            delta_mode,
        }))
    }

    /// Serialize and send if the gate is open. Returns whether it was sent.
    pub fn send(&self, message: ControlMessage) -> bool {
        let (Some(channel), true) = (&self.channel, self.screen.is_some()) else {
            trace!("events not ready; dropping control message");
            return false;
        };
        let sent = message.to_json().and_then(|payload| channel.send(payload));
        if let Err(e) = &sent {
            debug!("control send failed: {e}");
        }
        sent.is_ok()
    }
}

impl Default for ViewerControl {
    fn default() -> Self {
        Self::new()
    }
}
