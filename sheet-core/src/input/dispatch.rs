//! Host-side replay of viewer control messages.
//!
//! The actual OS injection is a collaborator ([`InputInjector`]); the
//! dispatcher resolves each message into actions, applies the
//! remote-control toggle, and swallows injector failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::error::SheetError;
use crate::input::control::{ControlMessage, InputAction};
use crate::session::SessionId;

/// Injects resolved actions into the host's input stream.
pub trait InputInjector: Send + Sync {
    fn apply(&self, action: &InputAction) -> Result<(), SheetError>;
}

// ── InputDispatcher ──────────────────────────────────────────────

pub struct InputDispatcher {
    injector: Arc<dyn InputInjector>,
    enabled: AtomicBool,
    applied: AtomicU64,
    failed: AtomicU64,
}

impl InputDispatcher {
    pub fn new(injector: Arc<dyn InputInjector>, remote_control: bool) -> Self {
        Self {
            injector,
            enabled: AtomicBool::new(remote_control),
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Toggle whether viewers may control the host.
    pub fn set_remote_control(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        debug!(enabled, "remote control toggled");
    }

    pub fn remote_control(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Actions applied successfully so far.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Best-effort replay of one message. Never fails.
    pub fn dispatch(&self, session: &SessionId, message: &ControlMessage) {
        if !self.remote_control() {
            trace!(%session, "remote control disabled; dropping control message");
            return;
        }
        for action in message.actions() {
            match self.injector.apply(&action) {
                Ok(()) => {
                    self.applied.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    debug!(%session, ?action, "input injection failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::control::{KeyEvent, KeyMethod, PointerButton, PointerEvent, PointerMethod};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        actions: Mutex<Vec<InputAction>>,
        fail_buttons: bool,
    }

    impl InputInjector for Recorder {
        fn apply(&self, action: &InputAction) -> Result<(), SheetError> {
            if self.fail_buttons && matches!(action, InputAction::PressButton(_)) {
                return Err(SheetError::Other("no pointer device".into()));
            }
            self.actions.lock().push(action.clone());
            Ok(())
        }
    }

    fn click() -> ControlMessage {
        ControlMessage::Pointer(PointerEvent {
            x: 5.0,
            y: 6.0,
            method: PointerMethod::Down,
            button: Some(PointerButton::Left),
        })
    }

    #[test]
    fn dispatch_applies_actions_in_order() {
        let rec = Arc::new(Recorder::default());
        let d = InputDispatcher::new(rec.clone(), true);
        d.dispatch(&SessionId::from("S1"), &click());
        assert_eq!(
            *rec.actions.lock(),
            vec![
                InputAction::MovePointer { x: 5, y: 6 },
                InputAction::PressButton(PointerButton::Left)
            ]
        );
        assert_eq!(d.applied(), 2);
    }

    #[test]
    fn disabled_remote_control_drops_everything() {
        let rec = Arc::new(Recorder::default());
        let d = InputDispatcher::new(rec.clone(), false);
        d.dispatch(&SessionId::from("S1"), &click());
        assert!(rec.actions.lock().is_empty());

        d.set_remote_control(true);
        d.dispatch(
            &SessionId::from("S1"),
            &ControlMessage::Key(KeyEvent {
                code: "KeyQ".into(),
                character: "q".into(),
                virtual_key_code: 81,
                relying_modifier_active: false,
                method: KeyMethod::Down,
            }),
        );
        assert_eq!(*rec.actions.lock(), vec![InputAction::Type("q".into())]);
    }

    #[test]
    fn injector_failures_are_swallowed() {
        let rec = Arc::new(Recorder {
            fail_buttons: true,
            ..Default::default()
        });
        let d = InputDispatcher::new(rec.clone(), true);
        d.dispatch(&SessionId::from("S1"), &click());
        assert_eq!(d.failed(), 1);
        assert_eq!(d.applied(), 1);
    }
}
