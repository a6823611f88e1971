//! Input injector that records actions in the log instead of touching the
//! OS input stream.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use sheet_core::error::SheetError;
use sheet_core::input::{InputAction, InputInjector};

#[derive(Debug, Default)]
pub struct LoggingInjector {
    applied: AtomicU64,
}

impl LoggingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
}

impl InputInjector for LoggingInjector {
    fn apply(&self, action: &InputAction) -> Result<(), SheetError> {
        self.applied.fetch_add(1, Ordering::Relaxed);
        match action {
            // pointer motion is far too chatty for info
            InputAction::MovePointer { x, y } => debug!(x, y, "pointer move"),
            InputAction::Type(text) => info!(%text, "type"),
            other => info!(action = ?other, "input"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheet_core::input::PointerButton;

    #[test]
    fn counts_applied_actions() {
        let injector = LoggingInjector::new();
        injector.apply(&InputAction::MovePointer { x: 1, y: 2 }).unwrap();
        injector
            .apply(&InputAction::PressButton(PointerButton::Left))
            .unwrap();
        assert_eq!(injector.applied(), 2);
    }
}
