//! Control messages sent by viewers and their resolution into injector
//! actions.
//!
//! Wire format is JSON, tagged by `type`:
//!
//! ```json
//! {"type":"pointer","x":10,"y":20,"method":"down","button":"left"}
//! {"type":"key","code":"KeyA","character":"a","virtualKeyCode":65,"relyingModifierActive":false,"method":"down"}
//! {"type":"scroll","deltaX":0,"deltaY":-120,"deltaMode":0}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SheetError;
use crate::input::keymap;

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerMethod {
    #[serde(alias = "mousemove")]
    Move,
    #[serde(alias = "mousedown")]
    Down,
    #[serde(alias = "mouseup")]
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMethod {
    #[serde(alias = "keydown")]
    Down,
    #[serde(alias = "keyup")]
    Up,
}

/// Pointer position in host screen pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerEvent {
    pub x: f64,
    pub y: f64,
    pub method: PointerMethod,
    #[serde(default)]
    pub button: Option<PointerButton>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    /// Physical key code, e.g. `KeyA`, `Enter`.
    pub code: String,
    /// Produced character or key name, e.g. `a`, `Enter`.
    pub character: String,
    #[serde(default)]
    pub virtual_key_code: u32,
    /// Alt, ctrl, meta or shift was held.
    #[serde(default)]
    pub relying_modifier_active: bool,
    pub method: KeyMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollEvent {
    pub delta_x: f64,
    pub delta_y: f64,
    /// 0 = pixels, 1 = lines, 2 = pages.
    #[serde(default)]
    pub delta_mode: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Pointer(PointerEvent),
    Key(KeyEvent),
    Scroll(ScrollEvent),
}

impl ControlMessage {
    /// Parse an inbound payload.
    pub fn parse(bytes: &[u8]) -> Result<Self, SheetError> {
        let msg: Self = serde_json::from_slice(bytes)?;
        msg.validate()?;
        Ok(msg)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, SheetError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> Result<(), SheetError> {
        match self {
            Self::Pointer(p) if !(p.x.is_finite() && p.y.is_finite()) => {
                Err(SheetError::Protocol("pointer coordinates must be finite".into()))
            }
            Self::Key(k) if k.code.is_empty() && k.character.is_empty() => {
                Err(SheetError::Protocol("key event without code or character".into()))
            }
            Self::Scroll(s) if !(s.delta_x.is_finite() && s.delta_y.is_finite()) => {
                Err(SheetError::Protocol("scroll deltas must be finite".into()))
            }
            _ => Ok(()),
        }
    }

    /// Injector actions for this message, in execution order.
    pub fn actions(&self) -> Vec<InputAction> {
        match self {
            Self::Pointer(p) => pointer_actions(p),
            Self::Key(k) => key_actions(k).into_iter().collect(),
            Self::Scroll(s) => vec![InputAction::Scroll {
                delta_x: s.delta_x,
                delta_y: s.delta_y,
                delta_mode: s.delta_mode,
            }],
        }
    }
}

// ── InputAction ──────────────────────────────────────────────────

/// A resolved, injector-level input operation.
#[derive(Debug, Clone, PartialEq)]
pub enum InputAction {
    MovePointer { x: i32, y: i32 },
    PressButton(PointerButton),
    ReleaseButton(PointerButton),
    /// Type literal text.
    Type(String),
    PressKey(&'static str),
    ReleaseKey(&'static str),
    Scroll {
        delta_x: f64,
        delta_y: f64,
        delta_mode: u32,
    },
}

fn pointer_actions(p: &PointerEvent) -> Vec<InputAction> {
    let mut actions = vec![InputAction::MovePointer {
        x: p.x.round() as i32,
        y: p.y.round() as i32,
    }];
    match (p.method, p.button) {
        (PointerMethod::Down, Some(b)) => actions.push(InputAction::PressButton(b)),
        (PointerMethod::Up, Some(b)) => actions.push(InputAction::ReleaseButton(b)),
        _ => {}
    }
    actions
}

/// A single character typed without any modifier held.
fn is_typed(k: &KeyEvent) -> bool {
    k.character.chars().count() == 1 && !k.relying_modifier_active
}

fn key_actions(k: &KeyEvent) -> Option<InputAction> {
    match k.method {
        KeyMethod::Down if is_typed(k) => Some(InputAction::Type(k.character.clone())),
        KeyMethod::Down => keymap::lookup(&k.code).map(InputAction::PressKey),
        // typed on key-down already
        KeyMethod::Up if is_typed(k) => None,
        KeyMethod::Up => keymap::lookup(&k.code).map(InputAction::ReleaseKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: &str, character: &str, modifier: bool, method: KeyMethod) -> ControlMessage {
        ControlMessage::Key(KeyEvent {
            code: code.into(),
            character: character.into(),
            virtual_key_code: 0,
            relying_modifier_active: modifier,
            method,
        })
    }

    #[test]
    fn plain_character_is_typed() {
        assert_eq!(
            key("KeyA", "a", false, KeyMethod::Down).actions(),
            vec![InputAction::Type("a".into())]
        );
        assert!(key("KeyA", "a", false, KeyMethod::Up).actions().is_empty());
    }

    #[test]
    fn character_with_modifier_is_a_named_key() {
        assert_eq!(
            key("KeyA", "a", true, KeyMethod::Down).actions(),
            vec![InputAction::PressKey("A")]
        );
        assert_eq!(
            key("KeyA", "a", true, KeyMethod::Up).actions(),
            vec![InputAction::ReleaseKey("A")]
        );
    }

    #[test]
    fn multi_char_key_names_always_use_the_table() {
        for modifier in [false, true] {
            assert_eq!(
                key("Enter", "Enter", modifier, KeyMethod::Down).actions(),
                vec![InputAction::PressKey("Enter")]
            );
            assert_eq!(
                key("Enter", "Enter", modifier, KeyMethod::Up).actions(),
                vec![InputAction::ReleaseKey("Enter")]
            );
        }
    }

    #[test]
    fn table_misses_are_dropped() {
        assert!(key("BrowserBack", "BrowserBack", false, KeyMethod::Down).actions().is_empty());
        assert!(key("Unknown", "Dead", false, KeyMethod::Down).actions().is_empty());
    }

    #[test]
    fn non_ascii_single_character_is_typed() {
        assert_eq!(
            key("KeyE", "é", false, KeyMethod::Down).actions(),
            vec![InputAction::Type("é".into())]
        );
    }

    #[test]
    fn pointer_moves_before_button() {
        let msg = ControlMessage::parse(
            br#"{"type":"pointer","x":10.4,"y":20.6,"method":"mousedown","button":"right"}"#,
        )
        .unwrap();
        assert_eq!(
            msg.actions(),
            vec![
                InputAction::MovePointer { x: 10, y: 21 },
                InputAction::PressButton(PointerButton::Right)
            ]
        );

        let up = ControlMessage::parse(br#"{"type":"pointer","x":1,"y":2,"method":"up"}"#).unwrap();
        assert_eq!(up.actions(), vec![InputAction::MovePointer { x: 1, y: 2 }]);
    }

    #[test]
    fn key_json_uses_camel_case_fields() {
        let msg = ControlMessage::parse(
            br#"{"type":"key","code":"KeyC","character":"c","virtualKeyCode":67,"relyingModifierActive":true,"method":"keydown"}"#,
        )
        .unwrap();
        assert_eq!(msg.actions(), vec![InputAction::PressKey("C")]);
        let json = String::from_utf8(msg.to_json().unwrap()).unwrap();
        assert!(json.contains("\"relyingModifierActive\":true"));
        assert!(json.contains("\"type\":\"key\""));
    }

    #[test]
    fn scroll_parses() {
        let msg =
            ControlMessage::parse(br#"{"type":"scroll","deltaX":0,"deltaY":-120}"#).unwrap();
        assert_eq!(
            msg.actions(),
            vec![InputAction::Scroll {
                delta_x: 0.0,
                delta_y: -120.0,
                delta_mode: 0
            }]
        );
    }

    #[test]
    fn malformed_payloads_are_protocol_errors() {
        let cases: [&[u8]; 4] = [
            b"not json",
            br#"{"type":"teleport"}"#,
            br#"{"type":"pointer","x":1}"#,
            br#"{"type":"key","code":"","character":"","method":"down"}"#,
        ];
        for raw in cases {
            let err = ControlMessage::parse(raw).unwrap_err();
            assert!(matches!(err, SheetError::Protocol(_)), "{raw:?}");
        }
    }
}
