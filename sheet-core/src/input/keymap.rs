//! Browser `KeyboardEvent.code` → injector key name table.
//!
//! Codes the browser knows but the injector cannot press map to `None`
//! and are dropped, same as unknown codes.

/// Injector key name for a browser key code.
pub fn lookup(code: &str) -> Option<&'static str> {
    let name = match code {
        // letters
        "KeyA" => "A",
        "KeyB" => "B",
        "KeyC" => "C",
        "KeyD" => "D",
        "KeyE" => "E",
        "KeyF" => "F",
        "KeyG" => "G",
        "KeyH" => "H",
        "KeyI" => "I",
        "KeyJ" => "J",
        "KeyK" => "K",
        "KeyL" => "L",
        "KeyM" => "M",
        "KeyN" => "N",
        "KeyO" => "O",
        "KeyP" => "P",
        "KeyQ" => "Q",
        "KeyR" => "R",
        "KeyS" => "S",
        "KeyT" => "T",
        "KeyU" => "U",
        "KeyV" => "V",
        "KeyW" => "W",
        "KeyX" => "X",
        "KeyY" => "Y",
        "KeyZ" => "Z",

        // digit row
        "Digit0" => "Num0",
        "Digit1" => "Num1",
        "Digit2" => "Num2",
        "Digit3" => "Num3",
        "Digit4" => "Num4",
        "Digit5" => "Num5",
        "Digit6" => "Num6",
        "Digit7" => "Num7",
        "Digit8" => "Num8",
        "Digit9" => "Num9",

        // function keys
        "F1" => "F1",
        "F2" => "F2",
        "F3" => "F3",
        "F4" => "F4",
        "F5" => "F5",
        "F6" => "F6",
        "F7" => "F7",
        "F8" => "F8",
        "F9" => "F9",
        "F10" => "F10",
        "F11" => "F11",
        "F12" => "F12",
        "F13" => "F13",
        "F14" => "F14",
        "F15" => "F15",
        "F16" => "F16",
        "F17" => "F17",
        "F18" => "F18",
        "F19" => "F19",
        "F20" => "F20",
        "F21" => "F21",
        "F22" => "F22",
        "F23" => "F23",
        "F24" => "F24",

        "ArrowLeft" => "Left",
        "ArrowRight" => "Right",
        "ArrowUp" => "Up",
        "ArrowDown" => "Down",

        // modifiers
        "AltLeft" => "LeftAlt",
        "AltRight" => "RightAlt",
        "ControlLeft" => "LeftControl",
        "ControlRight" => "RightControl",
        "ShiftLeft" => "LeftShift",
        "ShiftRight" => "RightShift",
        "MetaLeft" => meta_key(Side::Left),
        "MetaRight" => meta_key(Side::Right),

        // editing / navigation
        "Space" => "Space",
        "Enter" => "Enter",
        "Backspace" => "Backspace",
        "Delete" => "Delete",
        "Tab" => "Tab",
        "Escape" => "Escape",
        "CapsLock" => "CapsLock",
        "NumLock" => "NumLock",
        "ScrollLock" => "ScrollLock",
        "Insert" => "Insert",
        "Home" => "Home",
        "End" => "End",
        "PageUp" => "PageUp",
        "PageDown" => "PageDown",
        "Pause" => "Pause",
        "PrintScreen" => "Print",

        // punctuation
        "Backquote" => "Grave",
        "Minus" => "Minus",
        "Equal" => "Equal",
        "BracketLeft" => "LeftBracket",
        "BracketRight" => "RightBracket",
        "Backslash" | "IntlBackslash" => "Backslash",
        "Semicolon" => "Semicolon",
        "Quote" => "Quote",
        "Comma" => "Comma",
        "Period" => "Period",
        "Slash" => "Slash",

        // numpad
        "Numpad0" => "NumPad0",
        "Numpad1" => "NumPad1",
        "Numpad2" => "NumPad2",
        "Numpad3" => "NumPad3",
        "Numpad4" => "NumPad4",
        "Numpad5" => "NumPad5",
        "Numpad6" => "NumPad6",
        "Numpad7" => "NumPad7",
        "Numpad8" => "NumPad8",
        "Numpad9" => "NumPad9",
        "NumpadAdd" => "Add",
        "NumpadSubtract" => "Subtract",
        "NumpadMultiply" => "Multiply",
        "NumpadDivide" => "Divide",
        "NumpadDecimal" => "Decimal",
        "NumpadEnter" => "Return",
        "NumpadEqual" => "Equal",
        "NumpadComma" => "Comma",

        // media
        "AudioVolumeUp" => "AudioVolUp",
        "AudioVolumeDown" => "AudioVolDown",
        "AudioVolumeMute" => "AudioMute",
        "MediaPlayPause" => "AudioPlay",
        "MediaStop" => "AudioStop",
        "MediaTrackNext" => "AudioNext",
        "MediaTrackPrevious" => "AudioPrev",

        "ContextMenu" => "Menu",

        // MediaSelect, IntlRo, IntlYen, Browser*, Launch*, Power, Sleep,
        // WakeUp, Eject, IME keys, Copy/Cut/Paste/Undo, Help: no equivalent
        _ => return None,
    };
    Some(name)
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

/// Meta key name on the platform the host runs on.
fn meta_key(side: Side) -> &'static str {
    match side {
        Side::Left if cfg!(target_os = "macos") => "LeftCmd",
        Side::Left if cfg!(target_os = "windows") => "LeftWin",
        Side::Left => "LeftSuper",
        Side::Right if cfg!(target_os = "macos") => "RightCmd",
        Side::Right if cfg!(target_os = "windows") => "RightWin",
        Side::Right => "RightSuper",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_codes_resolve() {
        assert_eq!(lookup("KeyA"), Some("A"));
        assert_eq!(lookup("Digit7"), Some("Num7"));
        assert_eq!(lookup("Enter"), Some("Enter"));
        assert_eq!(lookup("F24"), Some("F24"));
        assert_eq!(lookup("Backquote"), Some("Grave"));
        assert_eq!(lookup("NumpadEnter"), Some("Return"));
        assert_eq!(lookup("ContextMenu"), Some("Menu"));
    }

    #[test]
    fn unsupported_and_unknown_codes_miss() {
        assert_eq!(lookup("BrowserBack"), None);
        assert_eq!(lookup("Help"), None);
        assert_eq!(lookup("NotAKey"), None);
        assert_eq!(lookup(""), None);
    }

    #[test]
    fn meta_keys_use_a_platform_name() {
        let left = lookup("MetaLeft").unwrap();
        assert!(["LeftCmd", "LeftWin", "LeftSuper"].contains(&left));
        let right = lookup("MetaRight").unwrap();
        assert!(right.starts_with("Right"));
    }
}
