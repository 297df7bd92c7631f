//! Scan code table and key labels
//!
//! Scan codes follow the Linux evdev numbering, which is also what the
//! polling backend translates `device_query` key codes into, so both
//! keyboard backends produce the same identities for the same key.

use crate::pipeline::Identity;
use device_query::Keycode as DK;

/// (device_query key, evdev scan code, display name)
const KEYS: &[(DK, u16, &str)] = &[
    (DK::Escape, 1, "Escape"),
    (DK::Key1, 2, "1"),
    (DK::Key2, 3, "2"),
    (DK::Key3, 4, "3"),
    (DK::Key4, 5, "4"),
    (DK::Key5, 6, "5"),
    (DK::Key6, 7, "6"),
    (DK::Key7, 8, "7"),
    (DK::Key8, 9, "8"),
    (DK::Key9, 10, "9"),
    (DK::Key0, 11, "0"),
    (DK::Minus, 12, "Minus"),
    (DK::Equal, 13, "Equals"),
    (DK::Backspace, 14, "Backspace"),
    (DK::Tab, 15, "Tab"),
    (DK::Q, 16, "Q"),
    (DK::W, 17, "W"),
    (DK::E, 18, "E"),
    (DK::R, 19, "R"),
    (DK::T, 20, "T"),
    (DK::Y, 21, "Y"),
    (DK::U, 22, "U"),
    (DK::I, 23, "I"),
    (DK::O, 24, "O"),
    (DK::P, 25, "P"),
    (DK::LeftBracket, 26, "LeftBracket"),
    (DK::RightBracket, 27, "RightBracket"),
    (DK::Enter, 28, "Enter"),
    (DK::LControl, 29, "LeftCtrl"),
    (DK::A, 30, "A"),
    (DK::S, 31, "S"),
    (DK::D, 32, "D"),
    (DK::F, 33, "F"),
    (DK::G, 34, "G"),
    (DK::H, 35, "H"),
    (DK::J, 36, "J"),
    (DK::K, 37, "K"),
    (DK::L, 38, "L"),
    (DK::Semicolon, 39, "Semicolon"),
    (DK::Apostrophe, 40, "Apostrophe"),
    (DK::Grave, 41, "Grave"),
    (DK::LShift, 42, "LeftShift"),
    (DK::BackSlash, 43, "Backslash"),
    (DK::Z, 44, "Z"),
    (DK::X, 45, "X"),
    (DK::C, 46, "C"),
    (DK::V, 47, "V"),
    (DK::B, 48, "B"),
    (DK::N, 49, "N"),
    (DK::M, 50, "M"),
    (DK::Comma, 51, "Comma"),
    (DK::Dot, 52, "Period"),
    (DK::Slash, 53, "Slash"),
    (DK::RShift, 54, "RightShift"),
    (DK::NumpadMultiply, 55, "NumpadMultiply"),
    (DK::LAlt, 56, "LeftAlt"),
    (DK::Space, 57, "Space"),
    (DK::CapsLock, 58, "CapsLock"),
    (DK::F1, 59, "F1"),
    (DK::F2, 60, "F2"),
    (DK::F3, 61, "F3"),
    (DK::F4, 62, "F4"),
    (DK::F5, 63, "F5"),
    (DK::F6, 64, "F6"),
    (DK::F7, 65, "F7"),
    (DK::F8, 66, "F8"),
    (DK::F9, 67, "F9"),
    (DK::F10, 68, "F10"),
    (DK::Numpad7, 71, "Numpad7"),
    (DK::Numpad8, 72, "Numpad8"),
    (DK::Numpad9, 73, "Numpad9"),
    (DK::NumpadSubtract, 74, "NumpadSubtract"),
    (DK::Numpad4, 75, "Numpad4"),
    (DK::Numpad5, 76, "Numpad5"),
    (DK::Numpad6, 77, "Numpad6"),
    (DK::NumpadAdd, 78, "NumpadAdd"),
    (DK::Numpad1, 79, "Numpad1"),
    (DK::Numpad2, 80, "Numpad2"),
    (DK::Numpad3, 81, "Numpad3"),
    (DK::Numpad0, 82, "Numpad0"),
    (DK::F11, 87, "F11"),
    (DK::F12, 88, "F12"),
    (DK::RControl, 97, "RightCtrl"),
    (DK::NumpadDivide, 98, "NumpadDivide"),
    (DK::RAlt, 100, "RightAlt"),
    (DK::Home, 102, "Home"),
    (DK::Up, 103, "Up"),
    (DK::PageUp, 104, "PageUp"),
    (DK::Left, 105, "Left"),
    (DK::Right, 106, "Right"),
    (DK::End, 107, "End"),
    (DK::Down, 108, "Down"),
    (DK::PageDown, 109, "PageDown"),
    (DK::Insert, 110, "Insert"),
    (DK::Delete, 111, "Delete"),
    (DK::LMeta, 125, "LeftMeta"),
    (DK::RMeta, 126, "RightMeta"),
];

/// Evdev scan code for a `device_query` key, or `None` if it has no entry
pub fn scan_code_for(key: DK) -> Option<u16> {
    KEYS.iter()
        .find(|(dk, _, _)| *dk == key)
        .map(|(_, code, _)| *code)
}

/// Display name for a scan code
pub fn key_name(scan_code: u16) -> Option<&'static str> {
    KEYS.iter()
        .find(|(_, code, _)| *code == scan_code)
        .map(|(_, _, name)| *name)
}

/// Label resolver for the capture loop; pins have no label
pub fn label_for(identity: &Identity) -> Option<&'static str> {
    identity.scan_code().and_then(key_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::KeyId;

    #[test]
    fn maps_common_keys() {
        assert_eq!(scan_code_for(DK::A), Some(30));
        assert_eq!(scan_code_for(DK::Space), Some(57));
        assert_eq!(scan_code_for(DK::F12), Some(88));
    }

    #[test]
    fn names_round_trip_through_scan_codes() {
        for (dk, code, name) in KEYS {
            assert_eq!(scan_code_for(*dk), Some(*code));
            assert_eq!(key_name(*code), Some(*name));
        }
    }

    #[test]
    fn scan_codes_are_unique() {
        let mut codes: Vec<u16> = KEYS.iter().map(|(_, c, _)| *c).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), KEYS.len());
    }

    #[test]
    fn labels_resolve_for_key_identities_only() {
        assert_eq!(label_for(&Identity::Key(KeyId::new(30))), Some("A"));
        assert_eq!(label_for(&Identity::DeviceKey { device: 2, code: 28 }), Some("Enter"));
        assert_eq!(label_for(&Identity::Pin(30)), None);
        assert_eq!(label_for(&Identity::Key(KeyId::new(999))), None);
    }
}
