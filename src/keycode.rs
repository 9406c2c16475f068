//! Virtual keycodes and the three-zone modifier mask (C1).
//!
//! A [`ModifierMask`] packs eight modifier classes (Alt, Control, Shift,
//! Command, Win, Fn, and two user-defined slots) into three zones of a
//! `u32`: a "generic" zone (bits 0-7, side-independent), a "left" zone
//! (bits 8-15), and a "right" zone (bits 16-23). Comparison between masks
//! never uses bitwise equality; see [`ModifierMask::mod_eq`].

use std::fmt;

/// An opaque virtual keycode. Values and meaning are host/layout dependent.
pub type KeyCode = u16;

bitflags::bitflags! {
    /// A modifier bitmask split into generic / left / right zones.
    ///
    /// Bit layout per class (Alt, Ctrl, Shift, Cmd, Win, Fn, User0, User1):
    /// bit `n` generic, bit `n+8` left, bit `n+16` right.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct ModifierMask: u32 {
        const ALT    = 1 << 0;
        const CTRL   = 1 << 1;
        const SHIFT  = 1 << 2;
        const CMD    = 1 << 3;
        const WIN    = 1 << 4;
        const FN     = 1 << 5;
        const USER0  = 1 << 6;
        const USER1  = 1 << 7;

        const ALT_L   = 1 << 8;
        const CTRL_L  = 1 << 9;
        const SHIFT_L = 1 << 10;
        const CMD_L   = 1 << 11;
        const WIN_L   = 1 << 12;
        const FN_L    = 1 << 13;
        const USER0_L = 1 << 14;
        const USER1_L = 1 << 15;

        const ALT_R   = 1 << 16;
        const CTRL_R  = 1 << 17;
        const SHIFT_R = 1 << 18;
        const CMD_R   = 1 << 19;
        const WIN_R   = 1 << 20;
        const FN_R    = 1 << 21;
        const USER0_R = 1 << 22;
        const USER1_R = 1 << 23;
    }
}

const GENERIC_MASK: u32 = 0x0000_00ff;
const LEFT_MASK: u32 = 0x0000_ff00;
const RIGHT_MASK: u32 = 0x00ff_0000;
/// The two user-defined modifier classes, generic+left+right, used to
/// exclude "user modifiers" from the reserved set when dispatching actions.
pub const USER_ALL: ModifierMask = ModifierMask::from_bits_truncate(
    ModifierMask::USER0.bits()
        | ModifierMask::USER1.bits()
        | ModifierMask::USER0_L.bits()
        | ModifierMask::USER1_L.bits()
        | ModifierMask::USER0_R.bits()
        | ModifierMask::USER1_R.bits(),
);

impl ModifierMask {
    /// Splits into (generic, left, right) zone values, each right-shifted
    /// into the low 8 bits.
    fn zones(self) -> (u32, u32, u32) {
        let bits = self.bits();
        (
            bits & GENERIC_MASK,
            (bits & LEFT_MASK) >> 8,
            (bits & RIGHT_MASK) >> 16,
        )
    }

    /// True if every modifier class set in `self` is also set in `other`,
    /// treating a generic bit as subsuming either side's bit and vice
    /// versa. This is a one-directional subset check; [`mod_eq`] applies it
    /// both ways.
    ///
    /// [`mod_eq`]: ModifierMask::mod_eq
    fn subsumed_by(self, other: Self) -> bool {
        let (g1, l1, r1) = self.zones();
        let (g2, l2, r2) = other.zones();
        let other_union = g2 | l2 | r2;
        g1 & !other_union == 0 && l1 & !(g2 | l2) == 0 && r1 & !(g2 | r2) == 0
    }

    /// The equivalence relation used everywhere modifier masks are
    /// compared: reflexive, symmetric, and treats a generic modifier bit as
    /// equal to either of its side-specific bits.
    pub fn mod_eq(self, other: Self) -> bool {
        self.subsumed_by(other) && other.subsumed_by(self)
    }
}

impl fmt::Display for ModifierMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08x}", self.bits())
    }
}

/// Which physical keyboard layout a host reports, used to pick the
/// name ⟷ virtual-keycode tables for layout-dependent keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyboardLayout {
    Ansi,
    Jis,
    Iso,
}

/// Looks up the canonical name for a layout-independent key (arrows,
/// function keys, whitespace/editing keys, modifiers). Returns `None` if
/// `vk` is not one of these; the caller should then consult a
/// layout-specific table.
pub fn literal_name(vk: KeyCode) -> Option<&'static str> {
    LITERAL_TABLE.iter().find(|(code, _)| *code == vk).map(|(_, name)| *name)
}

/// Reverse of [`literal_name`].
pub fn literal_vk(name: &str) -> Option<KeyCode> {
    LITERAL_TABLE
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(code, _)| *code)
}

/// Looks up the canonical name for a layout-dependent key under the given
/// layout (letters, digits, punctuation whose position varies by layout).
pub fn layout_name(layout: KeyboardLayout, vk: KeyCode) -> Option<&'static str> {
    table_for(layout).iter().find(|(code, _)| *code == vk).map(|(_, name)| *name)
}

/// Reverse of [`layout_name`].
pub fn layout_vk(layout: KeyboardLayout, name: &str) -> Option<KeyCode> {
    table_for(layout)
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(code, _)| *code)
}

fn table_for(layout: KeyboardLayout) -> &'static [(KeyCode, &'static str)] {
    match layout {
        KeyboardLayout::Ansi | KeyboardLayout::Iso => ANSI_TABLE,
        KeyboardLayout::Jis => JIS_TABLE,
    }
}

/// Layout-independent keys: editing/whitespace keys, function keys, arrows,
/// numpad, and the eight physical modifier keys. Mirrors
/// `keyhac_key.py`'s `vk_str_table_common`.
#[rustfmt::skip]
static LITERAL_TABLE: &[(KeyCode, &str)] = &[
    (0x24, "Return"), (0x30, "Tab"), (0x31, "Space"), (0x33, "Back"),
    (0x35, "Escape"), (0x39, "CapsLock"), (0x3f, "Fn"), (0x6e, "Menu"),
    (0x72, "Help"), (0x75, "Delete"), (0x73, "Home"), (0x77, "End"),
    (0x79, "PageDown"), (0x74, "PageUp"),
    (0x7b, "Left"), (0x7c, "Right"), (0x7d, "Down"), (0x7e, "Up"),
    (0x38, "LShift"), (0x3c, "RShift"),
    (0x3b, "LControl"), (0x3e, "RControl"),
    (0x3a, "LAlt"), (0x3d, "RAlt"),
    (0x37, "LCommand"), (0x36, "RCommand"),
    (0x7a, "F1"), (0x78, "F2"), (0x63, "F3"), (0x76, "F4"),
    (0x60, "F5"), (0x61, "F6"), (0x62, "F7"), (0x64, "F8"),
    (0x65, "F9"), (0x6d, "F10"), (0x67, "F11"), (0x6f, "F12"),
    (0x69, "F13"), (0x6b, "F14"), (0x71, "F15"), (0x6a, "F16"),
    (0x40, "F17"), (0x4f, "F18"), (0x50, "F19"), (0x5a, "F20"),
    (0x52, "Numpad0"), (0x53, "Numpad1"), (0x54, "Numpad2"), (0x55, "Numpad3"),
    (0x56, "Numpad4"), (0x57, "Numpad5"), (0x58, "Numpad6"), (0x59, "Numpad7"),
    (0x5b, "Numpad8"), (0x5c, "Numpad9"),
    (0x45, "NumpadAdd"), (0x4e, "NumpadSubtract"), (0x43, "NumpadMultiply"),
    (0x4b, "NumpadDivide"), (0x41, "NumpadDecimal"), (0x4c, "NumpadEnter"),
    (0x47, "NumpadClear"), (0x51, "NumpadEquals"),
];

/// ANSI-layout letter/digit/punctuation table. Mirrors
/// `keyhac_key.py`'s `vk_str_table_ansi`.
#[rustfmt::skip]
static ANSI_TABLE: &[(KeyCode, &str)] = &[
    (0x00, "A"), (0x0b, "B"), (0x08, "C"), (0x02, "D"), (0x0e, "E"),
    (0x03, "F"), (0x05, "G"), (0x04, "H"), (0x22, "I"), (0x26, "J"),
    (0x28, "K"), (0x25, "L"), (0x2e, "M"), (0x2d, "N"), (0x1f, "O"),
    (0x23, "P"), (0x0c, "Q"), (0x0f, "R"), (0x01, "S"), (0x11, "T"),
    (0x20, "U"), (0x09, "V"), (0x0d, "W"), (0x07, "X"), (0x10, "Y"),
    (0x06, "Z"),
    (0x1d, "0"), (0x12, "1"), (0x13, "2"), (0x14, "3"), (0x15, "4"),
    (0x17, "5"), (0x16, "6"), (0x1a, "7"), (0x1c, "8"), (0x19, "9"),
    (0x1b, "Minus"), (0x18, "Equal"),
    (0x29, "Semicolon"), (0x27, "Quote"), (0x2b, "Comma"), (0x2f, "Period"),
    (0x2c, "Slash"), (0x32, "BackQuote"),
    (0x21, "OpenBracket"), (0x1e, "CloseBracket"), (0x2a, "BackSlash"),
];

/// JIS-layout table. Mirrors `keyhac_key.py`'s `vk_str_table_jis`.
#[rustfmt::skip]
static JIS_TABLE: &[(KeyCode, &str)] = &[
    (0x00, "A"), (0x0b, "B"), (0x08, "C"), (0x02, "D"), (0x0e, "E"),
    (0x03, "F"), (0x05, "G"), (0x04, "H"), (0x22, "I"), (0x26, "J"),
    (0x28, "K"), (0x25, "L"), (0x2e, "M"), (0x2d, "N"), (0x1f, "O"),
    (0x23, "P"), (0x0c, "Q"), (0x0f, "R"), (0x01, "S"), (0x11, "T"),
    (0x20, "U"), (0x09, "V"), (0x0d, "W"), (0x07, "X"), (0x10, "Y"),
    (0x06, "Z"),
    (0x1d, "0"), (0x12, "1"), (0x13, "2"), (0x14, "3"), (0x15, "4"),
    (0x17, "5"), (0x16, "6"), (0x1a, "7"), (0x1c, "8"), (0x19, "9"),
    (0x1b, "Minus"), (0x18, "Caret"),
    (0x29, "Colon"), (0x21, "Atmark"), (0x2b, "Comma"), (0x2f, "Period"),
    (0x2c, "Slash"), (0x5d, "Yen"),
    (0x1e, "OpenBracket"), (0x2a, "CloseBracket"),
    (0x66, "Eisu"), (0x68, "Kana"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_eq_generic_subsumes_side() {
        assert!(ModifierMask::ALT.mod_eq(ModifierMask::ALT_L));
        assert!(ModifierMask::ALT.mod_eq(ModifierMask::ALT_R));
        assert!(ModifierMask::ALT_L.mod_eq(ModifierMask::ALT));
    }

    #[test]
    fn mod_eq_is_reflexive_and_symmetric() {
        let m = ModifierMask::CTRL_L | ModifierMask::SHIFT;
        assert!(m.mod_eq(m));
        let other = ModifierMask::SHIFT_L | ModifierMask::CTRL_L;
        assert_eq!(m.mod_eq(other), other.mod_eq(m));
    }

    #[test]
    fn mod_eq_distinguishes_opposite_sides() {
        assert!(!ModifierMask::ALT_L.mod_eq(ModifierMask::ALT_R));
    }

    #[test]
    fn literal_roundtrip() {
        assert_eq!(literal_name(0x24), Some("Return"));
        assert_eq!(literal_vk("return"), Some(0x24));
    }

    #[test]
    fn ansi_roundtrip() {
        assert_eq!(layout_name(KeyboardLayout::Ansi, 0x00), Some("A"));
        assert_eq!(layout_vk(KeyboardLayout::Ansi, "a"), Some(0x00));
    }
}
