//! Key-expression grammar (C2): parses strings like `"O-Ctrl-Alt-Q"` or
//! `"D-(36)"` into a [`KeyCondition`], and renders one back to its
//! canonical string form.
//!
//! A key expression is a `-`-separated list of tokens. All tokens but the
//! last are either a leading-flag token (`O` one-shot, `D` explicit
//! key-down, `U` key-up) or a modifier name; the last token names the key
//! itself, either by its layout name or, for keys with no name, the
//! escape form `(123)` giving its raw virtual keycode.
//!
//! A bare modifier name here (`"Ctrl"`) resolves to the **generic** bit.
//! [`crate::input_context::InputContext::send_key`] and
//! [`force_lr_mod`] instead force left-specific bits; see SPEC_FULL.md §2.1.

use crate::errors::{Error, Result};
use crate::keycode::{self, KeyCode, KeyboardLayout, ModifierMask};
use crate::keytable::KeyCondition;

const MODIFIER_NAMES: &[(&str, ModifierMask)] = &[
    ("ALT", ModifierMask::ALT),
    ("CTRL", ModifierMask::CTRL),
    ("CONTROL", ModifierMask::CTRL),
    ("SHIFT", ModifierMask::SHIFT),
    ("CMD", ModifierMask::CMD),
    ("COMMAND", ModifierMask::CMD),
    ("WIN", ModifierMask::WIN),
    ("FN", ModifierMask::FN),
    ("USER0", ModifierMask::USER0),
    ("USER1", ModifierMask::USER1),
    ("LALT", ModifierMask::ALT_L),
    ("RALT", ModifierMask::ALT_R),
    ("LCTRL", ModifierMask::CTRL_L),
    ("RCTRL", ModifierMask::CTRL_R),
    ("LCONTROL", ModifierMask::CTRL_L),
    ("RCONTROL", ModifierMask::CTRL_R),
    ("LSHIFT", ModifierMask::SHIFT_L),
    ("RSHIFT", ModifierMask::SHIFT_R),
    ("LCMD", ModifierMask::CMD_L),
    ("RCMD", ModifierMask::CMD_R),
    ("LCOMMAND", ModifierMask::CMD_L),
    ("RCOMMAND", ModifierMask::CMD_R),
    ("LWIN", ModifierMask::WIN_L),
    ("RWIN", ModifierMask::WIN_R),
    ("LFN", ModifierMask::FN_L),
    ("RFN", ModifierMask::FN_R),
    ("LUSER0", ModifierMask::USER0_L),
    ("RUSER0", ModifierMask::USER0_R),
    ("LUSER1", ModifierMask::USER1_L),
    ("RUSER1", ModifierMask::USER1_R),
];

/// Resolves a modifier-name token to a mask. A bare name resolves to the
/// generic bit for that class.
pub fn str_to_mod(token: &str) -> Option<ModifierMask> {
    MODIFIER_NAMES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(token))
        .map(|(_, mask)| *mask)
}

/// Like [`str_to_mod`], but a bare (non-`L`/`R`-prefixed) name resolves to
/// its **left**-specific bit rather than the generic bit. Used by
/// `InputContext::send_key` and `Engine::define_modifier`.
pub fn str_to_mod_force_lr(token: &str) -> Option<ModifierMask> {
    let mask = str_to_mod(token)?;
    let generic_only = mask.bits() & 0x0000_00ff;
    if generic_only != 0 && mask.bits() == generic_only {
        Some(ModifierMask::from_bits_truncate(generic_only << 8))
    } else {
        Some(mask)
    }
}

/// Resolves a key-name token (layout-dependent or literal) to a virtual
/// keycode, also accepting the `(N)` raw-keycode escape.
pub fn str_to_vk(token: &str, layout: KeyboardLayout) -> Option<KeyCode> {
    if let Some(inner) = token.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        return inner.parse::<KeyCode>().ok();
    }
    keycode::layout_vk(layout, token).or_else(|| keycode::literal_vk(token))
}

/// Reverse of [`str_to_vk`]: falls back to the `(N)` escape for unnamed
/// keycodes.
pub fn vk_to_str(vk: KeyCode, layout: KeyboardLayout) -> String {
    keycode::layout_name(layout, vk)
        .or_else(|| keycode::literal_name(vk))
        .map(str::to_string)
        .unwrap_or_else(|| format!("({vk})"))
}

pub fn parse(s: &str, layout: KeyboardLayout) -> Result<KeyCondition> {
    let tokens: Vec<&str> = s.split('-').collect();
    let (vk_token, flag_tokens) = match tokens.split_last() {
        Some((last, rest)) if !last.is_empty() => (*last, rest),
        _ => return Err(Error::InvalidExpression(s.to_string())),
    };

    let mut modifier = ModifierMask::empty();
    let mut down = true;
    let mut oneshot = false;

    for tok in flag_tokens {
        if tok.is_empty() {
            continue;
        }
        match tok.to_ascii_uppercase().as_str() {
            "O" => oneshot = true,
            "D" => down = true,
            "U" => down = false,
            _ => {
                let m = str_to_mod(tok).ok_or_else(|| Error::UnknownKey(tok.to_string()))?;
                modifier |= m;
            }
        }
    }

    let vk = str_to_vk(vk_token, layout).ok_or_else(|| Error::UnknownKey(vk_token.to_string()))?;
    Ok(KeyCondition::new(vk, modifier, down, oneshot))
}

/// Renders a [`KeyCondition`] back to its canonical string: an `O-`/`U-`
/// prefix when non-default, then one token per set modifier class
/// (generic preferred over left/right when both happen to be set), then
/// the key name.
pub fn render(cond: &KeyCondition, layout: KeyboardLayout) -> String {
    let mut parts = Vec::new();
    if cond.oneshot {
        parts.push("O".to_string());
    }
    if !cond.down {
        parts.push("U".to_string());
    }

    for (name, mask) in MODIFIER_NAMES {
        // Only emit each class once, preferring the generic form.
        if !name.starts_with('L') && !name.starts_with('R') && cond.modifier.intersects(*mask) {
            parts.push((*name).to_string());
        }
    }

    parts.push(vk_to_str(cond.vk, layout));
    parts.join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_modifier_is_generic() {
        let cond = parse("Ctrl-Q", KeyboardLayout::Ansi).unwrap();
        assert!(cond.modifier.mod_eq(ModifierMask::CTRL));
        assert!(cond.down);
        assert!(!cond.oneshot);
    }

    #[test]
    fn parse_oneshot_and_up_flags() {
        let cond = parse("O-U-Shift", KeyboardLayout::Ansi).unwrap();
        assert!(cond.oneshot);
        assert!(!cond.down);
    }

    #[test]
    fn parse_literal_escape() {
        let cond = parse("(999)", KeyboardLayout::Ansi).unwrap();
        assert_eq!(cond.vk, 999);
    }

    #[test]
    fn parse_unknown_key_errors() {
        assert!(parse("Ctrl-Nonexistent", KeyboardLayout::Ansi).is_err());
    }

    #[test]
    fn force_lr_turns_bare_name_into_left_bit() {
        let mask = str_to_mod_force_lr("Alt").unwrap();
        assert_eq!(mask, ModifierMask::ALT_L);
    }

    #[test]
    fn vk_round_trip_through_render() {
        let cond = parse("Ctrl-Q", KeyboardLayout::Ansi).unwrap();
        let rendered = render(&cond, KeyboardLayout::Ansi);
        assert!(rendered.to_uppercase().contains("CTRL"));
        assert!(rendered.to_uppercase().ends_with('Q'));
    }
}
