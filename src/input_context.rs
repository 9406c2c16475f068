//! `InputContext` (C5): a scoped builder that reconciles the modifiers a
//! caller wants held against the modifiers actually physically down, and
//! batches the resulting synthetic key events for a single flush.

use std::collections::HashMap;

use crate::errors::Result;
use crate::expr;
use crate::keycode::{KeyCode, KeyboardLayout, ModifierMask};
use crate::ports::HookPort;

/// A single queued synthetic key event.
#[derive(Clone, Copy, Debug)]
struct QueuedEvent {
    vk: KeyCode,
    down: bool,
}

/// Reconciles virtual (wanted) modifier state against the real (physical)
/// modifier state for the lifetime of the context, queues the key events
/// that implement that reconciliation plus any explicitly requested keys,
/// and sends everything — plus a final reconciliation back to the real
/// state — on [`InputContext::flush`].
pub struct InputContext<'a> {
    hook: &'a dyn HookPort,
    layout: KeyboardLayout,
    vk_mod_map: &'a HashMap<KeyCode, ModifierMask>,
    real_modifier: ModifierMask,
    virtual_modifier: ModifierMask,
    queue: Vec<QueuedEvent>,
    /// True when this context is re-emitting a recorded event during
    /// replay rather than reacting to a live one. User-modifier bits are
    /// skipped by [`InputContext::send_modifier_keys`] unless this is
    /// set: a live reconciliation has no physical key to press for them,
    /// but replay re-injects the vk directly and needs the bit included
    /// so the engine's own user-modifier mapping sees it.
    pub replay: bool,
}

impl<'a> InputContext<'a> {
    pub fn new(
        hook: &'a dyn HookPort,
        layout: KeyboardLayout,
        vk_mod_map: &'a HashMap<KeyCode, ModifierMask>,
        real_modifier: ModifierMask,
        replay: bool,
    ) -> Self {
        InputContext {
            hook,
            layout,
            vk_mod_map,
            real_modifier,
            virtual_modifier: real_modifier,
            queue: Vec::new(),
            replay,
        }
    }

    /// Queues whatever key-up/key-down events are needed so that exactly
    /// the modifier classes set in `wanted` are held, given the current
    /// virtual state. Two passes: press what's missing, then release
    /// what's extra. User-defined modifier bits have no physical key, so
    /// a live reconciliation skips them; `replay` re-injects the vk
    /// directly instead and must not skip them (see the field doc on
    /// [`InputContext::replay`]).
    fn send_modifier_keys(&mut self, wanted: ModifierMask) {
        for (&vk, &bit) in self.vk_mod_map.iter() {
            if !self.replay && bit.intersects(crate::keycode::USER_ALL) {
                continue;
            }
            if !self.virtual_modifier.intersects(bit) && wanted.intersects(bit) {
                self.queue.push(QueuedEvent { vk, down: true });
                self.virtual_modifier |= bit;
            }
        }
        for (&vk, &bit) in self.vk_mod_map.iter() {
            if !self.replay && bit.intersects(crate::keycode::USER_ALL) {
                continue;
            }
            if self.virtual_modifier.intersects(bit) && !wanted.intersects(bit) {
                self.queue.push(QueuedEvent { vk, down: false });
                self.virtual_modifier &= !bit;
            }
        }
    }

    /// Sends a single virtual keycode event directly, with no modifier
    /// reconciliation.
    pub fn send_key_by_vk(&mut self, vk: KeyCode, down: bool) {
        self.queue.push(QueuedEvent { vk, down });
    }

    /// Parses and sends a key expression such as `"Ctrl-Alt-Q"` or
    /// `"D-A"`/`"U-A"`. Unlike [`crate::keytable::KeyCondition::from_str`],
    /// a bare modifier name here resolves to its left-specific bit (see
    /// SPEC_FULL.md §2.1), matching `keyhac_input.py`'s `send_key`.
    pub fn send_key(&mut self, s: &str) -> Result<()> {
        let tokens: Vec<&str> = s.split('-').collect();
        let (vk_token, flag_tokens) = tokens
            .split_last()
            .filter(|(last, _)| !last.is_empty())
            .ok_or_else(|| crate::errors::Error::InvalidExpression(s.to_string()))?;

        let mut modifier = ModifierMask::empty();
        let mut up: Option<bool> = None;
        for tok in flag_tokens {
            if tok.is_empty() {
                continue;
            }
            match tok.to_ascii_uppercase().as_str() {
                "D" => up = Some(false),
                "U" => up = Some(true),
                _ => {
                    let m = expr::str_to_mod_force_lr(tok)
                        .ok_or_else(|| crate::errors::Error::UnknownKey(tok.to_string()))?;
                    modifier |= m;
                }
            }
        }
        let vk = expr::str_to_vk(vk_token, self.layout)
            .ok_or_else(|| crate::errors::Error::UnknownKey(vk_token.to_string()))?;

        self.send_modifier_keys(modifier);
        match up {
            Some(true) => self.send_key_by_vk(vk, false),
            Some(false) => self.send_key_by_vk(vk, true),
            None => {
                self.send_key_by_vk(vk, true);
                self.send_key_by_vk(vk, false);
            }
        }
        Ok(())
    }

    /// Reconciles the virtual modifier state back to the real physical
    /// state, then sends every queued event in order and clears the
    /// queue.
    pub fn flush(&mut self) -> Result<()> {
        self.send_modifier_keys(self.real_modifier);
        for event in self.queue.drain(..) {
            self.hook.send_keyboard_event(event.vk, event.down)?;
        }
        Ok(())
    }
}

impl Drop for InputContext<'_> {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            let _ = self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Mutex;

    struct RecordingHook {
        sent: Mutex<RefCell<Vec<(KeyCode, bool)>>>,
    }

    impl RecordingHook {
        fn new() -> Self {
            RecordingHook { sent: Mutex::new(RefCell::new(Vec::new())) }
        }
    }

    impl HookPort for RecordingHook {
        fn set_callback(&self, _callback: Box<dyn Fn(crate::ports::HookEvent) -> bool + Send + Sync>) {}
        fn send_keyboard_event(&self, vk: KeyCode, down: bool) -> Result<()> {
            self.sent.lock().unwrap().borrow_mut().push((vk, down));
            Ok(())
        }
        fn keyboard_layout(&self) -> KeyboardLayout {
            KeyboardLayout::Ansi
        }
    }

    fn vk_mod_map() -> HashMap<KeyCode, ModifierMask> {
        let mut m = HashMap::new();
        m.insert(0x3b, ModifierMask::CTRL_L);
        m.insert(0x3a, ModifierMask::ALT_L);
        m
    }

    #[test]
    fn send_key_presses_needed_modifier_and_releases_on_flush() {
        let hook = RecordingHook::new();
        let map = vk_mod_map();
        let mut ctx = InputContext::new(&hook, KeyboardLayout::Ansi, &map, ModifierMask::empty(), false);
        ctx.send_key("Ctrl-Q").unwrap();
        ctx.flush().unwrap();
        let sent = hook.sent.lock().unwrap().borrow().clone();
        // Ctrl down, Q down, Q up, Ctrl up (reconciled back to empty real state).
        assert_eq!(sent[0], (0x3b, true));
        assert_eq!(*sent.last().unwrap(), (0x3b, false));
    }

    #[test]
    fn user_modifiers_never_generate_events_outside_replay() {
        let hook = RecordingHook::new();
        let mut map = vk_mod_map();
        map.insert(0x01, ModifierMask::USER0);
        let mut ctx = InputContext::new(&hook, KeyboardLayout::Ansi, &map, ModifierMask::empty(), false);
        ctx.send_modifier_keys(ModifierMask::USER0);
        ctx.flush().unwrap();
        assert!(hook.sent.lock().unwrap().borrow().is_empty());
    }

    #[test]
    fn user_modifiers_do_generate_events_during_replay() {
        let hook = RecordingHook::new();
        let mut map = vk_mod_map();
        map.insert(0x01, ModifierMask::USER0);
        let mut ctx = InputContext::new(&hook, KeyboardLayout::Ansi, &map, ModifierMask::empty(), true);
        ctx.send_modifier_keys(ModifierMask::USER0);
        ctx.flush().unwrap();
        let sent = hook.sent.lock().unwrap().borrow().clone();
        assert!(sent.contains(&(0x01, true)));
    }
}
