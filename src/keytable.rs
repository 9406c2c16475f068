//! `KeyCondition`, `Action`, and `KeyTable` (C4).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use log::warn;

use crate::expr;
use crate::keycode::{KeyCode, ModifierMask};

/// A single key state to match against: a virtual keycode, a modifier mask
/// compared via [`ModifierMask::mod_eq`], whether it is a down or up event,
/// and whether it was synthesized as a one-shot fire.
#[derive(Clone, Copy, Debug)]
pub struct KeyCondition {
    pub vk: KeyCode,
    pub modifier: ModifierMask,
    pub down: bool,
    pub oneshot: bool,
}

impl KeyCondition {
    pub fn new(vk: KeyCode, modifier: ModifierMask, down: bool, oneshot: bool) -> Self {
        KeyCondition { vk, modifier, down, oneshot }
    }

    /// Parses a canonical key-expression string (`"O-Ctrl-Alt-Q"`, `"D-A"`,
    /// `"Shift-F1"`, ...). See [`crate::expr`] for the grammar.
    pub fn from_str(s: &str, layout: crate::keycode::KeyboardLayout) -> crate::errors::Result<Self> {
        expr::parse(s, layout)
    }

    pub fn to_expr_string(&self, layout: crate::keycode::KeyboardLayout) -> String {
        expr::render(self, layout)
    }
}

/// Hash is based on `vk` alone: any two conditions considered equal by
/// [`PartialEq`] necessarily share a `vk`, so this upholds the
/// hash/equality contract while keeping equality's `mod_eq` non-bitwise.
impl Hash for KeyCondition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vk.hash(state);
    }
}

impl PartialEq for KeyCondition {
    fn eq(&self, other: &Self) -> bool {
        self.vk == other.vk
            && self.modifier.mod_eq(other.modifier)
            && self.down == other.down
            && self.oneshot == other.oneshot
    }
}

impl Eq for KeyCondition {}

/// What happens when a [`KeyCondition`] matches.
#[derive(Clone)]
pub enum Action {
    /// Run a registered closure.
    Call(Arc<dyn Fn() + Send + Sync>),
    /// Re-inject one or more key-expression strings through an
    /// [`crate::input_context::InputContext`].
    Sequence(Vec<String>),
    /// Enter a nested key table for a multi-stroke chord.
    Enter(KeyTable),
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Call(_) => write!(f, "Action::Call(..)"),
            Action::Sequence(v) => write!(f, "Action::Sequence({v:?})"),
            Action::Enter(t) => write!(f, "Action::Enter({} bindings)", t.len()),
        }
    }
}

/// An insertion-independent map from [`KeyCondition`] to [`Action`].
/// Lookup order within a table never matters: [`KeyCondition`] equality
/// already resolves which single binding a given live key event matches.
#[derive(Clone, Default, Debug)]
pub struct KeyTable {
    bindings: HashMap<KeyCondition, Action>,
}

impl KeyTable {
    pub fn new() -> Self {
        KeyTable { bindings: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Parses `key` as a key expression and inserts `action`. Logs and
    /// drops the binding (instead of returning an error) on an
    /// unparseable expression, matching `KeyTable.__setitem__`'s
    /// catch-and-log behaviour in the original implementation.
    pub fn set(&mut self, key: &str, action: Action, layout: crate::keycode::KeyboardLayout) {
        match KeyCondition::from_str(key, layout) {
            Ok(cond) => {
                self.bindings.insert(cond, action);
            }
            Err(e) => warn!("dropping binding for {key:?}: {e}"),
        }
    }

    pub fn get(&self, cond: &KeyCondition) -> Option<&Action> {
        self.bindings.get(cond)
    }

    pub fn remove(&mut self, key: &str, layout: crate::keycode::KeyboardLayout) {
        if let Ok(cond) = KeyCondition::from_str(key, layout) {
            self.bindings.remove(&cond);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyCondition, &Action)> {
        self.bindings.iter()
    }

    /// Merges `other`'s bindings into `self`, `other` winning on conflict.
    /// Used to build the unified key table from the ordered list of
    /// focus-scoped tables (later tables override earlier ones).
    pub fn merge_from(&mut self, other: &KeyTable) {
        for (cond, action) in other.iter() {
            self.bindings.insert(*cond, action.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycode::KeyboardLayout;

    #[test]
    fn set_and_get_round_trips() {
        let mut table = KeyTable::new();
        table.set("Ctrl-Q", Action::Sequence(vec!["Alt-F4".into()]), KeyboardLayout::Ansi);
        let cond = KeyCondition::from_str("Ctrl-Q", KeyboardLayout::Ansi).unwrap();
        assert!(table.get(&cond).is_some());
    }

    #[test]
    fn invalid_expression_is_dropped_not_panicked() {
        let mut table = KeyTable::new();
        table.set("NotAKey", Action::Sequence(vec![]), KeyboardLayout::Ansi);
        assert!(table.is_empty());
    }

    #[test]
    fn lookup_uses_mod_eq_not_bitwise_equality() {
        let mut table = KeyTable::new();
        table.set("Ctrl-Q", Action::Sequence(vec![]), KeyboardLayout::Ansi);
        // LControl physical key should still match a generic "Ctrl" binding.
        let cond = KeyCondition::new(
            crate::keycode::layout_vk(KeyboardLayout::Ansi, "Q").unwrap(),
            ModifierMask::CTRL_L,
            true,
            false,
        );
        assert!(table.get(&cond).is_some());
    }

    #[test]
    fn merge_from_lets_later_table_win() {
        let mut base = KeyTable::new();
        base.set("Ctrl-Q", Action::Sequence(vec!["one".into()]), KeyboardLayout::Ansi);
        let mut overlay = KeyTable::new();
        overlay.set("Ctrl-Q", Action::Sequence(vec!["two".into()]), KeyboardLayout::Ansi);
        base.merge_from(&overlay);
        let cond = KeyCondition::from_str("Ctrl-Q", KeyboardLayout::Ansi).unwrap();
        match base.get(&cond) {
            Some(Action::Sequence(v)) => assert_eq!(v[0], "two"),
            _ => panic!("expected overlay binding to win"),
        }
    }
}
