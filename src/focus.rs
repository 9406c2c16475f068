//! Focus scoping (C3): building a `/Role(Title)/.../Role(Title)` path from
//! the focused UI element chain, and matching it against a glob pattern
//! plus an optional custom predicate.

use std::sync::Arc;

use glob::Pattern;
use log::warn;

use crate::ports::UIElementHandle;

/// Characters that would otherwise be ambiguous inside a focus path are
/// replaced before the path is assembled. Mirrors
/// `keyhac_focus.py`'s `special_chars_trans_table`.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => '<',
            ')' => '>',
            '/' => '-',
            '*' => '-',
            '?' => '-',
            '[' => '<',
            ']' => '>',
            ':' => '-',
            '\n' => ' ',
            '\t' => ' ',
            other => other,
        })
        .collect()
}

/// Walks `elm`'s `AXParent` chain to the root and builds the focus path,
/// root-first, as `/Role(Title)/Role(Title)/...`.
pub fn focus_path(elm: &dyn UIElementHandle) -> String {
    let mut chain: Vec<(String, String)> = Vec::new();
    let mut current: Option<Box<dyn UIElementHandle>> = Some(elm.clone_handle());
    while let Some(e) = current {
        let role = e.role().unwrap_or_default();
        let title = e.title().unwrap_or_default();
        chain.push((sanitize(&role), sanitize(&title)));
        current = e.parent();
    }
    chain.reverse();
    let mut path = String::new();
    for (role, title) in chain {
        path.push('/');
        path.push_str(&role);
        path.push('(');
        path.push_str(&title);
        path.push(')');
    }
    path
}

/// A predicate over the focus path string and, optionally, the focused
/// element itself. Boxed so that `FocusCondition` stays `Clone`-free and
/// trivially comparable by pointer identity when needed.
pub type CustomPredicate = Arc<dyn Fn(&dyn UIElementHandle) -> bool + Send + Sync>;

/// Scopes a [`crate::keytable::KeyTable`] to a set of focused windows: a
/// glob pattern over the focus path, an optional custom predicate, or
/// both (both must pass).
#[derive(Clone, Default)]
pub struct FocusCondition {
    pattern: Option<Pattern>,
    predicate: Option<CustomPredicate>,
}

impl FocusCondition {
    pub fn new(pattern: Option<&str>, predicate: Option<CustomPredicate>) -> Self {
        let pattern = pattern.and_then(|p| match Pattern::new(p) {
            Ok(pat) => Some(pat),
            Err(e) => {
                warn!("invalid focus pattern {p:?}: {e}");
                None
            }
        });
        FocusCondition { pattern, predicate }
    }

    pub fn is_unconditional(&self) -> bool {
        self.pattern.is_none() && self.predicate.is_none()
    }

    /// True if `focus_path` matches the glob pattern (when one is set)
    /// and the custom predicate (when one is set) accepts `elm`.
    pub fn check(&self, focus_path: Option<&str>, elm: Option<&dyn UIElementHandle>) -> bool {
        if let Some(pattern) = &self.pattern {
            match focus_path {
                Some(path) if pattern.matches(path) => {}
                _ => return false,
            }
        }
        if let Some(predicate) = &self.predicate {
            match elm {
                Some(elm) => {
                    if !predicate(elm) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_chars() {
        assert_eq!(sanitize("a/b(c)[d]:e*f?g\n\t"), "a-b<c><d>-e-f-g  ");
    }

    #[test]
    fn unconditional_when_empty() {
        let c = FocusCondition::new(None, None);
        assert!(c.is_unconditional());
        assert!(c.check(None, None));
    }

    #[test]
    fn pattern_must_match_full_path() {
        let c = FocusCondition::new(Some("/AXApplication(Terminal)/*"), None);
        assert!(c.check(Some("/AXApplication(Terminal)/AXWindow(main)"), None));
        assert!(!c.check(Some("/AXApplication(Safari)/AXWindow(main)"), None));
    }

    #[test]
    fn missing_path_fails_a_set_pattern() {
        let c = FocusCondition::new(Some("/*"), None);
        assert!(!c.check(None, None));
    }
}
