//! `TomlConfig` (C10 `ConfigPort`): loads a declarative TOML rule file and
//! applies it to an [`Engine`] via `reset_defaults`/`define_modifier`/
//! `replace_key`/`register_keytable`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde::Deserialize;

use crate::engine::Engine;
use crate::errors::{Error, Result};
use crate::expr;
use crate::keytable::{Action, KeyTable};
use crate::ports::ConfigPort;

/// Copied to the default path the first time keytap runs without a
/// config file of its own, mirroring the teacher's copy-default-if-missing
/// startup behaviour.
const DEFAULT_CONFIG: &str = include_str!("../assets/default_config.toml");

#[derive(Deserialize, Default, Clone)]
struct RawFile {
    #[serde(default)]
    options: RawOptions,
    #[serde(default)]
    replace: Vec<RawReplace>,
    #[serde(default)]
    modifiers: Vec<RawModifier>,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Deserialize, Default, Clone)]
struct RawOptions {
    #[serde(default)]
    passthru_by_send: bool,
}

#[derive(Deserialize, Clone)]
struct RawReplace {
    from: String,
    to: String,
}

#[derive(Deserialize, Clone)]
struct RawModifier {
    key: String,
    modifier: String,
}

#[derive(Deserialize, Clone)]
struct RawRule {
    /// A glob over the focus path (see `focus.rs`). Absent means the
    /// rule's bindings apply regardless of what's focused.
    #[serde(default)]
    focus: Option<String>,
    #[serde(default)]
    bindings: HashMap<String, RawAction>,
}

/// Either a flat key sequence (`["Ctrl-Alt-Q"]`) re-injected on match, or
/// a nested chord table keyed by the next keystroke, for multi-stroke
/// bindings like `"Ctrl-X" -> { "Ctrl-S" = [...] }`.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
enum RawAction {
    Sequence(Vec<String>),
    Chord(HashMap<String, RawAction>),
}

fn build_action(raw: &RawAction, layout: crate::keycode::KeyboardLayout) -> Action {
    match raw {
        RawAction::Sequence(keys) => Action::Sequence(keys.clone()),
        RawAction::Chord(map) => {
            let mut table = KeyTable::new();
            for (key, action) in map {
                table.set(key, build_action(action, layout), layout);
            }
            Action::Enter(table)
        }
    }
}

/// The `ConfigPort` implementation keytap ships. Holds the last
/// successfully parsed rule set behind a `Mutex` so a failed reload can
/// leave it untouched ([`TomlConfig::reload`]).
pub struct TomlConfig {
    path: PathBuf,
    raw: Mutex<RawFile>,
}

impl TomlConfig {
    /// The default config path, `~/.config/keytap/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let home = std::env::home_dir()
            .ok_or_else(|| Error::NotFound("cannot find home directory".to_string()))?;
        Ok(home.join(".config").join("keytap").join("config.toml"))
    }

    /// Loads the config at `path`, writing the bundled default file first
    /// if nothing exists there yet. A file that exists but fails to parse
    /// does not fail the load: it is logged and treated as an empty rule
    /// set, so `apply` leaves the engine unconfigured rather than this
    /// function propagating an error that would abort startup. Only an
    /// I/O failure around the default-file bootstrap itself is fatal.
    pub fn load(path: PathBuf) -> Result<Self> {
        if !path.is_file() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, DEFAULT_CONFIG)?;
            info!("wrote default config to `{}`", path.display());
        }
        let raw = Self::parse_file(&path).unwrap_or_else(|e| {
            warn!("{}: {e}, starting with an empty configuration", path.display());
            RawFile::default()
        });
        Ok(TomlConfig { path, raw: Mutex::new(raw) })
    }

    fn parse_file(path: &Path) -> Result<RawFile> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(Error::from)
    }

    /// Re-reads the file on disk and, only if it parses successfully,
    /// replaces the stored rule set. A parse failure leaves the
    /// previously loaded rules in place and returns the error to the
    /// caller.
    pub fn reload(&self) -> Result<()> {
        let fresh = Self::parse_file(&self.path)?;
        *self.raw.lock().unwrap() = fresh;
        Ok(())
    }
}

impl ConfigPort for TomlConfig {
    fn apply(&self, engine: &Arc<Engine>) -> Result<()> {
        let layout = engine.layout();
        let raw = self.raw.lock().unwrap().clone();

        // Resolve every modifier/replace/table entry against the current
        // layout before touching the engine at all, so a single bad entry
        // (an unknown key name, an unparseable focus glob) can't leave a
        // previously-working engine half reconfigured.
        let mut modifiers = Vec::with_capacity(raw.modifiers.len());
        for modifier in &raw.modifiers {
            let vk = expr::str_to_vk(&modifier.key, layout)
                .ok_or_else(|| Error::UnknownKey(modifier.key.clone()))?;
            let mask = expr::str_to_mod_force_lr(&modifier.modifier)
                .ok_or_else(|| Error::UnknownKey(modifier.modifier.clone()))?;
            modifiers.push((vk, mask));
        }

        let mut replacements = Vec::with_capacity(raw.replace.len());
        for replace in &raw.replace {
            let src = expr::str_to_vk(&replace.from, layout)
                .ok_or_else(|| Error::UnknownKey(replace.from.clone()))?;
            let dst = expr::str_to_vk(&replace.to, layout)
                .ok_or_else(|| Error::UnknownKey(replace.to.clone()))?;
            replacements.push((src, dst));
        }

        let mut tables = Vec::with_capacity(raw.rules.len());
        for rule in &raw.rules {
            let focus = engine.focus_condition(rule.focus.as_deref(), None);
            let mut table = KeyTable::new();
            for (key, action) in &rule.bindings {
                table.set(key, build_action(action, layout), layout);
            }
            tables.push((focus, table));
        }

        engine.reset_defaults();
        engine.set_passthru_by_send(raw.options.passthru_by_send);
        for (vk, mask) in modifiers {
            engine.define_modifier_vk(vk, mask);
        }
        for (src, dst) in replacements {
            engine.replace_key_vk(src, dst);
        }
        for (focus, table) in tables {
            engine.register_keytable(focus, table);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bundled_default_config() {
        let raw: RawFile = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert!(!raw.rules.is_empty() || !raw.replace.is_empty());
    }

    #[test]
    fn sequence_and_chord_both_parse() {
        let toml = r#"
            [[rules]]
            focus = "/AXApplication(Terminal)/*"
            [rules.bindings]
            "Ctrl-Q" = ["Alt-F4"]

            [rules.bindings."Ctrl-X"]
            "Ctrl-S" = ["Cmd-S"]
        "#;
        let raw: RawFile = toml::from_str(toml).unwrap();
        assert_eq!(raw.rules.len(), 1);
        match raw.rules[0].bindings.get("Ctrl-Q") {
            Some(RawAction::Sequence(keys)) => assert_eq!(keys[0], "Alt-F4"),
            _ => panic!("expected a sequence action"),
        }
        match raw.rules[0].bindings.get("Ctrl-X") {
            Some(RawAction::Chord(map)) => assert!(map.contains_key("Ctrl-S")),
            _ => panic!("expected a chord action"),
        }
    }

    #[test]
    fn reload_keeps_prior_rules_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[[replace]]\nfrom = \"CapsLock\"\nto = \"Escape\"\n").unwrap();
        let config = TomlConfig::load(path.clone()).unwrap();
        assert_eq!(config.raw.lock().unwrap().replace.len(), 1);

        fs::write(&path, "not valid toml [[[").unwrap();
        assert!(config.reload().is_err());
        assert_eq!(config.raw.lock().unwrap().replace.len(), 1);
    }
}
