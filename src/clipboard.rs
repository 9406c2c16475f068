//! Clipboard history (C9): an LRU set of captured clipboard contents with
//! JSON persistence across restarts.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ITEMS: usize = 1000;
const DEFAULT_MAX_DATA_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_PERSIST_DATA_SIZE: usize = 64 * 1024;
const DEFAULT_MAX_LABEL_LENGTH: usize = 200;

#[derive(Clone, Debug)]
pub struct ClipboardEntry {
    pub data: String,
    pub label: String,
}

fn make_label(data: &str, max_len: usize) -> String {
    let collapsed: String = data.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max_len {
        let truncated: String = collapsed.chars().take(max_len).collect();
        format!("{truncated}...")
    } else {
        collapsed
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedItem {
    #[serde(rename = "type")]
    kind: String,
    data: String,
}

#[derive(Serialize, Deserialize)]
struct PersistedFile {
    clipboard_history: Vec<PersistedItem>,
}

/// A most-recently-captured-first list of clipboard contents, capped at
/// `max_items` entries. Re-capturing the same content moves it back to
/// the front instead of duplicating it.
pub struct ClipboardHistory {
    items: VecDeque<ClipboardEntry>,
    max_items: usize,
    max_data_size: usize,
    max_persist_data_size: usize,
    max_label_length: usize,
    persist_path: Option<PathBuf>,
}

impl ClipboardHistory {
    pub fn new(persist_path: Option<PathBuf>) -> Self {
        let mut history = ClipboardHistory {
            items: VecDeque::new(),
            max_items: DEFAULT_MAX_ITEMS,
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            max_persist_data_size: DEFAULT_MAX_PERSIST_DATA_SIZE,
            max_label_length: DEFAULT_MAX_LABEL_LENGTH,
            persist_path,
        };
        history.load();
        history
    }

    /// Captures a new clipboard value. Oversized content (beyond
    /// `max_data_size`) is dropped outright rather than stored.
    pub fn capture(&mut self, data: &str) {
        if data.is_empty() {
            return;
        }
        if data.len() > self.max_data_size {
            warn!("clipboard item of {} bytes exceeds max_data_size, dropping", data.len());
            return;
        }
        self.items.retain(|entry| entry.data != data);
        let label = make_label(data, self.max_label_length);
        self.items.push_front(ClipboardEntry { data: data.to_string(), label });
        while self.items.len() > self.max_items {
            self.items.pop_back();
        }
        self.persist();
    }

    /// Newest-first iteration over the current history.
    pub fn items(&self) -> impl Iterator<Item = &ClipboardEntry> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn persist(&self) {
        let Some(path) = &self.persist_path else { return };
        let persisted: Vec<PersistedItem> = self
            .items
            .iter()
            .filter(|entry| entry.data.len() <= self.max_persist_data_size)
            .map(|entry| PersistedItem { kind: "string".to_string(), data: entry.data.clone() })
            .collect();
        let file = PersistedFile { clipboard_history: persisted };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Some(parent) = path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if let Err(e) = fs::write(path, json) {
                    warn!("failed to persist clipboard history to {}: {e}", path.display());
                }
            }
            Err(e) => warn!("failed to serialize clipboard history: {e}"),
        }
    }

    fn load(&mut self) {
        let Some(path) = self.persist_path.clone() else { return };
        if !path.exists() {
            return;
        }
        match load_from(&path) {
            Ok(items) => {
                info!("clipboard: loaded {} items from {}", items.len(), path.display());
                self.items = items;
            }
            Err(e) => warn!("failed to load clipboard history from {}: {e}", path.display()),
        }
    }
}

fn load_from(path: &Path) -> crate::errors::Result<VecDeque<ClipboardEntry>> {
    let contents = fs::read_to_string(path)?;
    let file: PersistedFile = serde_json::from_str(&contents)?;
    Ok(file
        .clipboard_history
        .into_iter()
        .map(|item| {
            let label = make_label(&item.data, DEFAULT_MAX_LABEL_LENGTH);
            ClipboardEntry { data: item.data, label }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_dedupes_and_moves_to_front() {
        let mut history = ClipboardHistory::new(None);
        history.capture("foo");
        history.capture("bar");
        history.capture("foo");
        let items: Vec<&str> = history.items().map(|e| e.data.as_str()).collect();
        assert_eq!(items, vec!["foo", "bar"]);
    }

    #[test]
    fn label_collapses_whitespace() {
        assert_eq!(make_label("a\n\tb   c", 200), "a b c");
    }

    #[test]
    fn oversized_item_is_dropped() {
        let mut history = ClipboardHistory::new(None);
        history.max_data_size = 4;
        history.capture("toolong");
        assert!(history.is_empty());
    }

    #[test]
    fn eviction_respects_max_items() {
        let mut history = ClipboardHistory::new(None);
        history.max_items = 2;
        history.capture("a");
        history.capture("b");
        history.capture("c");
        let items: Vec<&str> = history.items().map(|e| e.data.as_str()).collect();
        assert_eq!(items, vec!["c", "b"]);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clipboard.json");
        {
            let mut history = ClipboardHistory::new(Some(path.clone()));
            history.capture("hello");
            history.capture("world");
        }
        let reloaded = ClipboardHistory::new(Some(path));
        let items: Vec<&str> = reloaded.items().map(|e| e.data.as_str()).collect();
        assert_eq!(items, vec!["world", "hello"]);
    }
}
