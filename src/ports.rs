//! Host ports (C10): the trait boundary between the platform-independent
//! engine and the concrete macOS backend in [`crate::ports::macos`].

use crate::errors::Result;
use crate::keycode::{KeyCode, KeyboardLayout};

/// A key-down, key-up, or hook-restored notification from the host's
/// keyboard hook.
#[derive(Clone, Copy, Debug)]
pub enum HookEvent {
    KeyDown(KeyCode),
    KeyUp(KeyCode),
    /// The hook was disabled by the OS (commonly because the callback took
    /// too long) and has just been re-enabled.
    HookRestored,
}

/// The keyboard hook: delivers key events and accepts synthetic ones.
///
/// `acquire_lock`/`release_lock` let a host serialize its own native
/// callback dispatch; the engine does not rely on them for its own
/// state protection (it uses an internal `Mutex`, see DESIGN.md).
pub trait HookPort: Send + Sync {
    /// Registers the callback invoked for every [`HookEvent`]. For
    /// `KeyDown`/`KeyUp`, the callback's return value tells the hook
    /// whether to swallow the event (`true`) or let it pass through to
    /// every other application (`false`); the return value is ignored for
    /// `HookRestored`.
    fn set_callback(&self, callback: Box<dyn Fn(HookEvent) -> bool + Send + Sync>);
    fn send_keyboard_event(&self, vk: KeyCode, down: bool) -> Result<()>;
    fn keyboard_layout(&self) -> KeyboardLayout;
    fn acquire_lock(&self) {}
    fn release_lock(&self) {}
}

/// An opaque accessibility element. Implementations wrap a platform
/// handle (e.g. an `AXUIElementRef`).
pub trait UIElementHandle: Send {
    fn role(&self) -> Option<String>;
    fn title(&self) -> Option<String>;
    fn parent(&self) -> Option<Box<dyn UIElementHandle>>;
    fn clone_handle(&self) -> Box<dyn UIElementHandle>;
}

/// Access to the focused application/window chain.
pub trait UIElementPort: Send + Sync {
    fn focused_element(&self) -> Option<Box<dyn UIElementHandle>>;
}

/// A single clipboard capture.
#[derive(Clone, Debug)]
pub struct ClipboardItem {
    pub data: String,
}

/// The system clipboard: reading the current contents and registering a
/// change-notification callback.
pub trait ClipboardPort: Send + Sync {
    fn current(&self) -> Option<ClipboardItem>;
    fn set_callback(&self, callback: Box<dyn Fn() + Send + Sync>);
}

/// Severity passed to [`ConsolePort::write`], matching the levels the
/// original implementation's console window colorized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleLevel {
    Info,
    Warning,
    Error,
}

/// A log/console surface and a small set of named status fields (e.g. the
/// current focus path). keytap ships no GUI console; the default
/// implementation forwards to the `log` crate.
pub trait ConsolePort: Send + Sync {
    fn write(&self, message: &str, level: ConsoleLevel);
    fn set_text(&self, field: &str, text: &str);
}

/// A single selectable entry offered to [`ChooserPort::choose`].
pub struct ChooserItem {
    pub label: String,
    pub value: String,
}

/// A list-picker UI. keytap ships no GUI chooser; actions that need one
/// must supply their own [`ChooserPort`] implementation.
pub trait ChooserPort: Send + Sync {
    fn choose(&self, items: &[ChooserItem]) -> Option<String>;
}

/// Loads a declarative rule set into an [`crate::engine::Engine`]. The
/// engine owns no config format of its own; a `ConfigPort` is the thing
/// that turns a file (or any other source) into calls against the
/// engine's `reset_defaults`/`define_modifier`/`replace_key`/
/// `register_keytable` API.
pub trait ConfigPort: Send + Sync {
    /// (Re-)applies this config's rules to `engine`. A failed reload must
    /// leave `engine`'s prior state untouched — callers achieve that by
    /// validating the whole rule set before calling `reset_defaults`.
    fn apply(&self, engine: &std::sync::Arc<crate::engine::Engine>) -> Result<()>;
}

pub mod macos;
