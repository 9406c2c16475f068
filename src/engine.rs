//! The keymap engine (C6): the central state machine that turns key-down
//! and key-up notifications from a [`HookPort`] into either pass-through,
//! a configured [`Action`], or entry into a multi-stroke chord.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;

use crate::clipboard::ClipboardHistory;
use crate::errors::Result;
use crate::expr;
use crate::focus::{CustomPredicate, FocusCondition, focus_path};
use crate::input_context::InputContext;
use crate::keycode::{self, KeyCode, KeyboardLayout, ModifierMask};
use crate::keytable::{Action, KeyCondition, KeyTable};
use crate::ports::{ClipboardPort, ConsolePort, HookEvent, HookPort, UIElementHandle, UIElementPort};
use crate::replay::ReplayBuffer;
use crate::worker::ActionRunner;

struct EngineInner {
    keytables: Vec<(FocusCondition, KeyTable)>,
    multi_stroke: Option<KeyTable>,
    unified: KeyTable,
    vk_mod: HashMap<KeyCode, ModifierMask>,
    vk_vk: HashMap<KeyCode, KeyCode>,
    focus_path: Option<String>,
    focus_elm: Option<Box<dyn UIElementHandle>>,
    modifier: ModifierMask,
    /// The most recent key-down's resolved vk and whether it was consumed,
    /// used both to detect a one-shot (down+up with nothing in between)
    /// and to make sure a swallowed key-down's matching key-up is always
    /// swallowed too, even when no explicit up-binding exists for it.
    last_keydown: Option<(KeyCode, bool)>,
    replay: ReplayBuffer,
    layout: KeyboardLayout,
}

impl EngineInner {
    fn fresh(layout: KeyboardLayout) -> Self {
        EngineInner {
            keytables: Vec::new(),
            multi_stroke: None,
            unified: KeyTable::new(),
            vk_mod: HashMap::new(),
            vk_vk: HashMap::new(),
            focus_path: None,
            focus_elm: None,
            modifier: ModifierMask::empty(),
            last_keydown: None,
            replay: ReplayBuffer::new(),
            layout,
        }
    }
}

/// The engine. Cheap to clone (it's an `Arc`-friendly facade); all
/// mutable state lives behind a single internal `Mutex`, which user
/// action closures must never re-enter directly — only through an
/// [`InputContext`] handed to them. See DESIGN.md for why a recursive
/// lock was rejected in favor of this restriction.
pub struct Engine {
    hook: Arc<dyn HookPort>,
    ui: Arc<dyn UIElementPort>,
    console: Arc<dyn ConsolePort>,
    pub clipboard: Mutex<ClipboardHistory>,
    pub worker: ActionRunner,
    inner: Mutex<EngineInner>,
    passthru_by_send: AtomicBool,
}

impl Engine {
    pub fn new(
        hook: Arc<dyn HookPort>,
        ui: Arc<dyn UIElementPort>,
        clipboard_hook: Arc<dyn ClipboardPort>,
        console: Arc<dyn ConsolePort>,
        clipboard_persist_path: Option<PathBuf>,
    ) -> Arc<Self> {
        let layout = hook.keyboard_layout();
        let engine = Arc::new(Engine {
            hook,
            ui,
            console,
            clipboard: Mutex::new(ClipboardHistory::new(clipboard_persist_path)),
            worker: ActionRunner::new(),
            inner: Mutex::new(EngineInner::fresh(layout)),
            passthru_by_send: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&engine);
        engine.hook.clone().set_callback(Box::new(move |event| {
            let Some(engine) = weak.upgrade() else { return false };
            match event {
                HookEvent::KeyDown(vk) => engine.on_key_down(vk),
                HookEvent::KeyUp(vk) => engine.on_key_up(vk),
                HookEvent::HookRestored => {
                    engine.on_hook_restored();
                    false
                }
            }
        }));

        let clip_engine = Arc::downgrade(&engine);
        let clip_port = Arc::clone(&clipboard_hook);
        clipboard_hook.set_callback(Box::new(move || {
            if let Some(engine) = clip_engine.upgrade() {
                if let Some(item) = clip_port.current() {
                    engine.clipboard.lock().unwrap().capture(&item.data);
                }
            }
        }));

        engine
    }

    /// Whether an unresolved key (neither a configured binding nor a
    /// replaced key) is re-sent through the hook instead of passed
    /// through untouched. Defaults to `false`.
    pub fn set_passthru_by_send(&self, value: bool) {
        self.passthru_by_send.store(value, Ordering::SeqCst);
    }

    /// The keyboard layout detected from the host hook at construction
    /// time. Config loaders need this to resolve key-expression strings
    /// to virtual keycodes before building a [`KeyTable`].
    pub fn layout(&self) -> KeyboardLayout {
        self.inner.lock().unwrap().layout
    }

    /// Resets all engine state and re-registers the eight physical
    /// modifier keys as their left-specific bits (`Fn` has no separate
    /// right-side physical key), matching `Keymap.configure`. Should be
    /// called once before the caller's own rule-registration runs.
    pub fn reset_defaults(&self) {
        let layout = self.layout();
        *self.inner.lock().unwrap() = EngineInner::fresh(layout);
        for (key, modname) in [
            ("LShift", "LShift"),
            ("RShift", "RShift"),
            ("LControl", "LCtrl"),
            ("RControl", "RCtrl"),
            ("LAlt", "LAlt"),
            ("RAlt", "RAlt"),
            ("LCommand", "LCmd"),
            ("RCommand", "RCmd"),
            ("Fn", "LFn"),
        ] {
            if let Err(e) = self.define_modifier(key, modname) {
                warn!("failed to register default modifier {key}: {e}");
            }
        }
    }

    pub fn define_modifier(&self, key: &str, modifier_name: &str) -> Result<()> {
        let layout = self.layout();
        let vk = expr::str_to_vk(key, layout)
            .ok_or_else(|| crate::errors::Error::UnknownKey(key.to_string()))?;
        let mask = expr::str_to_mod_force_lr(modifier_name)
            .ok_or_else(|| crate::errors::Error::UnknownKey(modifier_name.to_string()))?;
        self.define_modifier_vk(vk, mask);
        Ok(())
    }

    /// Like [`Engine::define_modifier`], but takes an already-resolved
    /// keycode and mask. Infallible: useful for a config loader that has
    /// already validated every entry up front and wants to commit them
    /// without a parse step that could fail partway through.
    pub fn define_modifier_vk(&self, vk: KeyCode, mask: ModifierMask) {
        self.inner.lock().unwrap().vk_mod.insert(vk, mask);
    }

    pub fn replace_key(&self, src: &str, dst: &str) -> Result<()> {
        let layout = self.layout();
        let src_vk = expr::str_to_vk(src, layout)
            .ok_or_else(|| crate::errors::Error::UnknownKey(src.to_string()))?;
        let dst_vk = expr::str_to_vk(dst, layout)
            .ok_or_else(|| crate::errors::Error::UnknownKey(dst.to_string()))?;
        self.replace_key_vk(src_vk, dst_vk);
        Ok(())
    }

    /// Like [`Engine::replace_key`], but takes already-resolved keycodes.
    pub fn replace_key_vk(&self, src: KeyCode, dst: KeyCode) {
        self.inner.lock().unwrap().vk_vk.insert(src, dst);
    }

    /// Registers a focus-scoped key table. Pass an unconditional
    /// [`FocusCondition`] (`FocusCondition::new(None, None)`) for
    /// bindings that should always apply.
    pub fn register_keytable(&self, focus: FocusCondition, table: KeyTable) {
        let mut inner = self.inner.lock().unwrap();
        inner.keytables.push((focus, table));
        update_unified(&mut inner);
    }

    pub fn focus_condition(&self, pattern: Option<&str>, predicate: Option<CustomPredicate>) -> FocusCondition {
        FocusCondition::new(pattern, predicate)
    }

    fn refresh_focus(&self, inner: &mut EngineInner) {
        let elm = self.ui.focused_element();
        let path = elm.as_deref().map(focus_path);
        if path != inner.focus_path {
            if let Some(path) = &path {
                self.console.set_text("focusPath", path);
            }
            inner.focus_path = path;
            inner.focus_elm = elm;
            update_unified(inner);
        } else {
            inner.focus_elm = elm;
        }
    }

    fn set_last_key_text(&self, cond: &KeyCondition, layout: KeyboardLayout) {
        self.console.set_text("lastKey", &cond.to_expr_string(layout));
    }

    /// Dispatches `cond` against the unified key table. Leaves an active
    /// multi-stroke chord first if `cond` is an ordinary (non-modifier,
    /// non-oneshot) key-down, per `_do_configured_key_action`'s ordering.
    /// Returns whether the event was consumed.
    fn dispatch(self: &Arc<Self>, inner: &mut EngineInner, cond: KeyCondition) -> bool {
        let mut left_multi_stroke = false;
        if inner.multi_stroke.is_some()
            && cond.down
            && !cond.oneshot
            && !inner.vk_mod.contains_key(&cond.vk)
        {
            inner.multi_stroke = None;
            update_unified(inner);
            left_multi_stroke = true;
        }

        let Some(action) = inner.unified.get(&cond).cloned() else {
            return left_multi_stroke;
        };

        match action {
            Action::Call(f) => {
                // Runs synchronously, with the engine lock held, matching
                // `ThreadedAction.starting()`'s guarantee. An action that
                // wants work off this thread submits to `self.worker`
                // itself and returns promptly.
                f();
                true
            }
            Action::Enter(table) => {
                inner.multi_stroke = Some(table);
                update_unified(inner);
                true
            }
            Action::Sequence(items) => {
                let mut ctx = InputContext::new(
                    self.hook.as_ref(),
                    inner.layout,
                    &inner.vk_mod,
                    inner.modifier,
                    false,
                );
                for item in &items {
                    if let Err(e) = ctx.send_key(item) {
                        warn!("sequence action step {item:?} failed: {e}");
                    }
                }
                let _ = ctx.flush();
                true
            }
        }
    }

    fn send_single(&self, inner: &EngineInner, vk: KeyCode, down: bool) {
        let mut ctx =
            InputContext::new(self.hook.as_ref(), inner.layout, &inner.vk_mod, inner.modifier, false);
        ctx.send_key_by_vk(vk, down);
        let _ = ctx.flush();
    }

    /// Handles a key-down notification from the hook. Returns `true` if
    /// the event was consumed (should not reach any other application).
    pub fn on_key_down(self: &Arc<Self>, vk: KeyCode) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.refresh_focus(&mut inner);
        inner.replay.record(vk, true);

        let resolved = inner.vk_vk.get(&vk).copied().unwrap_or(vk);
        let replaced = inner.vk_vk.contains_key(&vk);

        let old_modifier = inner.modifier;
        if let Some(&bit) = inner.vk_mod.get(&resolved) {
            inner.modifier |= bit;
            if bit.intersects(keycode::USER_ALL) {
                let cond = KeyCondition::new(resolved, old_modifier, true, false);
                self.set_last_key_text(&cond, inner.layout);
                self.dispatch(&mut inner, cond);
                inner.last_keydown = Some((resolved, true));
                return true;
            }
        }

        let cond = KeyCondition::new(resolved, old_modifier, true, false);
        self.set_last_key_text(&cond, inner.layout);
        let consumed = if self.dispatch(&mut inner, cond) {
            true
        } else if replaced || self.passthru_by_send.load(Ordering::SeqCst) {
            self.send_single(&inner, resolved, true);
            true
        } else {
            false
        };
        inner.last_keydown = Some((resolved, consumed));
        consumed
    }

    /// Handles a key-up notification. The one-shot fire — synthesizing
    /// and dispatching a `down, oneshot` condition for a key that went
    /// down and up with no other key in between — always happens last,
    /// after the ordinary up-handling below has fully resolved,
    /// regardless of whether that handling consumed the event.
    pub fn on_key_up(self: &Arc<Self>, vk: KeyCode) -> bool {
        let mut inner = self.inner.lock().unwrap();
        self.refresh_focus(&mut inner);
        inner.replay.record(vk, false);

        let resolved = inner.vk_vk.get(&vk).copied().unwrap_or(vk);
        let replaced = inner.vk_vk.contains_key(&vk);
        let (oneshot, down_consumed) = match inner.last_keydown {
            Some((k, consumed)) if k == resolved => (true, consumed),
            _ => (false, false),
        };
        inner.last_keydown = None;

        let handled = {
            if let Some(&bit) = inner.vk_mod.get(&resolved) {
                inner.modifier &= !bit;
                if bit.intersects(keycode::USER_ALL) {
                    let cond = KeyCondition::new(resolved, inner.modifier, false, false);
                    self.dispatch(&mut inner, cond);
                    true
                } else {
                    self.dispatch_up(&mut inner, resolved, replaced) || down_consumed
                }
            } else {
                self.dispatch_up(&mut inner, resolved, replaced) || down_consumed
            }
        };

        if oneshot {
            let cond = KeyCondition::new(resolved, inner.modifier, true, true);
            let fired = self.dispatch(&mut inner, cond);
            return handled || fired;
        }

        handled
    }

    fn dispatch_up(self: &Arc<Self>, inner: &mut EngineInner, resolved: KeyCode, replaced: bool) -> bool {
        let cond = KeyCondition::new(resolved, inner.modifier, false, false);
        if self.dispatch(inner, cond) {
            return true;
        }
        if replaced {
            self.send_single(inner, resolved, false);
            return true;
        }
        if self.passthru_by_send.load(Ordering::SeqCst) {
            self.send_single(inner, resolved, false);
            return true;
        }
        false
    }

    /// The hook lost and regained control (commonly: its callback took
    /// too long and the OS disabled it). Only the live modifier state is
    /// reset; key tables, focus, and multi-stroke state are untouched.
    pub fn on_hook_restored(&self) {
        warn!("keyboard hook was restored, resetting modifier state");
        self.inner.lock().unwrap().modifier = ModifierMask::empty();
    }

    pub fn start_recording(&self) {
        self.inner.lock().unwrap().replay.start_recording();
    }

    pub fn stop_recording(&self) {
        self.inner.lock().unwrap().replay.stop_recording();
    }

    pub fn toggle_recording(&self) {
        self.inner.lock().unwrap().replay.toggle_recording();
    }

    /// Replays the normalized recorded sequence back through the engine.
    /// Events the engine passes through are re-emitted via an
    /// `InputContext` in replay mode so they still reach the OS.
    pub fn playback(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut inner = self.inner.lock().unwrap();
        let mut buffer = std::mem::take(&mut inner.replay);
        drop(inner);
        buffer.playback(|vk, down| {
            let handled = if down { engine.on_key_down(vk) } else { engine.on_key_up(vk) };
            if !handled {
                let inner = engine.inner.lock().unwrap();
                let mut ctx = InputContext::new(
                    engine.hook.as_ref(),
                    inner.layout,
                    &inner.vk_mod,
                    inner.modifier,
                    true,
                );
                ctx.send_key_by_vk(vk, down);
                let _ = ctx.flush();
            }
            handled
        });
        self.inner.lock().unwrap().replay = buffer;
    }
}

fn update_unified(inner: &mut EngineInner) {
    let mut unified = KeyTable::new();
    if let Some(ms) = &inner.multi_stroke {
        unified.merge_from(ms);
    } else {
        for (focus, table) in &inner.keytables {
            if focus.check(inner.focus_path.as_deref(), inner.focus_elm.as_deref()) {
                unified.merge_from(table);
            }
        }
    }
    inner.unified = unified;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ClipboardItem, ConsoleLevel, HookEvent};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    struct FakeHook {
        layout: KeyboardLayout,
        sent: StdMutex<Vec<(KeyCode, bool)>>,
        callback: StdMutex<Option<Box<dyn Fn(HookEvent) -> bool + Send + Sync>>>,
    }

    impl FakeHook {
        fn new() -> Arc<Self> {
            Arc::new(FakeHook {
                layout: KeyboardLayout::Ansi,
                sent: StdMutex::new(Vec::new()),
                callback: StdMutex::new(None),
            })
        }
    }

    impl HookPort for FakeHook {
        fn set_callback(&self, callback: Box<dyn Fn(HookEvent) -> bool + Send + Sync>) {
            *self.callback.lock().unwrap() = Some(callback);
        }
        fn send_keyboard_event(&self, vk: KeyCode, down: bool) -> Result<()> {
            self.sent.lock().unwrap().push((vk, down));
            Ok(())
        }
        fn keyboard_layout(&self) -> KeyboardLayout {
            self.layout
        }
    }

    struct FakeUi;
    impl UIElementPort for FakeUi {
        fn focused_element(&self) -> Option<Box<dyn UIElementHandle>> {
            None
        }
    }

    struct FakeClipboard;
    impl ClipboardPort for FakeClipboard {
        fn current(&self) -> Option<ClipboardItem> {
            None
        }
        fn set_callback(&self, _callback: Box<dyn Fn() + Send + Sync>) {}
    }

    struct NullConsole;
    impl ConsolePort for NullConsole {
        fn write(&self, _message: &str, _level: ConsoleLevel) {}
        fn set_text(&self, _field: &str, _text: &str) {}
    }

    fn build_engine() -> Arc<Engine> {
        let hook = FakeHook::new();
        Engine::new(hook, Arc::new(FakeUi), Arc::new(FakeClipboard), Arc::new(NullConsole), None)
    }

    #[test]
    fn unconfigured_key_passes_through() {
        let engine = build_engine();
        engine.reset_defaults();
        assert!(!engine.on_key_down(0x00));
        assert!(!engine.on_key_up(0x00));
    }

    #[test]
    fn bound_key_is_handled() {
        let engine = build_engine();
        engine.reset_defaults();
        let layout = engine.layout();
        let mut table = KeyTable::new();
        table.set("Q", Action::Sequence(vec!["W".into()]), layout);
        engine.register_keytable(FocusCondition::new(None, None), table);

        let q = expr::str_to_vk("Q", layout).unwrap();
        assert!(engine.on_key_down(q));
        assert!(engine.on_key_up(q));
    }

    #[test]
    fn oneshot_fires_after_up() {
        let engine = build_engine();
        engine.reset_defaults();
        let layout = engine.layout();
        let mut table = KeyTable::new();
        table.set("O-Q", Action::Sequence(vec!["W".into()]), layout);
        engine.register_keytable(FocusCondition::new(None, None), table);

        let q = expr::str_to_vk("Q", layout).unwrap();
        // Plain down/up of an unbound key passes through...
        assert!(!engine.on_key_down(q));
        // ...but the up triggers the synthesized one-shot dispatch.
        assert!(engine.on_key_up(q));
    }

    #[test]
    fn replaced_key_is_sent_when_unbound() {
        let engine = build_engine();
        engine.reset_defaults();
        let layout = engine.layout();
        engine.replace_key("Q", "W").unwrap();
        let q = expr::str_to_vk("Q", layout).unwrap();
        assert!(engine.on_key_down(q));
    }

    #[test]
    fn call_action_oneshot_fires_once_and_not_when_interrupted() {
        let engine = build_engine();
        engine.reset_defaults();
        let layout = engine.layout();

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut table = KeyTable::new();
        table.set(
            "O-Q",
            Action::Call(Arc::new(move || {
                counted.fetch_add(1, Ordering::SeqCst);
            })),
            layout,
        );
        engine.register_keytable(FocusCondition::new(None, None), table);

        let q = expr::str_to_vk("Q", layout).unwrap();
        let a = expr::str_to_vk("A", layout).unwrap();

        // [down, up] with nothing in between: the one-shot fires exactly once.
        engine.on_key_down(q);
        engine.on_key_up(q);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // [down, A, up-A, up]: an intervening key breaks the one-shot
        // pairing, so it does not fire again.
        engine.on_key_down(q);
        engine.on_key_down(a);
        engine.on_key_up(a);
        engine.on_key_up(q);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
