//! Concrete macOS host ports (C10): a `CGEventTap`-based [`HookPort`], an
//! Accessibility-API-based [`UIElementPort`], an `NSPasteboard`-based
//! [`ClipboardPort`], and a `log`-backed [`ConsolePort`].

use core::ptr::NonNull;
use std::ffi::c_void;
use std::ptr::null_mut;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use accessibility_sys::AXUIElementRef;
use log::{error, info, warn};
use objc2_app_kit::NSPasteboard;
use objc2_core_foundation::{
    CFRetained, CFRunLoop, CFString, CFType, CGPoint, Type, kCFRunLoopCommonModes,
};
use objc2_core_graphics::{
    CGEvent, CGEventField, CGEventFlags, CGEventSource, CGEventSourceStateID, CGEventTapLocation,
    CGEventTapOptions, CGEventTapPlacement, CGEventTapProxy, CGEventType,
};
use objc2_foundation::CFMachPort;
use stdext::function_name;

use crate::errors::{Error, Result};
use crate::keycode::{KeyCode, KeyboardLayout};
use crate::ports::{ClipboardItem, ClipboardPort, ConsoleLevel, ConsolePort, HookEvent, HookPort, UIElementHandle, UIElementPort};

/// RAII teardown, run on drop. Mirrors the teacher's `util::Cleanuper`.
struct Cleanuper {
    cleanup: Option<Box<dyn Fn() + Send>>,
}

impl Cleanuper {
    fn new(cleanup: Box<dyn Fn() + Send>) -> Self {
        Cleanuper { cleanup: Some(cleanup) }
    }
}

impl Drop for Cleanuper {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[link(name = "ApplicationServices", kind = "framework")]
unsafe extern "C" {
    fn AXUIElementCopyAttributeValue(
        element: AXUIElementRef,
        attribute: &CFString,
        value: *mut *mut CFType,
    ) -> i32;
    fn AXUIElementCreateSystemWide() -> AXUIElementRef;
    fn AXUIElementCreateApplication(pid: i32) -> AXUIElementRef;

    fn TISCopyCurrentASCIICapableKeyboardLayoutInputSource() -> *mut c_void;
    fn TISGetInputSourceProperty(keyboard: *const c_void, property: *const c_void) -> *mut c_void;
    static kTISPropertyInputSourceID: *const c_void;
}

fn ax_attribute(element: AXUIElementRef, name: &str) -> Option<CFRetained<CFType>> {
    let cfname = CFString::from_str(name);
    let mut value: *mut CFType = null_mut();
    let status = unsafe { AXUIElementCopyAttributeValue(element, &cfname, &mut value) };
    if status != 0 {
        return None;
    }
    NonNull::new(value).map(|ptr| unsafe { CFRetained::from_raw(ptr) })
}

fn ax_string_attribute(element: AXUIElementRef, name: &str) -> Option<String> {
    ax_attribute(element, name).map(|value| {
        let s: &CFString = unsafe { &*(value.as_ref() as *const CFType as *const CFString) };
        s.to_string()
    })
}

fn ax_element_attribute(element: AXUIElementRef, name: &str) -> Option<AXUIElementRef> {
    ax_attribute(element, name).map(|value| {
        CFRetained::into_raw(value).cast::<c_void>().as_ptr() as AXUIElementRef
    })
}

/// Wraps a retained `AXUIElementRef`.
pub struct AxElement {
    raw: AXUIElementRef,
}

unsafe impl Send for AxElement {}

impl AxElement {
    fn from_raw(raw: AXUIElementRef) -> Option<Self> {
        if raw.is_null() { None } else { Some(AxElement { raw }) }
    }
}

impl UIElementHandle for AxElement {
    fn role(&self) -> Option<String> {
        ax_string_attribute(self.raw, "AXRole")
    }

    fn title(&self) -> Option<String> {
        ax_string_attribute(self.raw, "AXTitle")
    }

    fn parent(&self) -> Option<Box<dyn UIElementHandle>> {
        let parent = ax_element_attribute(self.raw, "AXParent")?;
        AxElement::from_raw(parent).map(|e| Box::new(e) as Box<dyn UIElementHandle>)
    }

    fn clone_handle(&self) -> Box<dyn UIElementHandle> {
        Box::new(AxElement { raw: self.raw })
    }
}

/// Walks the focused application down to its most specific focused
/// element, matching `keyhac_main.py`'s `_get_focused_element`:
/// `AXFocusedUIElement`, falling back to `AXFocusedWindow`, falling back
/// to the application element itself.
pub struct MacUIElementPort;

impl MacUIElementPort {
    pub fn new() -> Self {
        MacUIElementPort
    }

    fn frontmost_app_pid(&self) -> Option<i32> {
        use objc2_app_kit::NSWorkspace;
        let workspace = unsafe { NSWorkspace::sharedWorkspace() };
        let app = unsafe { workspace.frontmostApplication() }?;
        Some(unsafe { app.processIdentifier() })
    }
}

impl Default for MacUIElementPort {
    fn default() -> Self {
        Self::new()
    }
}

impl UIElementPort for MacUIElementPort {
    fn focused_element(&self) -> Option<Box<dyn UIElementHandle>> {
        let pid = self.frontmost_app_pid()?;
        let app_ref = unsafe { AXUIElementCreateApplication(pid) };
        if app_ref.is_null() {
            return None;
        }
        if let Some(focused) = ax_element_attribute(app_ref, "AXFocusedUIElement") {
            if let Some(elm) = AxElement::from_raw(focused) {
                return Some(Box::new(elm));
            }
        }
        if let Some(window) = ax_element_attribute(app_ref, "AXFocusedWindow") {
            if let Some(elm) = AxElement::from_raw(window) {
                return Some(Box::new(elm));
            }
        }
        AxElement::from_raw(app_ref).map(|e| Box::new(e) as Box<dyn UIElementHandle>)
    }
}

type Callback = Box<dyn Fn(HookEvent) -> bool + Send + Sync>;

/// `CGEventTap`-based keyboard hook. Adapted from the teacher's
/// `platform/input.rs`: same tap-creation/run-loop-source/`Cleanuper`
/// shape, narrowed to key-down/key-up only (no mouse or gesture events —
/// out of scope here) and generalized to dispatch through a
/// caller-supplied callback rather than a fixed event enum.
pub struct MacHookPort {
    callback: Arc<Mutex<Option<Callback>>>,
    tap_port: Mutex<Option<CFRetained<CFMachPort>>>,
    cleanup: Mutex<Option<Cleanuper>>,
}

impl MacHookPort {
    pub fn new() -> Arc<Self> {
        Arc::new(MacHookPort {
            callback: Arc::new(Mutex::new(None)),
            tap_port: Mutex::new(None),
            cleanup: Mutex::new(None),
        })
    }

    /// Creates the event tap and registers it on the main run loop. Must
    /// be called once before [`run_event_loop`] drives the loop.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let key_event_mask = (1u64 << CGEventType::KeyDown.0) | (1u64 << CGEventType::KeyUp.0);

        unsafe {
            let this = Arc::into_raw(Arc::clone(self)) as *mut c_void;
            let tap = CGEvent::tap_create(
                CGEventTapLocation::HIDEventTap,
                CGEventTapPlacement::HeadInsertEventTap,
                CGEventTapOptions::Default,
                key_event_mask,
                Some(Self::callback_trampoline),
                this,
            );
            let Some(tap) = tap else {
                // Drop the leaked strong ref we just created for the tap.
                drop(Arc::from_raw(this as *const Self));
                return Err(Error::PermissionDenied(format!(
                    "{}: could not create CGEventTap (accessibility permission missing?)",
                    function_name!()
                )));
            };

            let (run_loop_source, main_loop) =
                CFMachPort::new_run_loop_source(None, Some(&tap), 0)
                    .zip(CFRunLoop::main())
                    .ok_or_else(|| {
                        Error::Host(format!("{}: unable to create run loop source", function_name!()))
                    })?;
            CFRunLoop::add_source(&main_loop, Some(&run_loop_source), kCFRunLoopCommonModes);

            *self.tap_port.lock().unwrap() = Some(tap.clone());
            let cleanup_tap = tap.clone();
            *self.cleanup.lock().unwrap() = Some(Cleanuper::new(Box::new(move || {
                info!("{}: tearing down keyboard hook", function_name!());
                CFRunLoop::remove_source(&main_loop, Some(&run_loop_source), kCFRunLoopCommonModes);
                CFMachPort::invalidate(&cleanup_tap);
                CGEvent::tap_enable(&cleanup_tap, false);
                drop(unsafe { Arc::from_raw(this as *const Self) });
            })));
        }
        Ok(())
    }

    extern "C-unwind" fn callback_trampoline(
        _proxy: CGEventTapProxy,
        event_type: CGEventType,
        mut event_ref: NonNull<CGEvent>,
        this: *mut c_void,
    ) -> *mut CGEvent {
        let this = unsafe { &*(this as *const Self) };
        let intercept = this.dispatch(event_type, unsafe { event_ref.as_ref() });
        if intercept {
            return null_mut();
        }
        unsafe { event_ref.as_mut() }
    }

    fn dispatch(&self, event_type: CGEventType, event: &CGEvent) -> bool {
        match event_type {
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!("{}: hook disabled by the OS, re-enabling", function_name!());
                if let Some(tap) = &*self.tap_port.lock().unwrap() {
                    CGEvent::tap_enable(tap, true);
                }
                self.fire(HookEvent::HookRestored);
                false
            }
            CGEventType::KeyDown => {
                let vk = CGEvent::integer_value_field(Some(event), CGEventField::KeyboardEventKeycode);
                self.fire(HookEvent::KeyDown(vk as KeyCode))
            }
            CGEventType::KeyUp => {
                let vk = CGEvent::integer_value_field(Some(event), CGEventField::KeyboardEventKeycode);
                self.fire(HookEvent::KeyUp(vk as KeyCode))
            }
            _ => false,
        }
    }

    /// Runs the registered callback, if any, and returns whether the
    /// event should be swallowed. With no callback registered yet, every
    /// event passes through untouched.
    fn fire(&self, event: HookEvent) -> bool {
        match &*self.callback.lock().unwrap() {
            Some(callback) => callback(event),
            None => false,
        }
    }
}

impl HookPort for MacHookPort {
    fn set_callback(&self, callback: Box<dyn Fn(HookEvent) -> bool + Send + Sync>) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    fn send_keyboard_event(&self, vk: KeyCode, down: bool) -> Result<()> {
        let source = unsafe { CGEventSource::new(CGEventSourceStateID::HIDSystemState) };
        let event = unsafe { CGEvent::new_keyboard_event(source.as_deref(), vk, down) }
            .ok_or_else(|| Error::Host("failed to synthesize keyboard event".to_string()))?;
        unsafe { CGEvent::post(CGEventTapLocation::HIDEventTap, Some(&event)) };
        Ok(())
    }

    fn keyboard_layout(&self) -> KeyboardLayout {
        detect_keyboard_layout()
    }
}

fn detect_keyboard_layout() -> KeyboardLayout {
    unsafe {
        let source = TISCopyCurrentASCIICapableKeyboardLayoutInputSource();
        if source.is_null() {
            return KeyboardLayout::Ansi;
        }
        let id_ref = TISGetInputSourceProperty(source, kTISPropertyInputSourceID);
        if id_ref.is_null() {
            return KeyboardLayout::Ansi;
        }
        let cfstr: &CFString = &*(id_ref as *const CFString);
        if cfstr.to_string().contains("Japanese") {
            KeyboardLayout::Jis
        } else {
            KeyboardLayout::Ansi
        }
    }
}

/// Drives the main run loop, feeding the event tap, until `quit` is set.
/// Mirrors the teacher's `PlatformCallbacks::run`: repeated bounded
/// `CFRunLoopRunInMode` calls rather than a single blocking run, so a
/// quit request is noticed promptly.
pub fn run_event_loop(quit: &std::sync::atomic::AtomicBool) {
    use objc2_core_foundation::{CFRunLoop, kCFRunLoopDefaultMode};
    use std::sync::atomic::Ordering;

    while !quit.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(Some(kCFRunLoopDefaultMode), Duration::from_secs(1), false);
        }
    }
}

/// Polls `NSPasteboard`'s change count on a background thread, since
/// AppKit has no push notification for clipboard changes.
pub struct MacClipboardPort {
    callback: Arc<Mutex<Option<Box<dyn Fn() + Send + Sync>>>>,
}

impl MacClipboardPort {
    pub fn new() -> Arc<Self> {
        let port = Arc::new(MacClipboardPort { callback: Arc::new(Mutex::new(None)) });
        let watcher = Arc::clone(&port);
        std::thread::Builder::new()
            .name("keytap-clipboard-watch".to_string())
            .spawn(move || watcher.watch())
            .expect("failed to spawn clipboard watcher thread");
        port
    }

    fn watch(&self) {
        let pasteboard = unsafe { NSPasteboard::generalPasteboard() };
        let mut last_count = unsafe { pasteboard.changeCount() };
        loop {
            std::thread::sleep(Duration::from_millis(250));
            let count = unsafe { pasteboard.changeCount() };
            if count != last_count {
                last_count = count;
                if let Some(callback) = &*self.callback.lock().unwrap() {
                    callback();
                }
            }
        }
    }
}

impl ClipboardPort for MacClipboardPort {
    fn current(&self) -> Option<ClipboardItem> {
        let pasteboard = unsafe { NSPasteboard::generalPasteboard() };
        let string = unsafe { pasteboard.stringForType(objc2_app_kit::NSPasteboardTypeString) }?;
        Some(ClipboardItem { data: string.to_string() })
    }

    fn set_callback(&self, callback: Box<dyn Fn() + Send + Sync>) {
        *self.callback.lock().unwrap() = Some(callback);
    }
}

/// Forwards console output to `log`, matching `keyhac_console.py`'s
/// `ConsoleLoggingHandler` in spirit. keytap ships no GUI console window.
pub struct LogConsolePort;

impl ConsolePort for LogConsolePort {
    fn write(&self, message: &str, level: ConsoleLevel) {
        match level {
            ConsoleLevel::Info => info!("{message}"),
            ConsoleLevel::Warning => warn!("{message}"),
            ConsoleLevel::Error => error!("{message}"),
        }
    }

    fn set_text(&self, field: &str, text: &str) {
        info!("{field}: {text}");
    }
}
