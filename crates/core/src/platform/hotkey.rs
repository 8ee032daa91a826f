use std::sync::Arc;
use std::thread::JoinHandle;

use crate::clock::RunGate;
use crate::trigger::InputTrigger;

/// Map a macOS virtual keycode to the key names used in configuration.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn mac_key_name(keycode: i64) -> Option<&'static str> {
    let name = match keycode {
        122 => "f1",
        120 => "f2",
        99 => "f3",
        118 => "f4",
        96 => "f5",
        97 => "f6",
        98 => "f7",
        100 => "f8",
        101 => "f9",
        109 => "f10",
        103 => "f11",
        111 => "f12",
        53 => "esc",
        49 => "space",
        36 => "enter",
        48 => "tab",
        0 => "a",
        11 => "b",
        8 => "c",
        2 => "d",
        14 => "e",
        3 => "f",
        5 => "g",
        4 => "h",
        34 => "i",
        38 => "j",
        40 => "k",
        37 => "l",
        46 => "m",
        45 => "n",
        31 => "o",
        35 => "p",
        12 => "q",
        15 => "r",
        1 => "s",
        17 => "t",
        32 => "u",
        9 => "v",
        13 => "w",
        7 => "x",
        16 => "y",
        6 => "z",
        29 => "0",
        18 => "1",
        19 => "2",
        20 => "3",
        21 => "4",
        23 => "5",
        22 => "6",
        26 => "7",
        28 => "8",
        25 => "9",
        _ => return None,
    };
    Some(name)
}

/// Windows virtual-key code for a configured key name.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn windows_vk(name: &str) -> Option<i32> {
    match name {
        "esc" => Some(0x1B),
        "space" => Some(0x20),
        "enter" => Some(0x0D),
        "tab" => Some(0x09),
        _ => {
            if let Some(n) = name.strip_prefix('f').and_then(|n| n.parse::<i32>().ok()) {
                return (1..=12).contains(&n).then_some(0x70 + n - 1);
            }
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => Some(c.to_ascii_uppercase() as i32),
                _ => None,
            }
        }
    }
}

/// Start a background thread delivering global key presses to `trigger`
/// until `gate` requests shutdown. The tap is listen-only so the stop key
/// still reaches the focused application.
#[cfg(target_os = "macos")]
pub fn start_hotkey_listener(trigger: Arc<InputTrigger>, gate: Arc<RunGate>) -> Option<JoinHandle<()>> {
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicPtr, Ordering};

    type CGEventTapProxy = *mut c_void;
    type CGEventRef = *mut c_void;
    type CFMachPortRef = *mut c_void;
    type CFRunLoopSourceRef = *mut c_void;
    type CFRunLoopRef = *mut c_void;
    type CFStringRef = *const c_void;
    type CGEventMask = u64;
    type CGEventType = u32;

    type CGEventTapCallBack = unsafe extern "C" fn(
        CGEventTapProxy,
        CGEventType,
        CGEventRef,
        *mut c_void,
    ) -> CGEventRef;

    const K_CG_HID_EVENT_TAP: u32 = 0;
    const K_CG_HEAD_INSERT_EVENT_TAP: u32 = 0;
    const K_CG_EVENT_TAP_OPTION_LISTEN_ONLY: u32 = 1;
    const CG_EVENT_KEY_DOWN: u32 = 10;
    const CG_EVENT_TAP_DISABLED_BY_TIMEOUT: u32 = 0xFFFFFFFE;
    const K_CG_KEYBOARD_EVENT_KEYCODE: u32 = 9;
    const K_CG_KEYBOARD_EVENT_AUTOREPEAT: u32 = 8;

    extern "C" {
        fn CGEventTapCreate(
            tap: u32,
            place: u32,
            options: u32,
            events_of_interest: CGEventMask,
            callback: CGEventTapCallBack,
            user_info: *mut c_void,
        ) -> CFMachPortRef;
        fn CFMachPortCreateRunLoopSource(
            allocator: *const c_void,
            port: CFMachPortRef,
            order: i64,
        ) -> CFRunLoopSourceRef;
        fn CFMachPortInvalidate(port: CFMachPortRef);
        fn CFRunLoopGetCurrent() -> CFRunLoopRef;
        fn CFRunLoopAddSource(rl: CFRunLoopRef, source: CFRunLoopSourceRef, mode: CFStringRef);
        fn CFRunLoopRunInMode(mode: CFStringRef, seconds: f64, return_after_source_handled: u8) -> i32;
        fn CFRelease(cf: *const c_void);
        fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
        fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);

        static kCFRunLoopDefaultMode: CFStringRef;
    }

    struct Listener {
        trigger: Arc<InputTrigger>,
        tap: AtomicPtr<c_void>,
    }

    unsafe extern "C" fn hotkey_callback(
        _proxy: CGEventTapProxy,
        event_type: CGEventType,
        event: CGEventRef,
        user_info: *mut c_void,
    ) -> CGEventRef {
        unsafe {
            let listener = &*(user_info as *const Listener);
            if event_type == CG_EVENT_TAP_DISABLED_BY_TIMEOUT {
                let tap = listener.tap.load(Ordering::Acquire);
                if !tap.is_null() {
                    CGEventTapEnable(tap, true);
                }
                return event;
            }
            if event_type != CG_EVENT_KEY_DOWN {
                return event;
            }
            if CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_AUTOREPEAT) != 0 {
                return event;
            }
            let keycode = CGEventGetIntegerValueField(event, K_CG_KEYBOARD_EVENT_KEYCODE);
            if let Some(name) = mac_key_name(keycode) {
                listener.trigger.on_key(name);
            }
            event
        }
    }

    let handle = std::thread::spawn(move || unsafe {
        let listener = Box::into_raw(Box::new(Listener { trigger, tap: AtomicPtr::new(std::ptr::null_mut()) }));
        let tap = CGEventTapCreate(
            K_CG_HID_EVENT_TAP,
            K_CG_HEAD_INSERT_EVENT_TAP,
            K_CG_EVENT_TAP_OPTION_LISTEN_ONLY,
            1 << CG_EVENT_KEY_DOWN,
            hotkey_callback,
            listener as *mut c_void,
        );
        if tap.is_null() {
            crate::logger::error_p(
                "trigger",
                "failed to create event tap for global hotkeys; grant Accessibility permission to your terminal",
            );
            drop(Box::from_raw(listener));
            return;
        }
        (*listener).tap.store(tap, Ordering::Release);

        let source = CFMachPortCreateRunLoopSource(std::ptr::null(), tap, 0);
        CFRunLoopAddSource(CFRunLoopGetCurrent(), source, kCFRunLoopDefaultMode);
        CGEventTapEnable(tap, true);
        crate::logger::info_p("trigger", "global hotkeys active");

        while !gate.is_shutdown() {
            CFRunLoopRunInMode(kCFRunLoopDefaultMode, 0.1, 0);
        }

        CGEventTapEnable(tap, false);
        CFMachPortInvalidate(tap);
        CFRelease(source as *const c_void);
        CFRelease(tap as *const c_void);
        drop(Box::from_raw(listener));
    });
    Some(handle)
}

/// Windows: poll key state instead of `RegisterHotKey`, which would
/// swallow the stop key for the browser.
#[cfg(target_os = "windows")]
pub fn start_hotkey_listener(trigger: Arc<InputTrigger>, gate: Arc<RunGate>) -> Option<JoinHandle<()>> {
    use std::time::Duration;
    use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;

    let keys: Vec<(String, i32)> = trigger
        .hotkeys()
        .keys()
        .iter()
        .filter_map(|k| windows_vk(k).map(|vk| (k.to_string(), vk)))
        .collect();
    if keys.is_empty() {
        crate::logger::warn_p("trigger", "no global hotkey could be mapped");
        return None;
    }

    let handle = std::thread::spawn(move || {
        crate::logger::info_p("trigger", "global hotkeys active");
        let mut down = vec![false; keys.len()];
        while !gate.is_shutdown() {
            for (i, (name, vk)) in keys.iter().enumerate() {
                let pressed = unsafe { GetAsyncKeyState(*vk) } as u16 & 0x8000 != 0;
                if pressed && !down[i] {
                    trigger.on_key(name);
                }
                down[i] = pressed;
            }
            std::thread::sleep(Duration::from_millis(30));
        }
    });
    Some(handle)
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn start_hotkey_listener(_trigger: Arc<InputTrigger>, _gate: Arc<RunGate>) -> Option<JoinHandle<()>> {
    crate::logger::warn_p("trigger", "global hotkeys not supported on this platform; use the TUI keys");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_keycodes_cover_function_keys() {
        assert_eq!(mac_key_name(101), Some("f9"));
        assert_eq!(mac_key_name(53), Some("esc"));
        assert_eq!(mac_key_name(111), Some("f12"));
        assert_eq!(mac_key_name(999), None);
    }

    #[test]
    fn windows_vk_codes() {
        assert_eq!(windows_vk("f1"), Some(0x70));
        assert_eq!(windows_vk("f12"), Some(0x7B));
        assert_eq!(windows_vk("esc"), Some(0x1B));
        assert_eq!(windows_vk("q"), Some('Q' as i32));
        assert_eq!(windows_vk("f13"), None);
        assert_eq!(windows_vk("pgup"), None);
    }
}
