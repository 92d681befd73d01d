//! evdev interception listener
//!
//! Every keyboard is grabbed exclusively, so the desktop never sees its
//! events directly. Each event goes through the matcher; what is passed
//! through is re-emitted on a uinput virtual keyboard. Only key events are
//! re-emitted, so devices that also report pointer axes are never grabbed.

use evdev::uinput::VirtualDevice;
use evdev::{AttributeSet, AttributeSetRef, Device, EventSummary, EventType, InputEvent, KeyCode};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{HotkeyError, HotkeyMatcher, KeyStateQuery, KeyTransition, Modifier, Verdict};
use crate::constants::{hotkey, paths, permissions};

/// How often blocked listener threads look at the stop flag
const STOP_POLL_MS: u16 = 200;

/// Longest wait for keys held at startup to be released before grabbing
const RELEASE_WAIT: Duration = Duration::from_millis(750);

type SharedVirtual = Arc<Mutex<VirtualDevice>>;

/// Live modifier state of one grabbed device
struct DeviceKeyState<'a> {
    device: &'a Device,
}

impl KeyStateQuery for DeviceKeyState<'_> {
    fn modifier_held(&mut self, modifier: Modifier) -> bool {
        match self.device.get_key_state() {
            Ok(keys) => modifier.keys().iter().any(|&key| keys.contains(key)),
            Err(e) => {
                warn!(error = %e, "Failed to get keyboard state");
                false
            }
        }
    }
}

pub struct InterceptListener {
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl InterceptListener {
    /// Grab all keyboards and start one listener thread per device
    pub fn spawn(matcher: Arc<HotkeyMatcher>) -> Result<Self, HotkeyError> {
        let devices = find_all_keyboard_devices()?;

        let mut keys = AttributeSet::<KeyCode>::new();
        for (_, device) in &devices {
            if let Some(supported) = device.supported_keys() {
                for key in supported.iter() {
                    keys.insert(key);
                }
            }
        }

        let virtual_keyboard = VirtualDevice::builder()
            .and_then(|builder| builder.name(hotkey::VIRTUAL_KEYBOARD_NAME).with_keys(&keys))
            .and_then(|builder| builder.build())
            .map_err(HotkeyError::VirtualDevice)?;
        let virtual_keyboard: SharedVirtual = Arc::new(Mutex::new(virtual_keyboard));
        info!(name = hotkey::VIRTUAL_KEYBOARD_NAME, "Created virtual keyboard");

        let mut grabbed = Vec::with_capacity(devices.len());
        for (path, mut device) in devices {
            wait_for_key_release(&device);
            device.grab().map_err(|source| HotkeyError::Grab {
                device: path.display().to_string(),
                source,
            })?;
            debug!(device_path = %path.display(), "Grabbed keyboard");
            grabbed.push((path, device));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(grabbed.len());
        for (path, device) in grabbed {
            let matcher = matcher.clone();
            let virtual_keyboard = virtual_keyboard.clone();
            let stop = stop.clone();
            let handle = thread::spawn(move || {
                info!(device = ?device.name(), "Hotkey listener started");
                if let Err(e) = listen_for_hotkeys(device, &matcher, &virtual_keyboard, &stop) {
                    error!(device_path = %path.display(), error = %e, "Hotkey listener error");
                }
            });
            handles.push(handle);
        }

        Ok(Self { stop, handles })
    }

    /// Stop all listener threads; devices are ungrabbed as they exit
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles {
            if handle.join().is_err() {
                error!("Hotkey listener thread panicked");
            }
        }
    }
}

/// Find all keyboard devices that have letter keys
fn find_all_keyboard_devices() -> Result<Vec<(PathBuf, Device)>, HotkeyError> {
    info!(path = %paths::DEV_INPUT, "Scanning for keyboard devices...");

    let entries = std::fs::read_dir(paths::DEV_INPUT).map_err(|source| HotkeyError::DeviceAccess {
        path: paths::DEV_INPUT.to_string(),
        source,
    })?;

    let mut devices = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_event_node = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("event"));
        if !is_event_node {
            continue;
        }

        let Ok(device) = Device::open(&path) else {
            continue;
        };
        // Never grab our own re-emitting device
        if device.name() == Some(hotkey::VIRTUAL_KEYBOARD_NAME) {
            continue;
        }
        match classify_device(device.supported_keys(), device.supported_events()) {
            DeviceClass::Keyboard => {
                info!(device_path = %path.display(), name = ?device.name(), "Found keyboard device");
                devices.push((path, device));
            }
            DeviceClass::KeyboardWithPointer => {
                warn!(
                    device_path = %path.display(),
                    name = ?device.name(),
                    "Keyboard also reports pointer motion, leaving it ungrabbed (hotkey will not work from it)"
                );
            }
            DeviceClass::Other => {}
        }
    }

    if devices.is_empty() {
        return Err(HotkeyError::NoKeyboard {
            dir: paths::DEV_INPUT,
            group: permissions::INPUT_GROUP,
            hint: permissions::ADD_TO_INPUT_GROUP,
        });
    }

    info!(count = devices.len(), "Intercepting keyboard device(s)");
    Ok(devices)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceClass {
    Keyboard,
    /// Combo receivers and keyboards with a touchpad share one event node;
    /// grabbing them would swallow the pointer
    KeyboardWithPointer,
    Other,
}

fn classify_device(
    keys: Option<&AttributeSetRef<KeyCode>>,
    events: &AttributeSetRef<EventType>,
) -> DeviceClass {
    let has_letters = keys.is_some_and(|keys| keys.contains(KeyCode::KEY_A) && keys.contains(KeyCode::KEY_ENTER));
    if !has_letters {
        DeviceClass::Other
    } else if events.contains(EventType::RELATIVE) || events.contains(EventType::ABSOLUTE) {
        DeviceClass::KeyboardWithPointer
    } else {
        DeviceClass::Keyboard
    }
}

/// Key events that reach the desktop; the matcher decides per key event
fn route(
    events: impl IntoIterator<Item = InputEvent>,
    matcher: &HotkeyMatcher,
    state: &mut dyn KeyStateQuery,
) -> Vec<InputEvent> {
    let mut forward = Vec::new();
    for event in events {
        let EventSummary::Key(_, key, value) = event.destructure() else {
            continue;
        };
        let Some(transition) = KeyTransition::from_value(value) else {
            continue;
        };
        debug!(key = ?key, value = value, "Key event");

        match matcher.handle(key, transition, state) {
            Verdict::PassThrough => forward.push(InputEvent::new(EventType::KEY.0, key.code(), value)),
            Verdict::Consume => debug!(key = ?key, "Consumed hotkey event"),
        }
    }
    forward
}

/// Grabbing while a key is down would strand its release inside our grab
fn wait_for_key_release(device: &Device) {
    let deadline = Instant::now() + RELEASE_WAIT;
    while Instant::now() < deadline {
        match device.get_key_state() {
            Ok(keys) if keys.iter().next().is_some() => thread::sleep(Duration::from_millis(10)),
            _ => return,
        }
    }
    debug!(device = ?device.name(), "Keys still held, grabbing anyway");
}

/// Wait up to `STOP_POLL_MS` for the device to become readable
fn wait_readable(device: &Device) -> io::Result<bool> {
    let mut fds = [PollFd::new(device.as_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(STOP_POLL_MS)) {
        Ok(ready) => Ok(ready > 0),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(io::Error::from(e)),
    }
}

fn listen_for_hotkeys(
    mut device: Device,
    matcher: &HotkeyMatcher,
    virtual_keyboard: &SharedVirtual,
    stop: &AtomicBool,
) -> io::Result<()> {
    while !stop.load(Ordering::Relaxed) {
        if !wait_readable(&device)? {
            continue;
        }

        // Finish with the events iterator before querying key state
        let events: Vec<InputEvent> = device.fetch_events()?.collect();

        let forward = route(events, matcher, &mut DeviceKeyState { device: &device });

        if !forward.is_empty() {
            virtual_keyboard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .emit(&forward)?;
        }
    }

    if let Err(e) = device.ungrab() {
        warn!(device = ?device.name(), error = %e, "Failed to ungrab keyboard");
    }
    info!(device = ?device.name(), "Hotkey listener stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkeys::{Binding, HotkeyCommand, RepeatPolicy};
    use std::sync::RwLock;
    use std::sync::mpsc::{self, Receiver};

    struct Held(Option<Modifier>);

    impl KeyStateQuery for Held {
        fn modifier_held(&mut self, modifier: Modifier) -> bool {
            self.0 == Some(modifier)
        }
    }

    fn win_v_matcher() -> (HotkeyMatcher, Receiver<HotkeyCommand>) {
        let binding = Arc::new(RwLock::new(Binding {
            modifier: Modifier::Win,
            letter: 'V',
            repeat: RepeatPolicy::Ignore,
        }));
        let (tx, rx) = mpsc::channel();
        (HotkeyMatcher::new(binding, tx), rx)
    }

    fn key(code: KeyCode, value: i32) -> InputEvent {
        InputEvent::new(EventType::KEY.0, code.code(), value)
    }

    fn summary(events: &[InputEvent]) -> Vec<(u16, i32)> {
        events.iter().map(|e| (e.code(), e.value())).collect()
    }

    #[test]
    fn test_route_drops_only_the_hotkey_press() {
        let (matcher, rx) = win_v_matcher();
        let events = vec![
            key(KeyCode::KEY_LEFTMETA, 1),
            key(KeyCode::KEY_V, 1),
            key(KeyCode::KEY_V, 2),
            key(KeyCode::KEY_V, 0),
            key(KeyCode::KEY_LEFTMETA, 0),
            key(KeyCode::KEY_C, 1),
        ];

        let forwarded = route(events, &matcher, &mut Held(Some(Modifier::Win)));

        assert_eq!(
            summary(&forwarded),
            vec![
                (KeyCode::KEY_LEFTMETA.code(), 1),
                (KeyCode::KEY_V.code(), 0),
                (KeyCode::KEY_LEFTMETA.code(), 0),
                (KeyCode::KEY_C.code(), 1),
            ]
        );
        assert!(forwarded.iter().all(|e| e.event_type() == EventType::KEY));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_route_forwards_letter_without_modifier() {
        let (matcher, rx) = win_v_matcher();
        let forwarded = route(
            vec![key(KeyCode::KEY_V, 1), key(KeyCode::KEY_V, 0)],
            &matcher,
            &mut Held(None),
        );
        assert_eq!(
            summary(&forwarded),
            vec![(KeyCode::KEY_V.code(), 1), (KeyCode::KEY_V.code(), 0)]
        );
        assert!(rx.try_recv().is_err());
    }

    fn keyboard_keys() -> AttributeSet<KeyCode> {
        let mut keys = AttributeSet::<KeyCode>::new();
        keys.insert(KeyCode::KEY_A);
        keys.insert(KeyCode::KEY_ENTER);
        keys
    }

    #[test]
    fn test_plain_keyboard_is_grabbed() {
        let mut events = AttributeSet::<EventType>::new();
        events.insert(EventType::KEY);
        events.insert(EventType::MISC);
        let keys = keyboard_keys();
        assert_eq!(classify_device(Some(&*keys), &events), DeviceClass::Keyboard);
    }

    #[test]
    fn test_keyboard_with_pointer_is_left_alone() {
        let keys = keyboard_keys();
        for pointer in [EventType::RELATIVE, EventType::ABSOLUTE] {
            let mut events = AttributeSet::<EventType>::new();
            events.insert(EventType::KEY);
            events.insert(pointer);
            assert_eq!(
                classify_device(Some(&*keys), &events),
                DeviceClass::KeyboardWithPointer
            );
        }
    }

    #[test]
    fn test_non_keyboards_are_ignored() {
        let mut events = AttributeSet::<EventType>::new();
        events.insert(EventType::KEY);
        events.insert(EventType::RELATIVE);
        let mut buttons = AttributeSet::<KeyCode>::new();
        buttons.insert(KeyCode::BTN_LEFT);
        assert_eq!(classify_device(Some(&*buttons), &events), DeviceClass::Other);
        assert_eq!(classify_device(None, &events), DeviceClass::Other);
    }
}
