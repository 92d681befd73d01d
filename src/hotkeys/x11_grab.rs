//! Passive X11 key grab on the root window
//!
//! The conventional registration path. The server refuses the grab with
//! BadAccess when another client already owns the combination, which the
//! detector treats as the signal to fall back to evdev interception.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};
use x11rb::connection::Connection;
use x11rb::errors::ReplyError;
use x11rb::protocol::Event;
use x11rb::protocol::ErrorKind;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use super::{Binding, HotkeyError, HotkeyMatcher, KeyStateQuery, KeyTransition, Modifier, letter_key};

/// Lock and NumLock must not change whether the combination matches
const IGNORED_MODIFIER_VARIANTS: [u16; 4] = [
    0,
    1 << 1, // Lock
    1 << 4, // Mod2 (NumLock)
    (1 << 1) | (1 << 4),
];

/// Every mask grabbed for `base`, optionally only the first `count`
fn mask_variants(base: ModMask, count: usize) -> impl Iterator<Item = ModMask> {
    let base = u16::from(base);
    IGNORED_MODIFIER_VARIANTS
        .into_iter()
        .take(count)
        .map(move |extra| ModMask::from(base | extra))
}

fn modifier_mask(modifier: Modifier) -> ModMask {
    match modifier {
        Modifier::Alt => ModMask::M1,
        Modifier::Win => ModMask::M4,
    }
}

/// Modifier state as reported by the server with the key event
struct EventModState {
    state: KeyButMask,
}

impl KeyStateQuery for EventModState {
    fn modifier_held(&mut self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Alt => self.state.contains(KeyButMask::MOD1),
            Modifier::Win => self.state.contains(KeyButMask::MOD4),
        }
    }
}

fn x11_error(e: impl std::fmt::Display) -> HotkeyError {
    HotkeyError::X11(e.to_string())
}

struct Grabbed {
    keycode: Keycode,
    modifiers: ModMask,
}

pub struct X11Grab {
    conn: Arc<RustConnection>,
    root: Window,
    wake_window: Window,
    grabbed: Option<Grabbed>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl X11Grab {
    pub fn install(matcher: Arc<HotkeyMatcher>) -> Result<Self, HotkeyError> {
        let (conn, screen_num) = x11rb::connect(None).map_err(x11_error)?;
        let conn = Arc::new(conn);
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| HotkeyError::X11(format!("screen {screen_num} not found")))?;

        let binding = matcher.binding();
        let grabbed = grab_binding(&conn, root, binding)?;

        // Messages sent to this window wake the event thread on stop
        let wake_window = conn.generate_id().map_err(x11_error)?;
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            wake_window,
            root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::new(),
        )
        .map_err(x11_error)?;
        conn.flush().map_err(x11_error)?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let conn = conn.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                info!("X11 hotkey listener started");
                event_loop(&conn, &matcher, &stop, wake_window);
                info!("X11 hotkey listener stopped");
            })
        };

        info!(hotkey = %binding, keycode = grabbed.keycode, "Registered X11 key grab");
        Ok(Self {
            conn,
            root,
            wake_window,
            grabbed: Some(grabbed),
            stop,
            thread: Some(thread),
        })
    }

    /// Replace the grab for `previous` with one for `binding`
    ///
    /// The new combination is grabbed before the old one is released, so a
    /// failure leaves the previous grab in place.
    pub fn regrab(&mut self, previous: Binding, binding: Binding) -> Result<(), HotkeyError> {
        if previous.modifier == binding.modifier && previous.letter == binding.letter {
            return Ok(());
        }
        let grabbed = grab_binding(&self.conn, self.root, binding)?;
        debug!(hotkey = %binding, keycode = grabbed.keycode, "Re-registered X11 key grab");
        if let Some(old) = self.grabbed.replace(grabbed) {
            ungrab(&self.conn, self.root, &old);
        }
        Ok(())
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);

        let wake = ClientMessageEvent::new(32, self.wake_window, AtomEnum::NONE, [0u32; 5]);
        if let Err(e) = self
            .conn
            .send_event(false, self.wake_window, EventMask::NO_EVENT, wake)
            .and_then(|_| self.conn.flush())
        {
            warn!(error = %e, "Failed to wake X11 hotkey listener");
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("X11 hotkey listener thread panicked");
            }
        }

        if let Some(grabbed) = self.grabbed.take() {
            ungrab(&self.conn, self.root, &grabbed);
        }
        if let Err(e) = self
            .conn
            .destroy_window(self.wake_window)
            .and_then(|_| self.conn.flush())
        {
            debug!(error = %e, "Failed to destroy wake window");
        }
    }
}

/// Keycode currently producing the letter's keysym
fn find_keycode(conn: &RustConnection, letter: char) -> Result<Keycode, HotkeyError> {
    let setup = conn.setup();
    let (min, max) = (setup.min_keycode, setup.max_keycode);
    let mapping = conn
        .get_keyboard_mapping(min, max - min + 1)
        .map_err(x11_error)?
        .reply()
        .map_err(x11_error)?;

    // Latin letters use their ASCII value as keysym
    let wanted = [
        u32::from(letter.to_ascii_lowercase()),
        u32::from(letter.to_ascii_uppercase()),
    ];
    let per_keycode = usize::from(mapping.keysyms_per_keycode.max(1));
    mapping
        .keysyms
        .chunks(per_keycode)
        .position(|syms| syms.iter().any(|sym| wanted.contains(sym)))
        .map(|index| min + index as u8)
        .ok_or_else(|| HotkeyError::X11(format!("no keycode produces '{letter}'")))
}

fn grab_binding(conn: &RustConnection, root: Window, binding: Binding) -> Result<Grabbed, HotkeyError> {
    if letter_key(binding.letter).is_none() {
        return Err(HotkeyError::InvalidKey(binding.letter));
    }
    let keycode = find_keycode(conn, binding.letter)?;
    let base = modifier_mask(binding.modifier);

    for (done, modifiers) in mask_variants(base, IGNORED_MODIFIER_VARIANTS.len()).enumerate() {
        let result = conn
            .grab_key(false, root, modifiers, keycode, GrabMode::ASYNC, GrabMode::ASYNC)
            .map_err(ReplyError::from)
            .and_then(|cookie| cookie.check());

        if let Err(e) = result {
            release(conn, root, keycode, mask_variants(base, done));
            return Err(match e {
                ReplyError::X11Error(err) if err.error_kind == ErrorKind::Access => {
                    HotkeyError::GrabRefused(binding)
                }
                other => x11_error(other),
            });
        }
    }

    Ok(Grabbed {
        keycode,
        modifiers: base,
    })
}

fn ungrab(conn: &RustConnection, root: Window, grabbed: &Grabbed) {
    release(
        conn,
        root,
        grabbed.keycode,
        mask_variants(grabbed.modifiers, IGNORED_MODIFIER_VARIANTS.len()),
    );
}

fn release(conn: &RustConnection, root: Window, keycode: Keycode, masks: impl Iterator<Item = ModMask>) {
    for modifiers in masks {
        if let Err(e) = conn.ungrab_key(keycode, root, modifiers) {
            warn!(error = %e, "Failed to release X11 key grab");
        }
    }
    if let Err(e) = conn.flush() {
        warn!(error = %e, "Failed to flush X11 connection");
    }
}

fn dispatch(matcher: &HotkeyMatcher, transition: KeyTransition, state: KeyButMask) {
    // The grab only delivers the bound combination
    let Some(key) = letter_key(matcher.binding().letter) else {
        return;
    };
    matcher.handle(key, transition, &mut EventModState { state });
}

fn event_loop(conn: &RustConnection, matcher: &HotkeyMatcher, stop: &AtomicBool, wake_window: Window) {
    let mut pending: Option<Event> = None;
    let mut held = false;

    loop {
        let event = match pending.take() {
            Some(event) => event,
            None => match conn.wait_for_event() {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "X11 connection lost");
                    return;
                }
            },
        };
        if stop.load(Ordering::Relaxed) {
            return;
        }

        match event {
            Event::KeyPress(press) => {
                let transition = if held { KeyTransition::Repeat } else { KeyTransition::Press };
                held = true;
                dispatch(matcher, transition, press.state);
            }
            Event::KeyRelease(release) => {
                // Auto-repeat arrives as a release and a press sharing one timestamp
                match conn.poll_for_event() {
                    Ok(Some(Event::KeyPress(press)))
                        if press.time == release.time && press.detail == release.detail =>
                    {
                        dispatch(matcher, KeyTransition::Repeat, press.state);
                        continue;
                    }
                    Ok(next) => pending = next,
                    Err(e) => {
                        error!(error = %e, "X11 connection lost");
                        return;
                    }
                }
                held = false;
            }
            Event::ClientMessage(message) if message.window == wake_window => {}
            other => debug!(event = ?other, "Ignoring X11 event"),
        }
    }
}
