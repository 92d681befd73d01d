//! Global hotkey detection
//!
//! A press of the bound letter while the bound modifier is physically held
//! produces one [`HotkeyCommand::Activate`] on the dispatcher channel. The
//! modifier is queried at the moment of the key-down, never tracked from
//! earlier events.
//!
//! Two listener paths share the [`HotkeyMatcher`]: a passive X11 key grab,
//! and evdev interception (grab every keyboard, re-emit what we do not
//! consume through uinput) when the grab is refused or X11 is unavailable.

pub mod intercept;
pub mod x11_grab;

use evdev::KeyCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::constants::{input, paths, permissions};
use intercept::InterceptListener;
use x11_grab::X11Grab;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Win,
    Alt,
}

impl Modifier {
    /// Left and right physical keys
    pub fn keys(self) -> [KeyCode; 2] {
        match self {
            Modifier::Win => [KeyCode::KEY_LEFTMETA, KeyCode::KEY_RIGHTMETA],
            Modifier::Alt => [KeyCode::KEY_LEFTALT, KeyCode::KEY_RIGHTALT],
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Win => write!(f, "Win"),
            Modifier::Alt => write!(f, "Alt"),
        }
    }
}

/// What auto-repeat of the bound letter does while the modifier is held
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatPolicy {
    /// Swallow repeats without activating again
    #[default]
    Ignore,
    /// Each repeat activates like a fresh press
    Retrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub modifier: Modifier,
    pub letter: char,
    pub repeat: RepeatPolicy,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}", self.modifier, self.letter)
    }
}

pub type SharedBinding = Arc<RwLock<Binding>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Press,
    Release,
    Repeat,
}

impl KeyTransition {
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            input::KEY_PRESS => Some(KeyTransition::Press),
            input::KEY_RELEASE => Some(KeyTransition::Release),
            input::KEY_REPEAT => Some(KeyTransition::Repeat),
            _ => None,
        }
    }
}

/// Whether an intercepted key event reaches the rest of the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    PassThrough,
    Consume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyCommand {
    Activate,
}

/// Physical modifier state at the moment of the query
pub trait KeyStateQuery {
    fn modifier_held(&mut self, modifier: Modifier) -> bool;
}

#[derive(Debug, Error)]
pub enum HotkeyError {
    #[error(
        "no keyboard device found under {dir}; add yourself to the '{group}' group ({hint}) and log in again"
    )]
    NoKeyboard {
        dir: &'static str,
        group: &'static str,
        hint: &'static str,
    },

    #[error("cannot read {path}: {source}")]
    DeviceAccess {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to grab keyboard {device}: {source}")]
    Grab {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create uinput virtual keyboard: {0}")]
    VirtualDevice(#[source] std::io::Error),

    #[error("X11 key grab refused, another client owns {0}")]
    GrabRefused(Binding),

    #[error("X11 unavailable: {0}")]
    X11(String),

    #[error("hotkey key must be a letter, got {0:?}")]
    InvalidKey(char),
}

/// evdev key code for an ASCII letter
pub fn letter_key(letter: char) -> Option<KeyCode> {
    let key = match letter.to_ascii_uppercase() {
        'A' => KeyCode::KEY_A,
        'B' => KeyCode::KEY_B,
        'C' => KeyCode::KEY_C,
        'D' => KeyCode::KEY_D,
        'E' => KeyCode::KEY_E,
        'F' => KeyCode::KEY_F,
        'G' => KeyCode::KEY_G,
        'H' => KeyCode::KEY_H,
        'I' => KeyCode::KEY_I,
        'J' => KeyCode::KEY_J,
        'K' => KeyCode::KEY_K,
        'L' => KeyCode::KEY_L,
        'M' => KeyCode::KEY_M,
        'N' => KeyCode::KEY_N,
        'O' => KeyCode::KEY_O,
        'P' => KeyCode::KEY_P,
        'Q' => KeyCode::KEY_Q,
        'R' => KeyCode::KEY_R,
        'S' => KeyCode::KEY_S,
        'T' => KeyCode::KEY_T,
        'U' => KeyCode::KEY_U,
        'V' => KeyCode::KEY_V,
        'W' => KeyCode::KEY_W,
        'X' => KeyCode::KEY_X,
        'Y' => KeyCode::KEY_Y,
        'Z' => KeyCode::KEY_Z,
        _ => return None,
    };
    Some(key)
}

/// Decides, per key event, whether the hotkey fired
///
/// Runs on the listener threads, so it only classifies and hands off.
pub struct HotkeyMatcher {
    binding: SharedBinding,
    sender: Sender<HotkeyCommand>,
}

impl HotkeyMatcher {
    pub fn new(binding: SharedBinding, sender: Sender<HotkeyCommand>) -> Self {
        Self { binding, sender }
    }

    pub fn binding(&self) -> Binding {
        *self.binding.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self, key: KeyCode, transition: KeyTransition, state: &mut dyn KeyStateQuery) -> Verdict {
        let binding = self.binding();
        if letter_key(binding.letter) != Some(key) {
            return Verdict::PassThrough;
        }

        match transition {
            KeyTransition::Release => Verdict::PassThrough,
            KeyTransition::Press | KeyTransition::Repeat => {
                if !state.modifier_held(binding.modifier) {
                    return Verdict::PassThrough;
                }
                if transition == KeyTransition::Press || binding.repeat == RepeatPolicy::Retrigger {
                    self.activate(&binding);
                } else {
                    debug!(hotkey = %binding, "Swallowing auto-repeat");
                }
                Verdict::Consume
            }
        }
    }

    fn activate(&self, binding: &Binding) {
        info!(hotkey = %binding, "Hotkey pressed, sending activation");
        if self.sender.send(HotkeyCommand::Activate).is_err() {
            warn!("Activation dispatcher is gone, dropping hotkey press");
        }
    }
}

/// How the detector listens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// X11 key grab, evdev interception if the grab is refused
    Auto,
    /// Skip the X11 grab
    Intercept,
}

enum Listener {
    X11(X11Grab),
    Intercept(InterceptListener),
    /// Holds no OS resources
    #[cfg(test)]
    Inert,
}

impl Listener {
    fn name(&self) -> &'static str {
        match self {
            Listener::X11(_) => "x11-grab",
            Listener::Intercept(_) => "evdev-intercept",
            #[cfg(test)]
            Listener::Inert => "inert",
        }
    }
}

pub struct HotkeyDetector {
    binding: SharedBinding,
    matcher: Arc<HotkeyMatcher>,
    listener: Option<Listener>,
}

impl HotkeyDetector {
    /// Start listening for `binding`; activations go to `sender`
    pub fn install(
        binding: Binding,
        sender: Sender<HotkeyCommand>,
        mode: InstallMode,
    ) -> Result<Self, HotkeyError> {
        if letter_key(binding.letter).is_none() {
            return Err(HotkeyError::InvalidKey(binding.letter));
        }

        let binding = Arc::new(RwLock::new(binding));
        let matcher = Arc::new(HotkeyMatcher::new(binding.clone(), sender));
        let listener = start_listener(&matcher, mode)?;
        info!(hotkey = %matcher.binding(), listener = listener.name(), "Hotkey detector installed");

        Ok(Self {
            binding,
            matcher,
            listener: Some(listener),
        })
    }

    pub fn binding(&self) -> Binding {
        self.matcher.binding()
    }

    pub fn listener_name(&self) -> Option<&'static str> {
        self.listener.as_ref().map(Listener::name)
    }

    /// Change the combination without reinstalling the interception path
    pub fn update_config(&mut self, modifier: Modifier, letter: char) -> Result<(), HotkeyError> {
        self.update_binding(Binding {
            modifier,
            letter,
            repeat: self.binding().repeat,
        })
    }

    /// Switch to `binding`; on any error the previous binding and listener stay active
    pub fn update_binding(&mut self, binding: Binding) -> Result<(), HotkeyError> {
        if letter_key(binding.letter).is_none() {
            return Err(HotkeyError::InvalidKey(binding.letter));
        }
        let previous = self.binding();

        // Interception reads the binding per event; only a passive grab is keyed
        if let Some(Listener::X11(grab)) = &mut self.listener {
            match grab.regrab(previous, binding) {
                Ok(()) => {}
                Err(HotkeyError::GrabRefused(_)) => {
                    warn!(hotkey = %binding, "New hotkey grab refused, switching to evdev interception");
                    return self.replace_listener(binding, |matcher| {
                        InterceptListener::spawn(matcher).map(Listener::Intercept)
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.set_binding(binding);
        info!(from = %previous, to = %binding, "Hotkey updated");
        Ok(())
    }

    /// Start `spawn`'s listener, then retire the current one
    fn replace_listener(
        &mut self,
        binding: Binding,
        spawn: impl FnOnce(Arc<HotkeyMatcher>) -> Result<Listener, HotkeyError>,
    ) -> Result<(), HotkeyError> {
        let listener = spawn(self.matcher.clone())?;
        let name = listener.name();
        if let Some(old) = self.listener.replace(listener) {
            stop_listener(old);
        }
        let previous = self.binding();
        self.set_binding(binding);
        info!(from = %previous, to = %binding, listener = name, "Hotkey updated");
        Ok(())
    }

    fn set_binding(&self, binding: Binding) {
        *self.binding.write().unwrap_or_else(PoisonError::into_inner) = binding;
    }

    /// Stop listening and release every grab; safe to call twice
    pub fn uninstall(&mut self) {
        if let Some(listener) = self.listener.take() {
            let name = listener.name();
            stop_listener(listener);
            info!(listener = name, "Hotkey detector uninstalled");
        }
    }
}

impl Drop for HotkeyDetector {
    fn drop(&mut self) {
        self.uninstall();
    }
}

fn start_listener(matcher: &Arc<HotkeyMatcher>, mode: InstallMode) -> Result<Listener, HotkeyError> {
    if mode == InstallMode::Auto {
        match X11Grab::install(matcher.clone()) {
            Ok(grab) => return Ok(Listener::X11(grab)),
            Err(e @ (HotkeyError::GrabRefused(_) | HotkeyError::X11(_))) => {
                warn!(error = %e, "X11 hotkey grab unavailable, falling back to evdev interception");
            }
            Err(e) => return Err(e),
        }
    }

    if !check_permissions() {
        print_permission_error();
    }
    InterceptListener::spawn(matcher.clone()).map(Listener::Intercept)
}

fn stop_listener(listener: Listener) {
    match listener {
        Listener::X11(grab) => grab.stop(),
        Listener::Intercept(intercept) => intercept.stop(),
        #[cfg(test)]
        Listener::Inert => {}
    }
}

/// Check if interception is possible (user has input group permissions)
pub fn check_permissions() -> bool {
    std::fs::read_dir(paths::DEV_INPUT).is_ok()
}

/// Print helpful error message if permissions missing
pub fn print_permission_error() {
    error!(path = %paths::DEV_INPUT, "Cannot access input devices");
    error!(group = %permissions::INPUT_GROUP, "Keyboard interception requires group membership");
    error!(command = %permissions::ADD_TO_INPUT_GROUP, "Add user to input group");
    error!("  Then log out and back in");
}
