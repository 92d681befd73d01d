//! Presentation window control
//!
//! The hotkey toggles a separately running selection UI. The window is
//! located by its `WM_CLASS` and its id is cached until it disappears.

use anyhow::{Context, Result};
use tracing::{debug, info};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::constants::x11;

/// Search depth below the root; window managers reparent clients into frames
const MAX_SEARCH_DEPTH: usize = 3;

pub trait WindowController: Send {
    fn toggle_visibility(&mut self) -> Result<()>;
}

/// What a toggle does given the current window state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    Hide,
    Activate,
    Show,
}

impl ToggleAction {
    pub fn decide(visible: bool, active: bool) -> Self {
        match (visible, active) {
            (true, true) => ToggleAction::Hide,
            (true, false) => ToggleAction::Activate,
            (false, _) => ToggleAction::Show,
        }
    }
}

/// Pre-cached X11 atoms to avoid repeated roundtrips
pub struct CachedAtoms {
    pub net_active_window: Atom,
}

impl CachedAtoms {
    pub fn new(conn: &RustConnection) -> Result<Self> {
        Ok(Self {
            net_active_window: conn
                .intern_atom(false, b"_NET_ACTIVE_WINDOW")
                .context("Failed to intern _NET_ACTIVE_WINDOW atom")?
                .reply()
                .context("Failed to get reply for _NET_ACTIVE_WINDOW atom")?
                .atom,
        })
    }
}

/// Split a `WM_CLASS` value into its instance and class strings
pub fn parse_wm_class(value: &[u8]) -> (String, String) {
    let mut parts = value.split(|&b| b == 0);
    let instance = parts.next().unwrap_or_default();
    let class = parts.next().unwrap_or_default();
    (
        String::from_utf8_lossy(instance).into_owned(),
        String::from_utf8_lossy(class).into_owned(),
    )
}

pub struct X11WindowController {
    conn: RustConnection,
    root: Window,
    atoms: CachedAtoms,
    class: String,
    cached: Option<Window>,
}

impl X11WindowController {
    pub fn connect(class: impl Into<String>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X11 server")?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .context(format!("Screen {screen_num} not found"))?;
        let atoms = CachedAtoms::new(&conn)?;
        let class = class.into();
        info!(class = %class, "Window controller connected");
        Ok(Self {
            conn,
            root,
            atoms,
            class,
            cached: None,
        })
    }

    fn matches_class(&self, window: Window) -> Result<bool> {
        let prop = self
            .conn
            .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 256)
            .context(format!("Failed to query WM_CLASS property for window {}", window))?
            .reply()
            .context(format!("Failed to get WM_CLASS reply for window {}", window))?;
        let (instance, class) = parse_wm_class(&prop.value);
        Ok(instance == self.class || class == self.class)
    }

    fn search(&self, parent: Window, depth: usize) -> Result<Option<Window>> {
        let children = self
            .conn
            .query_tree(parent)
            .context(format!("Failed to query children of window {}", parent))?
            .reply()
            .context(format!("Failed to get children of window {}", parent))?
            .children;

        for &child in &children {
            // Windows can vanish mid-search
            if self.matches_class(child).unwrap_or(false) {
                return Ok(Some(child));
            }
        }
        if depth + 1 < MAX_SEARCH_DEPTH {
            for &child in &children {
                if let Ok(Some(found)) = self.search(child, depth + 1) {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// Cached window id, dropped once the window no longer exists
    fn find_window(&mut self) -> Result<Option<Window>> {
        if let Some(window) = self.cached {
            let alive = self
                .conn
                .get_window_attributes(window)
                .context("Failed to query window attributes")?
                .reply()
                .is_ok();
            if alive {
                return Ok(Some(window));
            }
            debug!(window = window, "Cached presentation window is gone");
            self.cached = None;
        }

        self.cached = self.search(self.root, 0)?;
        if let Some(window) = self.cached {
            debug!(window = window, class = %self.class, "Found presentation window");
        }
        Ok(self.cached)
    }

    fn is_visible(&self, window: Window) -> Result<bool> {
        let attrs = self
            .conn
            .get_window_attributes(window)
            .context(format!("Failed to query attributes of window {}", window))?
            .reply()
            .context(format!("Failed to get attributes of window {}", window))?;
        Ok(attrs.map_state == MapState::VIEWABLE)
    }

    fn is_active(&self, window: Window) -> Result<bool> {
        let prop = self
            .conn
            .get_property(false, self.root, self.atoms.net_active_window, AtomEnum::WINDOW, 0, 1)
            .context("Failed to query _NET_ACTIVE_WINDOW property")?
            .reply()
            .context("Failed to get reply for _NET_ACTIVE_WINDOW query")?;
        Ok(prop.value32().and_then(|mut v| v.next()) == Some(window))
    }

    /// Activate (focus) the window using _NET_ACTIVE_WINDOW
    fn activate(&self, window: Window) -> Result<()> {
        self.conn
            .configure_window(window, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))
            .context(format!("Failed to raise window {} to top of stack", window))?;

        let event = ClientMessageEvent::new(
            32,
            window,
            self.atoms.net_active_window,
            [x11::ACTIVE_WINDOW_SOURCE_PAGER, x11rb::CURRENT_TIME, 0, 0, 0],
        );
        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_NOTIFY | EventMask::SUBSTRUCTURE_REDIRECT,
                event,
            )
            .context(format!("Failed to send _NET_ACTIVE_WINDOW event for window {}", window))?;
        Ok(())
    }
}

impl WindowController for X11WindowController {
    fn toggle_visibility(&mut self) -> Result<()> {
        let Some(window) = self.find_window()? else {
            info!(class = %self.class, "Presentation window not running, nothing to toggle");
            return Ok(());
        };

        let action = ToggleAction::decide(self.is_visible(window)?, self.is_active(window)?);
        match action {
            ToggleAction::Hide => {
                self.conn
                    .unmap_window(window)
                    .context(format!("Failed to unmap window {}", window))?;
            }
            ToggleAction::Activate => self.activate(window)?,
            ToggleAction::Show => {
                self.conn
                    .map_window(window)
                    .context(format!("Failed to map window {}", window))?;
                self.activate(window)?;
            }
        }
        self.conn
            .flush()
            .context("Failed to flush X11 connection after toggle")?;

        info!(window = window, action = ?action, "Toggled presentation window");
        Ok(())
    }
}

/// Stand-in when no display is reachable
pub struct LogOnlyController;

impl WindowController for LogOnlyController {
    fn toggle_visibility(&mut self) -> Result<()> {
        info!("Hotkey activated (no window controller available)");
        Ok(())
    }
}
