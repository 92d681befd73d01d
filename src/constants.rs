//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// History storage limits and defaults
pub mod history {
    /// Hard cap on stored unpinned entries (pinned entries are exempt)
    pub const RETENTION_CEILING: usize = 500;

    /// Default cap on unpinned entries returned per view
    pub const DEFAULT_DISPLAY_MAX: usize = 100;

    /// Color given to groups created without one
    pub const DEFAULT_GROUP_COLOR: &str = "#512BD4";

    /// Capacity of the change-notification broadcast channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// Clipboard polling constants
pub mod clipboard {
    /// Interval between clipboard polls in milliseconds
    pub const POLL_INTERVAL_MS: u64 = 300;
}

/// Hotkey defaults
pub mod hotkey {
    /// Default hotkey letter (paired with the Win modifier)
    pub const DEFAULT_KEY: char = 'V';

    /// Name of the uinput device that re-emits passed-through keys
    pub const VIRTUAL_KEYBOARD_NAME: &str = "clipstash virtual keyboard";
}

/// Input event constants (from evdev)
pub mod input {
    /// Key press event value
    pub const KEY_PRESS: i32 = 1;

    /// Key release event value
    pub const KEY_RELEASE: i32 = 0;

    /// Key repeat event value
    pub const KEY_REPEAT: i32 = 2;
}

/// X11 protocol constants
pub mod x11 {
    /// Source indication for _NET_ACTIVE_WINDOW (2 = pager/direct user action)
    pub const ACTIVE_WINDOW_SOURCE_PAGER: u32 = 2;

    /// Default WM_CLASS of the presentation window toggled by the hotkey
    pub const DEFAULT_WINDOW_CLASS: &str = "clipstash-ui";
}

/// Filesystem paths
pub mod paths {
    /// Directory holding evdev input devices
    pub const DEV_INPUT: &str = "/dev/input";

    /// Application directory name under the XDG base directories
    pub const APP_DIR: &str = "clipstash";

    /// History document file name (under the data dir)
    pub const HISTORY_FILENAME: &str = "clipboard_data.json";

    /// Settings file name (under the config dir)
    pub const SETTINGS_FILENAME: &str = "app_settings.json";

    /// Daemon socket file name (under the runtime dir)
    pub const SOCKET_FILENAME: &str = "daemon.sock";
}

/// Input permission hints
pub mod permissions {
    /// Group granting read access to /dev/input
    pub const INPUT_GROUP: &str = "input";

    /// Command to add the current user to the input group
    pub const ADD_TO_INPUT_GROUP: &str = "sudo usermod -aG input $USER";
}

/// Environment variable names
pub mod env {
    /// Log level for the tracing subscriber
    pub const LOG_LEVEL: &str = "LOG_LEVEL";

    /// Overrides the display maximum
    pub const MAX_ITEMS: &str = "CLIPSTASH_MAX_ITEMS";

    /// Overrides the hotkey, e.g. `alt+c`
    pub const HOTKEY: &str = "CLIPSTASH_HOTKEY";
}
