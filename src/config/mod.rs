//! Configuration management for clipstash
//!
//! Settings are owned here and shared read-mostly with the history store and
//! the hotkey detector through [`SharedSettings`].

pub mod settings;

pub use settings::{HotkeyConfig, Settings};

use std::sync::{Arc, PoisonError, RwLock};

/// Settings handle shared between components
pub type SharedSettings = Arc<RwLock<Settings>>;

pub fn shared(settings: Settings) -> SharedSettings {
    Arc::new(RwLock::new(settings))
}

/// Snapshot of the current settings
pub fn current(settings: &SharedSettings) -> Settings {
    settings.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Apply a change to the shared settings and return the new snapshot
pub fn update(settings: &SharedSettings, apply: impl FnOnce(&mut Settings)) -> Settings {
    let mut guard = settings.write().unwrap_or_else(PoisonError::into_inner);
    apply(&mut guard);
    guard.clone()
}
