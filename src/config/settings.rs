//! Application settings (display cap and hotkey)
//!
//! JSON document stored under the per-user config directory. Loading never
//! fails: a missing or malformed file falls back to defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::constants::{env, history, hotkey, paths};
use crate::hotkeys::{Binding, Modifier, RepeatPolicy};

/// Settings read by the history store and the hotkey detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Cap on unpinned entries per view (pinned entries are never capped)
    #[serde(default = "default_max_items_per_group")]
    pub max_items_per_group: usize,

    #[serde(default)]
    pub hotkey: HotkeyConfig,
}

/// Modifier + letter hotkey; `use_win_key` and `use_alt_key` are mutually exclusive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotkeyConfig {
    #[serde(default = "default_use_win_key")]
    pub use_win_key: bool,
    #[serde(default)]
    pub use_alt_key: bool,
    #[serde(default = "default_key")]
    pub key: char,
    #[serde(default)]
    pub repeat: RepeatPolicy,
}

fn default_max_items_per_group() -> usize {
    history::DEFAULT_DISPLAY_MAX
}

fn default_use_win_key() -> bool {
    true
}

fn default_key() -> char {
    hotkey::DEFAULT_KEY
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_items_per_group: default_max_items_per_group(),
            hotkey: HotkeyConfig::default(),
        }
    }
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            use_win_key: default_use_win_key(),
            use_alt_key: false,
            key: default_key(),
            repeat: RepeatPolicy::default(),
        }
    }
}

impl HotkeyConfig {
    pub fn modifier(&self) -> Modifier {
        if self.use_alt_key && !self.use_win_key {
            Modifier::Alt
        } else {
            Modifier::Win
        }
    }

    /// Select a modifier, keeping the two flags exclusive
    pub fn set_modifier(&mut self, modifier: Modifier) {
        self.use_win_key = modifier == Modifier::Win;
        self.use_alt_key = modifier == Modifier::Alt;
    }

    /// Parse `"alt+c"`, `"Win + V"`, `"super+v"`
    pub fn parse_combo(combo: &str) -> Option<(Modifier, char)> {
        let (modifier, letter) = combo.split_once('+')?;
        let modifier = match modifier.trim().to_ascii_lowercase().as_str() {
            "win" | "super" | "meta" | "logo" => Modifier::Win,
            "alt" => Modifier::Alt,
            _ => return None,
        };
        let mut chars = letter.trim().chars();
        let key = chars.next()?;
        if chars.next().is_some() || !key.is_ascii_alphabetic() {
            return None;
        }
        Some((modifier, key.to_ascii_uppercase()))
    }

    pub fn binding(&self) -> Binding {
        Binding {
            modifier: self.modifier(),
            letter: self.key,
            repeat: self.repeat,
        }
    }
}

impl fmt::Display for HotkeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}", self.modifier(), self.key)
    }
}

impl Settings {
    pub fn path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(paths::APP_DIR);
        path.push(paths::SETTINGS_FILENAME);
        path
    }

    /// Load settings, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        let mut settings = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
                Ok(settings) => {
                    info!(path = %path.display(), "Loaded settings");
                    settings
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to parse settings file, using defaults");
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No settings file found, using defaults");
                Settings::default()
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read settings file, using defaults");
                Settings::default()
            }
        };
        settings.validate_and_clamp();
        settings
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)
            .context("Failed to serialize settings to JSON")?;
        fs::write(path, contents)
            .context(format!("Failed to write settings file to {}", path.display()))?;
        info!(path = %path.display(), "Saved settings");
        Ok(())
    }

    /// Apply environment overrides; `lookup` is `std::env::var` in production
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(env::MAX_ITEMS) {
            match raw.trim().parse::<usize>() {
                Ok(max) => {
                    info!(max_items_per_group = max, "Display maximum overridden from environment");
                    self.max_items_per_group = max;
                }
                Err(e) => warn!(var = env::MAX_ITEMS, value = %raw, error = %e, "Ignoring invalid override"),
            }
        }

        if let Some(raw) = lookup(env::HOTKEY) {
            match HotkeyConfig::parse_combo(&raw) {
                Some((modifier, key)) => {
                    self.hotkey.set_modifier(modifier);
                    self.hotkey.key = key;
                    info!(hotkey = %self.hotkey, "Hotkey overridden from environment");
                }
                None => warn!(var = env::HOTKEY, value = %raw, "Ignoring invalid hotkey override"),
            }
        }

        self.validate_and_clamp();
    }

    /// Set the display maximum, clamped to the valid range
    pub fn set_max_items_per_group(&mut self, max: usize) {
        self.max_items_per_group = max;
        self.validate_and_clamp();
    }

    /// Validate and clamp values to safe ranges
    /// Called after loading JSON or applying overrides
    fn validate_and_clamp(&mut self) {
        if self.max_items_per_group == 0 {
            warn!(max_items_per_group = 0, using = 1, "max_items_per_group below minimum, clamping");
            self.max_items_per_group = 1;
        } else if self.max_items_per_group > history::RETENTION_CEILING {
            warn!(
                max_items_per_group = self.max_items_per_group,
                max = history::RETENTION_CEILING,
                "max_items_per_group exceeds retention ceiling, clamping"
            );
            self.max_items_per_group = history::RETENTION_CEILING;
        }

        let hotkey = &mut self.hotkey;
        if hotkey.use_win_key && hotkey.use_alt_key {
            warn!("Both Win and Alt modifiers set, keeping Win");
            hotkey.use_alt_key = false;
        } else if !hotkey.use_win_key && !hotkey.use_alt_key {
            warn!("No hotkey modifier set, using Win");
            hotkey.use_win_key = true;
        }

        if hotkey.key.is_ascii_alphabetic() {
            hotkey.key = hotkey.key.to_ascii_uppercase();
        } else {
            warn!(key = %hotkey.key, using = %default_key(), "Hotkey key is not a letter, using default");
            hotkey.key = default_key();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_items_per_group, 100);
        assert_eq!(settings.hotkey.modifier(), Modifier::Win);
        assert_eq!(settings.hotkey.key, 'V');
        assert_eq!(settings.hotkey.repeat, RepeatPolicy::Ignore);
    }

    #[test]
    fn test_parses_documented_file_format() {
        let json = r#"{ "maxItemsPerGroup": 25, "hotkey": { "useWinKey": false, "useAltKey": true, "key": "c" } }"#;
        let mut settings: Settings = serde_json::from_str(json).unwrap();
        settings.validate_and_clamp();

        assert_eq!(settings.max_items_per_group, 25);
        assert_eq!(settings.hotkey.modifier(), Modifier::Alt);
        assert_eq!(settings.hotkey.key, 'C');
    }

    #[test]
    fn test_validate_enforces_exclusive_modifiers() {
        let mut settings = Settings::default();
        settings.hotkey.use_win_key = true;
        settings.hotkey.use_alt_key = true;
        settings.validate_and_clamp();
        assert!(settings.hotkey.use_win_key);
        assert!(!settings.hotkey.use_alt_key);

        settings.hotkey.use_win_key = false;
        settings.hotkey.use_alt_key = false;
        settings.validate_and_clamp();
        assert!(settings.hotkey.use_win_key);
    }

    #[test]
    fn test_validate_replaces_non_letter_key() {
        let mut settings = Settings::default();
        settings.hotkey.key = '7';
        settings.validate_and_clamp();
        assert_eq!(settings.hotkey.key, 'V');
    }

    #[test]
    fn test_validate_clamps_display_max() {
        let mut settings = Settings::default();
        settings.max_items_per_group = 0;
        settings.validate_and_clamp();
        assert_eq!(settings.max_items_per_group, 1);

        settings.max_items_per_group = 10_000;
        settings.validate_and_clamp();
        assert_eq!(settings.max_items_per_group, history::RETENTION_CEILING);
    }

    #[test]
    fn test_set_max_items_per_group_clamps() {
        let mut settings = Settings::default();
        settings.set_max_items_per_group(40);
        assert_eq!(settings.max_items_per_group, 40);
        settings.set_max_items_per_group(0);
        assert_eq!(settings.max_items_per_group, 1);
    }

    #[test]
    fn test_set_modifier_keeps_flags_exclusive() {
        let mut config = HotkeyConfig::default();
        config.set_modifier(Modifier::Alt);
        assert!(!config.use_win_key);
        assert!(config.use_alt_key);
        config.set_modifier(Modifier::Win);
        assert!(config.use_win_key);
        assert!(!config.use_alt_key);
    }

    #[test]
    fn test_parse_combo() {
        assert_eq!(HotkeyConfig::parse_combo("alt+c"), Some((Modifier::Alt, 'C')));
        assert_eq!(HotkeyConfig::parse_combo("Win + V"), Some((Modifier::Win, 'V')));
        assert_eq!(HotkeyConfig::parse_combo("super+v"), Some((Modifier::Win, 'V')));
        assert_eq!(HotkeyConfig::parse_combo("ctrl+v"), None);
        assert_eq!(HotkeyConfig::parse_combo("alt+vv"), None);
        assert_eq!(HotkeyConfig::parse_combo("alt+1"), None);
        assert_eq!(HotkeyConfig::parse_combo("v"), None);
    }

    #[test]
    fn test_apply_overrides() {
        let vars = HashMap::from([
            (env::MAX_ITEMS, "42".to_string()),
            (env::HOTKEY, "alt+x".to_string()),
        ]);
        let mut settings = Settings::default();
        settings.apply_overrides(|name| vars.get(name).cloned());

        assert_eq!(settings.max_items_per_group, 42);
        assert_eq!(settings.hotkey.modifier(), Modifier::Alt);
        assert_eq!(settings.hotkey.key, 'X');
    }

    #[test]
    fn test_apply_overrides_ignores_garbage() {
        let vars = HashMap::from([
            (env::MAX_ITEMS, "lots".to_string()),
            (env::HOTKEY, "hyper+x".to_string()),
        ]);
        let mut settings = Settings::default();
        settings.apply_overrides(|name| vars.get(name).cloned());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("missing.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app_settings.json");

        let mut settings = Settings::default();
        settings.max_items_per_group = 30;
        settings.hotkey.set_modifier(Modifier::Alt);
        settings.hotkey.key = 'B';
        settings.hotkey.repeat = RepeatPolicy::Retrigger;
        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn test_display() {
        let mut config = HotkeyConfig::default();
        assert_eq!(config.to_string(), "Win + V");
        config.set_modifier(Modifier::Alt);
        config.key = 'C';
        assert_eq!(config.to_string(), "Alt + C");
    }
}
