//! Core history types shared by the store, the clipboard service and IPC

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of payload held by an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Text,
    /// Base64-encoded PNG
    Image,
}

/// One stored clipboard snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub content: String,
    #[serde(rename = "contentType")]
    pub kind: ContentKind,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl Entry {
    pub fn new(content: String, kind: ContentKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            kind,
            created_at: now,
            last_used_at: now,
            is_pinned: false,
            group_id: None,
        }
    }

    /// Short single-line preview for logs and the CLI listing
    pub fn preview(&self, max_chars: usize) -> String {
        match self.kind {
            ContentKind::Image => format!("<image, {} bytes base64>", self.content.len()),
            ContentKind::Text => {
                let flat: String = self
                    .content
                    .chars()
                    .map(|c| if c.is_control() { ' ' } else { c })
                    .collect();
                if flat.chars().count() > max_chars {
                    let truncated: String = flat.chars().take(max_chars).collect();
                    format!("{truncated}…")
                } else {
                    flat
                }
            }
        }
    }
}

/// User-defined bucket entries can be tagged into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: String, color: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            color,
            created_at: Utc::now(),
        }
    }
}

/// A group together with its (capped) member view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupView {
    pub group: Group,
    /// Total number of stored members, before the display cap
    pub item_count: usize,
    pub items: Vec<Entry>,
}

/// Whole persisted history document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryData {
    #[serde(default)]
    pub items: Vec<Entry>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

/// Change notifications broadcast by the history store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEvent {
    /// A new entry was recorded at the front of the history
    Recorded(Entry),

    /// Pin, group or last-used state of an entry changed
    Updated(Entry),

    /// Entry deleted by id
    Removed(String),

    /// Unpinned entries cleared in bulk
    Cleared { removed: usize },

    GroupCreated(Group),

    GroupRemoved(String),
}
