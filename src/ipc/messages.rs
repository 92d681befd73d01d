//! IPC message types for client ↔ daemon communication

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::types::{ContentKind, Entry, Group, GroupView, HistoryEvent};

/// Requests sent from a client to the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum HistoryRequest {
    /// Ordered view, optionally restricted to one group
    List { group: Option<String> },

    /// All groups with their member views
    Groups,

    Get(String),

    /// Record content as if it had been copied
    Record { content: String, kind: ContentKind },

    /// Write an entry back to the system clipboard
    Copy(String),

    Pin { id: String, pinned: bool },

    Delete(String),

    Touch(String),

    /// Assign an entry to a group, or ungroup it with `None`
    SetGroup { id: String, group: Option<String> },

    CreateGroup { name: String, color: Option<String> },

    DeleteGroup(String),

    ClearUnpinned,

    GetSettings,

    /// Change the hotkey, e.g. `"alt+c"`
    SetHotkey(String),

    SetDisplayMax(usize),

    /// Turn this connection into a stream of `Event` responses
    Subscribe,

    /// Health check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Responses sent from the daemon to a client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum HistoryResponse {
    Entries(Vec<Entry>),

    Groups(Vec<GroupView>),

    Entry(Option<Entry>),

    Group(Group),

    /// Whether the request changed anything (unknown ids are no-ops)
    Applied(bool),

    Cleared(usize),

    Settings(Settings),

    /// Unsolicited change notification on a subscribed connection
    Event(HistoryEvent),

    /// Health check response
    Pong,

    /// Acknowledgment that request was processed
    Ready,

    /// Error occurred
    Error(String),
}
