//! Clipboard history store
//!
//! Owns the ordered entry list and the groups. Every public operation takes
//! the same lock for its whole read-modify-evict-persist cycle, so no caller
//! ever observes a partially applied mutation. Unknown ids are no-ops.

pub mod persistence;

use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{self, SharedSettings};
use crate::constants::history::{DEFAULT_GROUP_COLOR, EVENT_CHANNEL_CAPACITY, RETENTION_CEILING};
use crate::types::{ContentKind, Entry, Group, GroupView, HistoryData, HistoryEvent};

pub struct HistoryStore {
    data: Mutex<HistoryData>,
    /// `None` keeps the history in memory only
    path: Option<PathBuf>,
    settings: SharedSettings,
    events: broadcast::Sender<HistoryEvent>,
}

impl HistoryStore {
    /// Open the store backed by `path`, loading it if present
    pub fn open(path: PathBuf, settings: SharedSettings) -> Self {
        let data = persistence::load(&path);
        Self::with_data(data, Some(path), settings)
    }

    #[cfg(test)]
    pub fn in_memory(settings: SharedSettings) -> Self {
        Self::with_data(HistoryData::default(), None, settings)
    }

    fn with_data(data: HistoryData, path: Option<PathBuf>, settings: SharedSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            data: Mutex::new(data),
            path,
            settings,
            events,
        }
    }

    /// Receive change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, HistoryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist under the caller's lock; failures are logged and skipped
    fn persist(&self, data: &HistoryData) {
        if let Some(path) = &self.path {
            if let Err(e) = persistence::save(path, data) {
                error!(path = %path.display(), error = ?e, "Failed to save clipboard history");
            }
        }
    }

    fn notify(&self, event: HistoryEvent) {
        // Err only means nobody is subscribed
        let _ = self.events.send(event);
    }

    /// Record freshly observed clipboard content at the front of the history
    ///
    /// A byte-identical unpinned entry is removed first, so repeating a copy
    /// moves it to the front instead of duplicating it. Pinned duplicates are
    /// left alone. Unpinned entries beyond the retention ceiling are evicted
    /// from the tail. Empty content is dropped and yields `None`.
    pub fn record_new_content(&self, content: String, kind: ContentKind) -> Option<Entry> {
        if content.is_empty() {
            debug!(kind = ?kind, "Dropping empty clipboard content");
            return None;
        }

        let mut data = self.lock();

        if let Some(pos) = data
            .items
            .iter()
            .position(|e| !e.is_pinned && e.content == content)
        {
            let previous = data.items.remove(pos);
            debug!(id = %previous.id, position = pos, "Repeated content, replacing previous entry");
        }

        let entry = Entry::new(content, kind);
        data.items.insert(0, entry.clone());

        let evicted = evict_overflow(&mut data.items);
        if evicted > 0 {
            debug!(evicted = evicted, ceiling = RETENTION_CEILING, "Evicted oldest unpinned entries");
        }

        self.persist(&data);
        self.notify(HistoryEvent::Recorded(entry.clone()));
        info!(id = %entry.id, kind = ?entry.kind, total = data.items.len(), "Recorded clipboard entry");
        Some(entry)
    }

    /// Entries ordered pinned-first, then most recently used first
    ///
    /// `group` restricts the view to one group's members. The unpinned part is
    /// capped to the configured display maximum; pinned entries never are.
    pub fn list_entries(&self, group: Option<&str>) -> Vec<Entry> {
        let max_unpinned = config::current(&self.settings).max_items_per_group;
        let data = self.lock();
        ordered_view(
            data.items
                .iter()
                .filter(|e| group.is_none_or(|g| e.group_id.as_deref() == Some(g))),
            max_unpinned,
        )
    }

    /// Groups in creation order, each with its capped member view
    pub fn list_groups(&self) -> Vec<GroupView> {
        let max_unpinned = config::current(&self.settings).max_items_per_group;
        let data = self.lock();
        data.groups
            .iter()
            .map(|group| {
                let members = data
                    .items
                    .iter()
                    .filter(|e| e.group_id.as_deref() == Some(group.id.as_str()));
                let item_count = members.clone().count();
                GroupView {
                    group: group.clone(),
                    item_count,
                    items: ordered_view(members, max_unpinned),
                }
            })
            .collect()
    }

    pub fn get_entry(&self, id: &str) -> Option<Entry> {
        self.lock().items.iter().find(|e| e.id == id).cloned()
    }

    pub fn pin(&self, id: &str, pinned: bool) -> bool {
        self.modify_entry(id, |entry| entry.is_pinned = pinned)
    }

    /// Refresh the last-used timestamp
    pub fn touch(&self, id: &str) -> bool {
        self.modify_entry(id, |entry| entry.last_used_at = Utc::now())
    }

    /// Move an entry into `group_id`, or out of any group with `None`
    pub fn set_group(&self, id: &str, group_id: Option<&str>) -> bool {
        let mut data = self.lock();

        if let Some(group_id) = group_id {
            if !data.groups.iter().any(|g| g.id == group_id) {
                warn!(id = %id, group_id = %group_id, "Ignoring assignment to unknown group");
                return false;
            }
        }

        let Some(entry) = data.items.iter_mut().find(|e| e.id == id) else {
            debug!(id = %id, "set_group on unknown entry, ignoring");
            return false;
        };
        entry.group_id = group_id.map(str::to_string);
        let updated = entry.clone();

        self.persist(&data);
        self.notify(HistoryEvent::Updated(updated));
        true
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut data = self.lock();
        let Some(pos) = data.items.iter().position(|e| e.id == id) else {
            debug!(id = %id, "delete on unknown entry, ignoring");
            return false;
        };
        data.items.remove(pos);

        self.persist(&data);
        self.notify(HistoryEvent::Removed(id.to_string()));
        info!(id = %id, "Deleted clipboard entry");
        true
    }

    /// Delete every unpinned entry, returning how many were removed
    pub fn clear_unpinned(&self) -> usize {
        let mut data = self.lock();
        let before = data.items.len();
        data.items.retain(|e| e.is_pinned);
        let removed = before - data.items.len();

        if removed > 0 {
            self.persist(&data);
        }
        self.notify(HistoryEvent::Cleared { removed });
        info!(removed = removed, "Cleared unpinned clipboard entries");
        removed
    }

    pub fn create_group(&self, name: &str, color: Option<&str>) -> Group {
        let group = Group::new(
            name.to_string(),
            Some(color.unwrap_or(DEFAULT_GROUP_COLOR).to_string()),
        );

        let mut data = self.lock();
        data.groups.push(group.clone());

        self.persist(&data);
        self.notify(HistoryEvent::GroupCreated(group.clone()));
        info!(id = %group.id, name = %group.name, "Created group");
        group
    }

    /// Remove a group; its members become ungrouped, never deleted
    pub fn delete_group(&self, group_id: &str) -> bool {
        let mut data = self.lock();
        let Some(pos) = data.groups.iter().position(|g| g.id == group_id) else {
            debug!(group_id = %group_id, "delete_group on unknown group, ignoring");
            return false;
        };

        let mut ungrouped = 0;
        for entry in data
            .items
            .iter_mut()
            .filter(|e| e.group_id.as_deref() == Some(group_id))
        {
            entry.group_id = None;
            ungrouped += 1;
        }
        data.groups.remove(pos);

        self.persist(&data);
        self.notify(HistoryEvent::GroupRemoved(group_id.to_string()));
        info!(group_id = %group_id, ungrouped = ungrouped, "Deleted group");
        true
    }

    fn modify_entry(&self, id: &str, apply: impl FnOnce(&mut Entry)) -> bool {
        let mut data = self.lock();
        let Some(entry) = data.items.iter_mut().find(|e| e.id == id) else {
            debug!(id = %id, "Update on unknown entry, ignoring");
            return false;
        };
        apply(entry);
        let updated = entry.clone();

        self.persist(&data);
        self.notify(HistoryEvent::Updated(updated));
        true
    }

    #[cfg(test)]
    fn snapshot(&self) -> HistoryData {
        self.lock().clone()
    }
}

/// Keep the newest `RETENTION_CEILING` unpinned entries; pinned ones always stay
fn evict_overflow(items: &mut Vec<Entry>) -> usize {
    let before = items.len();
    let mut unpinned = 0;
    items.retain(|e| {
        if e.is_pinned {
            return true;
        }
        unpinned += 1;
        unpinned <= RETENTION_CEILING
    });
    before - items.len()
}

fn ordered_view<'a>(entries: impl Iterator<Item = &'a Entry>, max_unpinned: usize) -> Vec<Entry> {
    let mut sorted: Vec<&Entry> = entries.collect();
    // Stable sort: ties keep storage order, which is newest first
    sorted.sort_by(|a, b| {
        b.is_pinned
            .cmp(&a.is_pinned)
            .then_with(|| b.last_used_at.cmp(&a.last_used_at))
    });

    let mut unpinned = 0;
    sorted
        .into_iter()
        .filter(|e| {
            if e.is_pinned {
                return true;
            }
            unpinned += 1;
            unpinned <= max_unpinned
        })
        .cloned()
        .collect()
}
