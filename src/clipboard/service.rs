//! Clipboard history service
//!
//! Connects the watcher to the history store and writes chosen entries back
//! to the system clipboard without recording them a second time.

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::image::{decode_base64_png, encode_base64_png};
use super::watcher::{ClipboardChange, ClipboardWatcher, WatcherState};
use super::{ClipboardContent, ClipboardError, Fingerprint, SharedBackend};
use crate::history::HistoryStore;
use crate::types::{ContentKind, Entry};

/// Single-slot echo suppression
///
/// Armed with the fingerprint of content we are about to write. The next
/// observed change always clears the slot and is dropped only if it matches.
#[derive(Default)]
struct EchoSlot {
    armed: Mutex<Option<Fingerprint>>,
}

impl EchoSlot {
    fn arm(&self, fingerprint: Fingerprint) {
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some(fingerprint);
    }

    fn disarm(&self) {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// True when `fingerprint` is the echo of our own write
    fn consume(&self, fingerprint: &Fingerprint) -> bool {
        let armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner).take();
        armed.as_ref() == Some(fingerprint)
    }
}

struct Monitor {
    watcher: ClipboardWatcher,
    consumer: Option<JoinHandle<()>>,
}

pub struct ClipboardService {
    store: Arc<HistoryStore>,
    backend: SharedBackend,
    echo: Arc<EchoSlot>,
    monitor: tokio::sync::Mutex<Monitor>,
}

impl ClipboardService {
    pub fn new(store: Arc<HistoryStore>, backend: SharedBackend, poll_interval: Duration) -> Self {
        let watcher = ClipboardWatcher::new(backend.clone(), poll_interval);
        Self {
            store,
            backend,
            echo: Arc::new(EchoSlot::default()),
            monitor: tokio::sync::Mutex::new(Monitor {
                watcher,
                consumer: None,
            }),
        }
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    /// Start the watcher and the task recording its changes
    pub async fn start_monitoring(&self) -> Result<(), ClipboardError> {
        let mut monitor = self.monitor.lock().await;
        if monitor.watcher.state() == WatcherState::Watching {
            debug!("Clipboard monitoring already running");
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ClipboardChange>();
        monitor.watcher.start(tx).await?;

        let store = self.store.clone();
        let echo = self.echo.clone();
        monitor.consumer = Some(tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                handle_change(&store, &echo, change);
            }
            debug!("Clipboard change consumer finished");
        }));

        info!("Clipboard monitoring started");
        Ok(())
    }

    /// Stop the watcher and wait for pending changes to be recorded
    pub async fn stop_monitoring(&self) {
        let mut monitor = self.monitor.lock().await;
        let Some(consumer) = monitor.consumer.take() else {
            return;
        };

        monitor.watcher.stop().await;
        // The channel closes once the poll loop is gone
        if let Err(e) = consumer.await {
            warn!(error = %e, "Clipboard consumer ended abnormally");
        }
        info!("Clipboard monitoring stopped");
    }

    /// Put an entry back on the system clipboard and mark it used
    pub fn write_to_system_clipboard(&self, entry: &Entry) -> Result<()> {
        let content = match entry.kind {
            ContentKind::Text => ClipboardContent::Text(entry.content.clone()),
            ContentKind::Image => ClipboardContent::Image(
                decode_base64_png(&entry.content)
                    .context(format!("Entry {} holds an unreadable image", entry.id))?,
            ),
        };

        self.echo.arm(content.fingerprint());
        let written = self
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(&content);
        if let Err(e) = written {
            self.echo.disarm();
            return Err(e).context(format!("Failed to copy entry {} to the clipboard", entry.id));
        }

        self.store.touch(&entry.id);
        info!(id = %entry.id, kind = ?entry.kind, "Copied entry to system clipboard");
        Ok(())
    }

    /// Copy a stored entry by id; `false` when the id is unknown
    pub fn copy_entry(&self, id: &str) -> Result<bool> {
        let Some(entry) = self.store.get_entry(id) else {
            debug!(id = %id, "Copy of unknown entry, ignoring");
            return Ok(false);
        };
        self.write_to_system_clipboard(&entry)?;
        Ok(true)
    }
}

fn handle_change(store: &HistoryStore, echo: &EchoSlot, change: ClipboardChange) {
    if echo.consume(&change.fingerprint) {
        debug!("Ignoring clipboard change caused by our own write");
        return;
    }

    match change.content {
        ClipboardContent::Empty => debug!("Clipboard emptied, nothing to record"),
        ClipboardContent::Text(text) => {
            store.record_new_content(text, ContentKind::Text);
        }
        ClipboardContent::Image(image) => match encode_base64_png(&image) {
            Ok(payload) => {
                store.record_new_content(payload, ContentKind::Image);
            }
            Err(e) => warn!(error = %e, width = image.width, height = image.height, "Dropping unencodable image"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::memory::MemoryBackend;
    use crate::clipboard::{RgbaImage, shared_backend};
    use crate::config::{self, Settings};
    use tokio::time;

    const TICK: Duration = Duration::from_millis(10);

    fn service(memory: &MemoryBackend) -> ClipboardService {
        let store = Arc::new(HistoryStore::in_memory(config::shared(Settings::default())));
        ClipboardService::new(store, shared_backend(memory.clone()), TICK)
    }

    fn change(content: ClipboardContent) -> ClipboardChange {
        ClipboardChange { fingerprint: content.fingerprint(), content }
    }

    async fn wait_for_entries(store: &HistoryStore, count: usize) -> Vec<Entry> {
        for _ in 0..200 {
            let entries = store.list_entries(None);
            if entries.len() >= count {
                return entries;
            }
            time::sleep(TICK).await;
        }
        store.list_entries(None)
    }

    #[test]
    fn test_handle_change_records_text() {
        let memory = MemoryBackend::default();
        let service = service(&memory);
        handle_change(&service.store, &service.echo, change(ClipboardContent::Text("hi".to_string())));

        let entries = service.store.list_entries(None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "hi");
        assert_eq!(entries[0].kind, ContentKind::Text);
    }

    #[test]
    fn test_handle_change_drops_empty() {
        let memory = MemoryBackend::default();
        let service = service(&memory);
        handle_change(&service.store, &service.echo, change(ClipboardContent::Empty));
        handle_change(&service.store, &service.echo, change(ClipboardContent::Text(String::new())));
        assert!(service.store.list_entries(None).is_empty());
    }

    #[test]
    fn test_handle_change_encodes_images() {
        let memory = MemoryBackend::default();
        let service = service(&memory);
        let image = RgbaImage { width: 1, height: 1, bytes: vec![1, 2, 3, 4] };
        handle_change(&service.store, &service.echo, change(ClipboardContent::Image(image.clone())));

        let entries = service.store.list_entries(None);
        assert_eq!(entries[0].kind, ContentKind::Image);
        assert_eq!(decode_base64_png(&entries[0].content).unwrap(), image);
    }

    #[test]
    fn test_write_back_echo_is_suppressed() {
        let memory = MemoryBackend::default();
        let service = service(&memory);
        let entry = service
            .store
            .record_new_content("pasted".to_string(), ContentKind::Text)
            .unwrap();
        service.store.record_new_content("newer".to_string(), ContentKind::Text);

        service.write_to_system_clipboard(&entry).unwrap();
        assert_eq!(memory.state.lock().unwrap().writes, 1);

        handle_change(&service.store, &service.echo, change(ClipboardContent::Text("pasted".to_string())));
        assert_eq!(service.store.list_entries(None).len(), 2);
        // Touch moved it to the top of the view
        assert_eq!(service.store.list_entries(None)[0].id, entry.id);
    }

    #[test]
    fn test_mismatched_change_after_write_is_recorded() {
        let memory = MemoryBackend::default();
        let service = service(&memory);
        let entry = service
            .store
            .record_new_content("pasted".to_string(), ContentKind::Text)
            .unwrap();

        service.write_to_system_clipboard(&entry).unwrap();
        handle_change(&service.store, &service.echo, change(ClipboardContent::Text("user copy".to_string())));
        assert_eq!(service.store.list_entries(None)[0].content, "user copy");

        // The slot is single-use
        handle_change(&service.store, &service.echo, change(ClipboardContent::Text("pasted".to_string())));
        let entries = service.store.list_entries(None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "pasted");
    }

    #[test]
    fn test_failed_write_disarms_slot() {
        let memory = MemoryBackend::default();
        memory.state.lock().unwrap().fail_writes = true;
        let service = service(&memory);
        let entry = service
            .store
            .record_new_content("x".to_string(), ContentKind::Text)
            .unwrap();

        assert!(service.write_to_system_clipboard(&entry).is_err());
        assert!(!service.echo.consume(&ClipboardContent::Text("x".to_string()).fingerprint()));
    }

    #[test]
    fn test_copy_unknown_entry() {
        let memory = MemoryBackend::default();
        let service = service(&memory);
        assert!(!service.copy_entry("missing").unwrap());
        assert_eq!(memory.state.lock().unwrap().writes, 0);
    }

    #[tokio::test]
    async fn test_monitoring_records_changes_and_skips_echo() {
        let memory = MemoryBackend::default();
        let service = service(&memory);
        service.start_monitoring().await.unwrap();

        memory.set_text("first");
        let entries = wait_for_entries(&service.store, 1).await;
        assert_eq!(entries[0].content, "first");

        memory.set_text("second");
        let entries = wait_for_entries(&service.store, 2).await;
        assert_eq!(entries.len(), 2);

        let first = entries.iter().find(|e| e.content == "first").unwrap().clone();
        service.write_to_system_clipboard(&first).unwrap();
        time::sleep(TICK * 10).await;

        let entries = service.store.list_entries(None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first.id);

        service.stop_monitoring().await;
    }

    #[tokio::test]
    async fn test_stop_then_start_monitoring() {
        let memory = MemoryBackend::default();
        let service = service(&memory);
        service.stop_monitoring().await;

        service.start_monitoring().await.unwrap();
        service.stop_monitoring().await;

        memory.set_text("ignored while stopped");
        time::sleep(TICK * 5).await;
        assert!(service.store.list_entries(None).is_empty());

        service.start_monitoring().await.unwrap();
        memory.set_text("seen");
        let entries = wait_for_entries(&service.store, 1).await;
        assert_eq!(entries[0].content, "seen");
        service.stop_monitoring().await;
    }
}
