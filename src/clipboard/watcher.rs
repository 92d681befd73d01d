//! Clipboard change detection
//!
//! arboard exposes no change notification on X11, so the watcher polls on a
//! fixed interval and compares content fingerprints. One poll runs at a time:
//! a tick that finds the previous read still in flight is skipped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ClipboardContent, ClipboardError, Fingerprint, SharedBackend};

/// One observed clipboard content change
#[derive(Debug, Clone)]
pub struct ClipboardChange {
    pub content: ClipboardContent,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Uninitialized,
    Watching,
    Stopped,
}

struct PollState {
    last: Option<Fingerprint>,
}

struct Running {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct ClipboardWatcher {
    backend: SharedBackend,
    interval: Duration,
    state: WatcherState,
    running: Option<Running>,
}

impl ClipboardWatcher {
    pub fn new(backend: SharedBackend, interval: Duration) -> Self {
        Self {
            backend,
            interval,
            state: WatcherState::Uninitialized,
            running: None,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Read a baseline and start polling; changes are sent to `tx`
    ///
    /// The baseline itself is never reported. Fails only when the backend is
    /// unavailable; calling it while already watching is a no-op.
    pub async fn start(&mut self, tx: mpsc::UnboundedSender<ClipboardChange>) -> Result<(), ClipboardError> {
        if self.state == WatcherState::Watching {
            debug!("Watcher already running");
            return Ok(());
        }

        let baseline = match read_blocking(self.backend.clone()).await {
            Ok(content) => Some(content.fingerprint()),
            Err(e @ ClipboardError::Unavailable(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Failed to read clipboard baseline, first change will be reported");
                None
            }
        };

        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(
            self.backend.clone(),
            self.interval,
            baseline,
            tx,
            cancel_rx,
        ));

        self.running = Some(Running { cancel, task });
        self.state = WatcherState::Watching;
        info!(interval_ms = self.interval.as_millis() as u64, "Clipboard watcher started");
        Ok(())
    }

    /// Cancel polling and wait for the loop and any in-flight read to finish
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.cancel.send(true);
        if let Err(e) = running.task.await {
            warn!(error = %e, "Clipboard poll task ended abnormally");
        }

        self.state = WatcherState::Stopped;
        info!("Clipboard watcher stopped");
    }
}

async fn read_blocking(backend: SharedBackend) -> Result<ClipboardContent, ClipboardError> {
    tokio::task::spawn_blocking(move || {
        let mut backend = backend
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        backend.read()
    })
    .await
    .map_err(|e| ClipboardError::Read(format!("read task failed: {e}")))?
}

async fn poll_loop(
    backend: SharedBackend,
    interval: Duration,
    baseline: Option<Fingerprint>,
    tx: mpsc::UnboundedSender<ClipboardChange>,
    mut cancel: watch::Receiver<bool>,
) {
    let state = Arc::new(Mutex::new(PollState { last: baseline }));
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately; the baseline already covers it
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.changed() => break,
            _ = ticker.tick() => {}
        }

        let Ok(guard) = state.clone().try_lock_owned() else {
            debug!("Previous clipboard poll still running, skipping tick");
            continue;
        };

        let backend = backend.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut guard = guard;
            let content = match read_blocking(backend).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(error = %e, "Clipboard read failed, skipping poll");
                    return;
                }
            };

            let fingerprint = content.fingerprint();
            if guard.last == Some(fingerprint) {
                return;
            }
            guard.last = Some(fingerprint);

            if *cancel.borrow() {
                return;
            }
            debug!(kind = ?content.kind(), "Clipboard content changed");
            if tx.send(ClipboardChange { content, fingerprint }).is_err() {
                debug!("Change receiver dropped");
            }
        });
    }

    // Wait for an in-flight poll so nothing is sent after stop returns
    let _ = state.lock().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::memory::MemoryBackend;
    use crate::clipboard::{ClipboardBackend, shared_backend};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TICK: Duration = Duration::from_millis(10);

    async fn next_change(rx: &mut mpsc::UnboundedReceiver<ClipboardChange>) -> ClipboardChange {
        time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for change")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_baseline_is_not_reported() {
        let memory = MemoryBackend::default();
        memory.set_text("already there");
        let mut watcher = ClipboardWatcher::new(shared_backend(memory.clone()), TICK);
        let (tx, mut rx) = mpsc::unbounded_channel();

        watcher.start(tx).await.unwrap();
        time::sleep(TICK * 5).await;
        assert!(rx.try_recv().is_err());

        memory.set_text("new");
        let change = next_change(&mut rx).await;
        assert_eq!(change.content, ClipboardContent::Text("new".to_string()));

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_one_change_per_content_change() {
        let memory = MemoryBackend::default();
        let mut watcher = ClipboardWatcher::new(shared_backend(memory.clone()), TICK);
        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.start(tx).await.unwrap();

        memory.set_text("a");
        assert_eq!(next_change(&mut rx).await.content, ClipboardContent::Text("a".to_string()));
        time::sleep(TICK * 5).await;
        assert!(rx.try_recv().is_err(), "unchanged content must not be reported again");

        memory.set_text("b");
        assert_eq!(next_change(&mut rx).await.content, ClipboardContent::Text("b".to_string()));

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_stop_and_restart() {
        let memory = MemoryBackend::default();
        let mut watcher = ClipboardWatcher::new(shared_backend(memory.clone()), TICK);
        assert_eq!(watcher.state(), WatcherState::Uninitialized);

        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.start(tx).await.unwrap();
        assert_eq!(watcher.state(), WatcherState::Watching);
        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);

        memory.set_text("while stopped");
        time::sleep(TICK * 5).await;
        assert!(rx.try_recv().is_err());

        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.start(tx).await.unwrap();
        memory.set_text("after restart");
        assert_eq!(
            next_change(&mut rx).await.content,
            ClipboardContent::Text("after restart".to_string())
        );
        watcher.stop().await;
    }

    /// Backend whose reads take `delay`, each returning new content
    #[derive(Clone)]
    struct SlowBackend {
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
    }

    impl ClipboardBackend for SlowBackend {
        fn read(&mut self) -> Result<ClipboardContent, ClipboardError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(ClipboardContent::Text(format!("read {n}")))
        }

        fn write(&mut self, _content: &ClipboardContent) -> Result<(), ClipboardError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_reads_skip_ticks_instead_of_overlapping() {
        let slow = SlowBackend {
            delay: Duration::from_millis(50),
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
            reads: Arc::default(),
        };
        let tick = Duration::from_millis(5);
        let mut watcher = ClipboardWatcher::new(shared_backend(slow.clone()), tick);
        let (tx, mut rx) = mpsc::unbounded_channel();

        watcher.start(tx).await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        watcher.stop().await;

        let reads = slow.reads.load(Ordering::SeqCst);
        assert_eq!(slow.max_in_flight.load(Ordering::SeqCst), 1);
        // ~100 ticks elapsed; only one read per 50 ms can have run
        assert!(reads >= 3, "poll loop stalled: {reads} reads");
        assert!(reads <= 14, "ticks were queued: {reads} reads");

        // Nothing left over runs after stop
        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(slow.reads.load(Ordering::SeqCst), reads);

        let mut changes = 0;
        while rx.try_recv().is_ok() {
            changes += 1;
        }
        assert!(changes < reads, "baseline read must not be reported");
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut watcher = ClipboardWatcher::new(shared_backend(MemoryBackend::default()), TICK);
        watcher.stop().await;
        assert_eq!(watcher.state(), WatcherState::Uninitialized);
    }

    #[tokio::test]
    async fn test_transient_read_failures_are_skipped() {
        let memory = MemoryBackend::default();
        let mut watcher = ClipboardWatcher::new(shared_backend(memory.clone()), TICK);
        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.start(tx).await.unwrap();

        memory.state.lock().unwrap().fail_reads = true;
        time::sleep(TICK * 5).await;
        {
            let mut state = memory.state.lock().unwrap();
            state.fail_reads = false;
            state.content = Some(ClipboardContent::Text("recovered".to_string()));
        }
        assert_eq!(
            next_change(&mut rx).await.content,
            ClipboardContent::Text("recovered".to_string())
        );
        watcher.stop().await;
    }
}
