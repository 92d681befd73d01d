//! IPC request handling for the daemon

use anyhow::{Context, Result};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::{HistoryRequest, HistoryResponse, read_message, write_message};
use crate::clipboard::ClipboardService;
use crate::config::{self, HotkeyConfig, SharedSettings};
use crate::hotkeys::Binding;

/// Work that must happen on the daemon's main loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCommand {
    HotkeyChanged(Binding),
    Shutdown,
}

/// Everything a request handler may touch
pub struct IpcContext {
    pub service: Arc<ClipboardService>,
    pub settings: SharedSettings,
    pub settings_path: PathBuf,
    pub control: UnboundedSender<DaemonCommand>,
}

/// Spawn IPC listener thread; every client gets its own thread
pub fn spawn_ipc_listener(listener: UnixListener, ctx: Arc<IpcContext>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        info!("IPC listener started");
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let ctx = ctx.clone();
                    std::thread::spawn(move || {
                        debug!("Client connected");
                        if let Err(e) = handle_client(stream, &ctx) {
                            debug!(error = ?e, "IPC connection closed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = ?e, "Failed to accept IPC connection");
                    break;
                }
            }
        }
    })
}

fn handle_client(mut stream: UnixStream, ctx: &IpcContext) -> Result<()> {
    loop {
        let request: HistoryRequest = read_message(&mut stream)?;
        debug!(request = ?request, "Received IPC request");

        if request == HistoryRequest::Subscribe {
            return stream_events(stream, ctx);
        }

        let shutdown = request == HistoryRequest::Shutdown;
        let response = handle_request(ctx, request);
        write_message(&mut stream, &response)?;
        if shutdown {
            return Ok(());
        }
    }
}

/// Forward store notifications until the client goes away
fn stream_events(mut stream: UnixStream, ctx: &IpcContext) -> Result<()> {
    let mut events = ctx.service.store().subscribe();
    write_message(&mut stream, &HistoryResponse::Ready)?;
    info!("Client subscribed to history events");

    loop {
        match events.blocking_recv() {
            Ok(event) => write_message(&mut stream, &HistoryResponse::Event(event))
                .context("Subscriber disconnected")?,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Subscriber fell behind, events dropped");
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

pub fn handle_request(ctx: &IpcContext, request: HistoryRequest) -> HistoryResponse {
    let store = ctx.service.store();
    match request {
        HistoryRequest::List { group } => HistoryResponse::Entries(store.list_entries(group.as_deref())),
        HistoryRequest::Groups => HistoryResponse::Groups(store.list_groups()),
        HistoryRequest::Get(id) => HistoryResponse::Entry(store.get_entry(&id)),
        HistoryRequest::Record { content, kind } => {
            HistoryResponse::Entry(store.record_new_content(content, kind))
        }
        HistoryRequest::Copy(id) => match ctx.service.copy_entry(&id) {
            Ok(applied) => HistoryResponse::Applied(applied),
            Err(e) => {
                error!(id = %id, error = ?e, "Copy failed");
                HistoryResponse::Error(format!("{e:#}"))
            }
        },
        HistoryRequest::Pin { id, pinned } => HistoryResponse::Applied(store.pin(&id, pinned)),
        HistoryRequest::Delete(id) => HistoryResponse::Applied(store.delete(&id)),
        HistoryRequest::Touch(id) => HistoryResponse::Applied(store.touch(&id)),
        HistoryRequest::SetGroup { id, group } => {
            HistoryResponse::Applied(store.set_group(&id, group.as_deref()))
        }
        HistoryRequest::CreateGroup { name, color } => {
            HistoryResponse::Group(store.create_group(&name, color.as_deref()))
        }
        HistoryRequest::DeleteGroup(id) => HistoryResponse::Applied(store.delete_group(&id)),
        HistoryRequest::ClearUnpinned => HistoryResponse::Cleared(store.clear_unpinned()),
        HistoryRequest::GetSettings => HistoryResponse::Settings(config::current(&ctx.settings)),
        HistoryRequest::SetHotkey(combo) => {
            let Some((modifier, key)) = HotkeyConfig::parse_combo(&combo) else {
                return HistoryResponse::Error(format!("Invalid hotkey '{combo}', expected e.g. 'win+v' or 'alt+c'"));
            };
            let settings = config::update(&ctx.settings, |s| {
                s.hotkey.set_modifier(modifier);
                s.hotkey.key = key;
            });
            save_settings(ctx, &settings);
            if ctx
                .control
                .send(DaemonCommand::HotkeyChanged(settings.hotkey.binding()))
                .is_err()
            {
                warn!("Daemon loop is gone, hotkey change not applied");
            }
            HistoryResponse::Settings(settings)
        }
        HistoryRequest::SetDisplayMax(max) => {
            let settings = config::update(&ctx.settings, |s| s.set_max_items_per_group(max));
            save_settings(ctx, &settings);
            HistoryResponse::Settings(settings)
        }
        HistoryRequest::Ping => HistoryResponse::Pong,
        HistoryRequest::Shutdown => {
            info!("Received shutdown request via IPC");
            let _ = ctx.control.send(DaemonCommand::Shutdown);
            HistoryResponse::Ready
        }
        HistoryRequest::Subscribe => {
            HistoryResponse::Error("Subscribe is only valid as a connection's first request".to_string())
        }
    }
}

fn save_settings(ctx: &IpcContext, settings: &config::Settings) {
    if let Err(e) = settings.save_to(&ctx.settings_path) {
        error!(path = %ctx.settings_path.display(), error = ?e, "Failed to save settings");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::memory::MemoryBackend;
    use crate::clipboard::shared_backend;
    use crate::config::Settings;
    use crate::history::HistoryStore;
    use crate::hotkeys::Modifier;
    use crate::types::{ContentKind, HistoryEvent};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        ctx: IpcContext,
        control: mpsc::UnboundedReceiver<DaemonCommand>,
        memory: MemoryBackend,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = config::shared(Settings::default());
        let store = Arc::new(HistoryStore::in_memory(settings.clone()));
        let memory = MemoryBackend::default();
        let service = Arc::new(ClipboardService::new(
            store,
            shared_backend(memory.clone()),
            Duration::from_millis(10),
        ));
        let (control_tx, control) = mpsc::unbounded_channel();
        Fixture {
            ctx: IpcContext {
                service,
                settings,
                settings_path: dir.path().join("app_settings.json"),
                control: control_tx,
            },
            control,
            memory,
            _dir: dir,
        }
    }

    fn record(ctx: &IpcContext, text: &str) -> String {
        match handle_request(
            ctx,
            HistoryRequest::Record {
                content: text.to_string(),
                kind: ContentKind::Text,
            },
        ) {
            HistoryResponse::Entry(Some(entry)) => entry.id,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_record_pin_and_list() {
        let f = fixture();
        let a = record(&f.ctx, "a");
        record(&f.ctx, "b");

        assert_eq!(
            handle_request(&f.ctx, HistoryRequest::Pin { id: a.clone(), pinned: true }),
            HistoryResponse::Applied(true)
        );
        match handle_request(&f.ctx, HistoryRequest::List { group: None }) {
            HistoryResponse::Entries(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].id, a);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_ids_report_not_applied() {
        let f = fixture();
        assert_eq!(
            handle_request(&f.ctx, HistoryRequest::Delete("nope".to_string())),
            HistoryResponse::Applied(false)
        );
        assert_eq!(
            handle_request(&f.ctx, HistoryRequest::Copy("nope".to_string())),
            HistoryResponse::Applied(false)
        );
    }

    #[test]
    fn test_copy_writes_clipboard() {
        let f = fixture();
        let id = record(&f.ctx, "to paste");
        assert_eq!(handle_request(&f.ctx, HistoryRequest::Copy(id)), HistoryResponse::Applied(true));
        assert_eq!(f.memory.state.lock().unwrap().writes, 1);
    }

    #[test]
    fn test_set_hotkey_updates_saves_and_notifies() {
        let mut f = fixture();
        match handle_request(&f.ctx, HistoryRequest::SetHotkey("alt+c".to_string())) {
            HistoryResponse::Settings(settings) => {
                assert_eq!(settings.hotkey.modifier(), Modifier::Alt);
                assert_eq!(settings.hotkey.key, 'C');
            }
            other => panic!("unexpected response: {other:?}"),
        }

        match f.control.try_recv().unwrap() {
            DaemonCommand::HotkeyChanged(binding) => {
                assert_eq!(binding.modifier, Modifier::Alt);
                assert_eq!(binding.letter, 'C');
            }
            other => panic!("unexpected command: {other:?}"),
        }
        let saved = Settings::load_from(&f.ctx.settings_path);
        assert_eq!(saved.hotkey.key, 'C');
    }

    #[test]
    fn test_set_hotkey_rejects_garbage() {
        let mut f = fixture();
        assert!(matches!(
            handle_request(&f.ctx, HistoryRequest::SetHotkey("ctrl+shift".to_string())),
            HistoryResponse::Error(_)
        ));
        assert!(f.control.try_recv().is_err());
        assert_eq!(config::current(&f.ctx.settings), Settings::default());
    }

    #[test]
    fn test_set_display_max_changes_view() {
        let f = fixture();
        for i in 0..5 {
            record(&f.ctx, &format!("item {i}"));
        }
        handle_request(&f.ctx, HistoryRequest::SetDisplayMax(2));
        match handle_request(&f.ctx, HistoryRequest::List { group: None }) {
            HistoryResponse::Entries(entries) => assert_eq!(entries.len(), 2),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_groups_lifecycle() {
        let f = fixture();
        let id = record(&f.ctx, "grouped");
        let group = match handle_request(
            &f.ctx,
            HistoryRequest::CreateGroup {
                name: "work".to_string(),
                color: None,
            },
        ) {
            HistoryResponse::Group(group) => group,
            other => panic!("unexpected response: {other:?}"),
        };

        assert_eq!(
            handle_request(
                &f.ctx,
                HistoryRequest::SetGroup {
                    id: id.clone(),
                    group: Some(group.id.clone())
                }
            ),
            HistoryResponse::Applied(true)
        );
        match handle_request(&f.ctx, HistoryRequest::Groups) {
            HistoryResponse::Groups(views) => assert_eq!(views[0].item_count, 1),
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(
            handle_request(&f.ctx, HistoryRequest::DeleteGroup(group.id)),
            HistoryResponse::Applied(true)
        );
    }

    #[test]
    fn test_shutdown_signals_daemon() {
        let mut f = fixture();
        assert_eq!(handle_request(&f.ctx, HistoryRequest::Shutdown), HistoryResponse::Ready);
        assert_eq!(f.control.try_recv().unwrap(), DaemonCommand::Shutdown);
    }

    #[test]
    fn test_subscribe_streams_events() {
        let f = fixture();
        let ctx = Arc::new(f.ctx);
        let (mut client, server) = UnixStream::pair().unwrap();

        let server_ctx = ctx.clone();
        std::thread::spawn(move || {
            let _ = handle_client(server, &server_ctx);
        });

        write_message(&mut client, &HistoryRequest::Subscribe).unwrap();
        assert_eq!(read_message::<HistoryResponse, _>(&mut client).unwrap(), HistoryResponse::Ready);

        let entry = ctx
            .service
            .store()
            .record_new_content("streamed".to_string(), ContentKind::Text)
            .unwrap();
        assert_eq!(
            read_message::<HistoryResponse, _>(&mut client).unwrap(),
            HistoryResponse::Event(HistoryEvent::Recorded(entry))
        );
    }
}
