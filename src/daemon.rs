//! Daemon wiring
//!
//! Owns the long-lived components: the clipboard service on a current-thread
//! tokio runtime, the hotkey detector, the activation dispatcher thread, the
//! IPC server and the signal listener.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::DaemonArgs;
use crate::clipboard::{ArboardBackend, ClipboardService, shared_backend};
use crate::config::{self, Settings, SharedSettings};
use crate::history::{HistoryStore, persistence};
use crate::hotkeys::{HotkeyCommand, HotkeyDetector, InstallMode};
use crate::ipc::HistoryServer;
use crate::ipc::handler::{DaemonCommand, IpcContext, spawn_ipc_listener};
use crate::window::{LogOnlyController, WindowController, X11WindowController};

pub fn run(args: DaemonArgs) -> Result<()> {
    let settings_path = Settings::path();
    let mut settings = Settings::load_from(&settings_path);
    settings.apply_overrides(|name| std::env::var(name).ok());
    info!(
        hotkey = %settings.hotkey,
        max_items_per_group = settings.max_items_per_group,
        "Settings loaded"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    runtime.block_on(serve(args, config::shared(settings), settings_path))
}

async fn serve(args: DaemonArgs, settings: SharedSettings, settings_path: PathBuf) -> Result<()> {
    let store = Arc::new(HistoryStore::open(persistence::default_path(), settings.clone()));
    let backend = ArboardBackend::new().context("System clipboard unavailable")?;
    let service = Arc::new(ClipboardService::new(
        store,
        shared_backend(backend),
        Duration::from_millis(args.poll_ms),
    ));
    service
        .start_monitoring()
        .await
        .context("Failed to start clipboard monitoring")?;

    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    spawn_signal_listener(control_tx.clone())?;

    let mut detector = if args.no_hotkey {
        info!("Global hotkey disabled");
        None
    } else {
        let (hotkey_tx, hotkey_rx) = std_mpsc::channel();
        spawn_dispatcher(hotkey_rx, window_controller(&args.window_class));

        let mode = if args.force_intercept {
            InstallMode::Intercept
        } else {
            InstallMode::Auto
        };
        let binding = config::current(&settings).hotkey.binding();
        let detector = HotkeyDetector::install(binding, hotkey_tx, mode)
            .context("Failed to install global hotkey (use --no-hotkey to run without it)")?;
        info!(hotkey = %binding, listener = ?detector.listener_name(), "Hotkey support enabled");
        Some(detector)
    };

    let server = HistoryServer::bind()?;
    let ctx = Arc::new(IpcContext {
        service: service.clone(),
        settings,
        settings_path,
        control: control_tx,
    });
    spawn_ipc_listener(server.try_clone_listener()?, ctx);
    info!(socket = %server.path().display(), "clipstash daemon ready");

    while let Some(command) = control_rx.recv().await {
        match command {
            DaemonCommand::HotkeyChanged(binding) => match detector.as_mut() {
                Some(detector) => {
                    if let Err(e) = detector.update_config(binding.modifier, binding.letter) {
                        error!(error = %e, hotkey = %binding, "Failed to apply new hotkey");
                    }
                }
                None => info!(hotkey = %binding, "Hotkey saved, takes effect when the hotkey is enabled"),
            },
            DaemonCommand::Shutdown => break,
        }
    }

    info!("Shutting down");
    service.stop_monitoring().await;
    if let Some(mut detector) = detector.take() {
        detector.uninstall();
    }
    drop(server);
    Ok(())
}

fn window_controller(class: &str) -> Box<dyn WindowController> {
    match X11WindowController::connect(class) {
        Ok(controller) => Box::new(controller),
        Err(e) => {
            warn!(error = ?e, "No X11 window control, hotkey presses will only be logged");
            Box::new(LogOnlyController)
        }
    }
}

/// Toggle the presentation window off the listener threads
fn spawn_dispatcher(
    commands: std_mpsc::Receiver<HotkeyCommand>,
    mut controller: Box<dyn WindowController>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for command in commands {
            match command {
                HotkeyCommand::Activate => {
                    if let Err(e) = controller.toggle_visibility() {
                        error!(error = ?e, "Failed to toggle presentation window");
                    }
                }
            }
        }
        info!("Activation dispatcher stopped");
    })
}

fn spawn_signal_listener(control: mpsc::UnboundedSender<DaemonCommand>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    thread::spawn(move || {
        for signal in signals.forever() {
            info!(signal = signal, "Received termination signal");
            if control.send(DaemonCommand::Shutdown).is_err() {
                break;
            }
        }
    });
    Ok(())
}
