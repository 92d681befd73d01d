//! Command line interface
//!
//! Without a subcommand the daemon runs in the foreground. Every other
//! subcommand is a thin client of the daemon's IPC socket.

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};

use crate::constants::{clipboard, x11};
use crate::ipc::{HistoryClient, HistoryRequest, HistoryResponse};
use crate::types::{Entry, GroupView};

/// Width of the text preview in listings
const PREVIEW_CHARS: usize = 60;

#[derive(Parser, Debug)]
#[command(name = "clipstash", version, about = "Clipboard history daemon with a global hotkey")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct DaemonArgs {
    /// Run without the global hotkey
    #[arg(long)]
    pub no_hotkey: bool,

    /// Skip the X11 key grab and intercept keyboards through evdev directly
    #[arg(long, conflicts_with = "no_hotkey")]
    pub force_intercept: bool,

    /// WM_CLASS of the selection window toggled by the hotkey
    #[arg(long, default_value = x11::DEFAULT_WINDOW_CLASS)]
    pub window_class: String,

    /// Clipboard poll interval in milliseconds
    #[arg(long, default_value_t = clipboard::POLL_INTERVAL_MS, value_parser = clap::value_parser!(u64).range(20..))]
    pub poll_ms: u64,
}

impl Default for DaemonArgs {
    fn default() -> Self {
        Self {
            no_hotkey: false,
            force_intercept: false,
            window_class: x11::DEFAULT_WINDOW_CLASS.to_string(),
            poll_ms: clipboard::POLL_INTERVAL_MS,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the clipboard history daemon (default)
    Daemon(DaemonArgs),

    /// List entries, pinned first
    List {
        /// Only entries of this group
        #[arg(long)]
        group: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List groups with their member counts
    Groups,

    /// Copy an entry back to the clipboard
    Copy { id: String },

    Pin { id: String },

    Unpin { id: String },

    Delete { id: String },

    /// Delete every unpinned entry
    Clear,

    #[command(subcommand)]
    Group(GroupCommand),

    /// Show or change the hotkey, e.g. `clipstash hotkey alt+c`
    Hotkey { combo: Option<String> },

    /// Show or change how many unpinned entries a view shows
    DisplayMax { max: Option<usize> },

    /// Print history changes as they happen
    Watch,

    /// Stop the running daemon
    Stop,
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    Create {
        name: String,
        /// Hex color such as #FF8800
        #[arg(long)]
        color: Option<String>,
    },

    Delete { id: String },

    /// Put an entry into a group, or take it out with `--none`
    Assign {
        id: String,
        #[arg(required_unless_present = "none")]
        group: Option<String>,
        #[arg(long)]
        none: bool,
    },
}

/// Run one client subcommand against the daemon
pub fn run_client(command: Command) -> Result<()> {
    let mut client = HistoryClient::connect()?;

    match command {
        Command::Daemon(_) => bail!("daemon is not a client command"),
        Command::List { group, json } => {
            let entries = expect_entries(client.request(HistoryRequest::List { group })?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_entries(&entries);
            }
        }
        Command::Groups => match client.request(HistoryRequest::Groups)? {
            HistoryResponse::Groups(groups) => print_groups(&groups),
            other => bail!("Unexpected response: {other:?}"),
        },
        Command::Copy { id } => report_applied(client.request(HistoryRequest::Copy(id.clone()))?, &id)?,
        Command::Pin { id } => report_applied(
            client.request(HistoryRequest::Pin { id: id.clone(), pinned: true })?,
            &id,
        )?,
        Command::Unpin { id } => report_applied(
            client.request(HistoryRequest::Pin { id: id.clone(), pinned: false })?,
            &id,
        )?,
        Command::Delete { id } => report_applied(client.request(HistoryRequest::Delete(id.clone()))?, &id)?,
        Command::Clear => match client.request(HistoryRequest::ClearUnpinned)? {
            HistoryResponse::Cleared(removed) => println!("Removed {removed} unpinned entries"),
            other => bail!("Unexpected response: {other:?}"),
        },
        Command::Group(GroupCommand::Create { name, color }) => {
            match client.request(HistoryRequest::CreateGroup { name, color })? {
                HistoryResponse::Group(group) => println!("{}\t{}", group.id, group.name),
                other => bail!("Unexpected response: {other:?}"),
            }
        }
        Command::Group(GroupCommand::Delete { id }) => {
            report_applied(client.request(HistoryRequest::DeleteGroup(id.clone()))?, &id)?
        }
        Command::Group(GroupCommand::Assign { id, group, none }) => {
            let group = if none { None } else { group };
            report_applied(client.request(HistoryRequest::SetGroup { id: id.clone(), group })?, &id)?
        }
        Command::Hotkey { combo } => {
            let request = match combo {
                Some(combo) => HistoryRequest::SetHotkey(combo),
                None => HistoryRequest::GetSettings,
            };
            match client.request(request)? {
                HistoryResponse::Settings(settings) => println!("{}", settings.hotkey),
                other => bail!("Unexpected response: {other:?}"),
            }
        }
        Command::DisplayMax { max } => {
            let request = match max {
                Some(max) => HistoryRequest::SetDisplayMax(max),
                None => HistoryRequest::GetSettings,
            };
            match client.request(request)? {
                HistoryResponse::Settings(settings) => println!("{}", settings.max_items_per_group),
                other => bail!("Unexpected response: {other:?}"),
            }
        }
        Command::Watch => {
            client.send_request(&HistoryRequest::Subscribe)?;
            loop {
                match client.recv_response()? {
                    HistoryResponse::Event(event) => println!("{}", serde_json::to_string(&event)?),
                    HistoryResponse::Ready => {}
                    other => bail!("Unexpected response: {other:?}"),
                }
            }
        }
        Command::Stop => {
            client.request(HistoryRequest::Shutdown)?;
            println!("Daemon stopping");
        }
    }
    Ok(())
}

fn expect_entries(response: HistoryResponse) -> Result<Vec<Entry>> {
    match response {
        HistoryResponse::Entries(entries) => Ok(entries),
        other => bail!("Unexpected response: {other:?}"),
    }
}

fn report_applied(response: HistoryResponse, id: &str) -> Result<()> {
    match response {
        HistoryResponse::Applied(true) => Ok(()),
        HistoryResponse::Applied(false) => bail!("No entry or group with id {id}"),
        other => bail!("Unexpected response: {other:?}"),
    }
}

fn format_entry(entry: &Entry) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        entry.id,
        if entry.is_pinned { "*" } else { " " },
        entry.last_used_at.format("%Y-%m-%d %H:%M:%S"),
        entry.preview(PREVIEW_CHARS)
    )
}

fn print_entries(entries: &[Entry]) {
    for entry in entries {
        println!("{}", format_entry(entry));
    }
}

fn print_groups(groups: &[GroupView]) {
    for view in groups {
        println!(
            "{}\t{}\t{}\t{} entries",
            view.group.id,
            view.group.name,
            view.group.color.as_deref().unwrap_or("-"),
            view.item_count
        );
    }
}
