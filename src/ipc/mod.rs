//! IPC (Inter-Process Communication) via Unix sockets
//!
//! The daemon owns the history; the CLI and any presentation UI talk to it
//! with length-prefixed JSON over a Unix domain socket.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

pub mod handler;
mod messages;
pub use messages::{HistoryRequest, HistoryResponse};

use crate::constants::paths;

/// Maximum message size (10 MB) to prevent DoS via memory exhaustion
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Get default socket path (XDG_RUNTIME_DIR with fallback to cache)
pub fn default_socket_path() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir)
            .join(paths::APP_DIR)
            .join(paths::SOCKET_FILENAME));
    }

    // Fallback to cache dir
    let cache = dirs::cache_dir()
        .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?;
    Ok(cache.join(paths::APP_DIR).join(paths::SOCKET_FILENAME))
}

/// Client connection to the daemon
pub struct HistoryClient {
    pub(crate) stream: UnixStream,
}

impl HistoryClient {
    /// Connect to the daemon socket
    pub fn connect() -> Result<Self> {
        let path = default_socket_path()?;
        Self::connect_to(&path)
    }

    /// Connect to specific socket path
    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).context(format!(
            "Failed to connect to clipstash daemon at {} (is it running?)",
            path.display()
        ))?;
        Ok(Self { stream })
    }

    pub fn send_request(&mut self, req: &HistoryRequest) -> Result<()> {
        write_message(&mut self.stream, req)
    }

    /// Receive response from the daemon (blocking)
    pub fn recv_response(&mut self) -> Result<HistoryResponse> {
        read_message(&mut self.stream)
    }

    /// Send request and wait for response (convenience method)
    pub fn request(&mut self, req: HistoryRequest) -> Result<HistoryResponse> {
        self.send_request(&req)?;
        match self.recv_response()? {
            HistoryResponse::Error(message) => Err(anyhow!("Daemon error: {message}")),
            response => Ok(response),
        }
    }
}

/// Server listener for the daemon
pub struct HistoryServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl HistoryServer {
    /// Create server and bind to default socket path
    pub fn bind() -> Result<Self> {
        let socket_path = default_socket_path()?;
        Self::bind_to(socket_path)
    }

    /// Create server and bind to specific socket path
    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        // Create directory if needed
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create socket directory: {}", parent.display()))?;
        }

        // A live daemon still answers on the socket; only remove a stale one
        if socket_path.exists() {
            if UnixStream::connect(&socket_path).is_ok() {
                return Err(anyhow!(
                    "Another clipstash daemon is already listening on {}",
                    socket_path.display()
                ));
            }
            std::fs::remove_file(&socket_path)
                .context(format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .context(format!("Failed to bind socket at {}", socket_path.display()))?;

        // Set permissions to 0700 (owner only)
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept incoming connection (blocking)
    pub fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().context("Failed to accept IPC connection")?;
        Ok(stream)
    }

    /// Second handle on the listening socket for the accept thread
    ///
    /// The server itself stays with the daemon so the socket file is removed
    /// on shutdown even while the accept thread is blocked.
    pub fn try_clone_listener(&self) -> Result<UnixListener> {
        self.listener.try_clone().context("Failed to clone IPC listener")
    }

    /// Get socket path
    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for HistoryServer {
    fn drop(&mut self) {
        // Clean up socket file
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Write length-prefixed message to stream
pub(crate) fn write_message<T: Serialize, W: Write>(stream: &mut W, msg: &T) -> Result<()> {
    let json = serde_json::to_vec(msg).context("Failed to serialize message to JSON")?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", json.len(), MAX_MESSAGE_SIZE));
    }

    // Write length prefix (u32 little-endian)
    let len = json.len() as u32;
    stream
        .write_all(&len.to_le_bytes())
        .context("Failed to write message length")?;

    // Write JSON payload
    stream.write_all(&json).context("Failed to write message payload")?;

    stream.flush().context("Failed to flush stream")?;

    Ok(())
}

/// Read length-prefixed message from stream
pub(crate) fn read_message<T: for<'de> Deserialize<'de>, R: Read>(stream: &mut R) -> Result<T> {
    // Read length prefix
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Sanity check (prevent DoS via huge allocation)
    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!("Message too large: {} bytes (max: {})", len, MAX_MESSAGE_SIZE));
    }

    // Read JSON payload
    let mut json_buf = vec![0u8; len];
    stream
        .read_exact(&mut json_buf)
        .context("Failed to read message payload")?;

    serde_json::from_slice(&json_buf).context("Failed to deserialize message from JSON")
}
