//! System clipboard access, change detection and the history service
//!
//! The OS boundary is [`ClipboardBackend`]. Everything above it works on
//! [`ClipboardContent`] and its fingerprint.

mod arboard_backend;
pub mod image;
pub mod service;
pub mod watcher;

pub use arboard_backend::ArboardBackend;
pub use service::ClipboardService;

use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::types::ContentKind;

/// SHA-256 over a content tag and payload
pub type Fingerprint = [u8; 32];

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard backend unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read clipboard: {0}")]
    Read(String),

    #[error("failed to write clipboard: {0}")]
    Write(String),

    #[error("invalid image payload: {0}")]
    Image(String),
}

/// Raw RGBA8 pixels as exchanged with the OS clipboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: usize,
    pub height: usize,
    pub bytes: Vec<u8>,
}

/// What the system clipboard currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardContent {
    Empty,
    Text(String),
    Image(RgbaImage),
}

impl ClipboardContent {
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        match self {
            ClipboardContent::Empty => hasher.update(b"empty"),
            ClipboardContent::Text(text) => {
                hasher.update(b"text:");
                hasher.update(text.as_bytes());
            }
            ClipboardContent::Image(image) => {
                hasher.update(b"image:");
                hasher.update((image.width as u64).to_le_bytes());
                hasher.update((image.height as u64).to_le_bytes());
                hasher.update(&image.bytes);
            }
        }
        hasher.finalize().into()
    }

    /// `None` for empty content, which is never recorded
    pub fn kind(&self) -> Option<ContentKind> {
        match self {
            ClipboardContent::Empty => None,
            ClipboardContent::Text(_) => Some(ContentKind::Text),
            ClipboardContent::Image(_) => Some(ContentKind::Image),
        }
    }
}

/// OS clipboard primitive
pub trait ClipboardBackend: Send {
    fn read(&mut self) -> Result<ClipboardContent, ClipboardError>;
    fn write(&mut self, content: &ClipboardContent) -> Result<(), ClipboardError>;
}

pub type SharedBackend = Arc<Mutex<Box<dyn ClipboardBackend>>>;

pub fn shared_backend(backend: impl ClipboardBackend + 'static) -> SharedBackend {
    Arc::new(Mutex::new(Box::new(backend)))
}
