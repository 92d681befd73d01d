use arboard::{Clipboard, ImageData};
use std::borrow::Cow;
use tracing::debug;

use super::{ClipboardBackend, ClipboardContent, ClipboardError, RgbaImage};

/// X11 selection access through arboard
pub struct ArboardBackend {
    clipboard: Clipboard,
}

impl ArboardBackend {
    pub fn new() -> Result<Self, ClipboardError> {
        let clipboard = Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        debug!("Opened system clipboard");
        Ok(Self { clipboard })
    }
}

impl ClipboardBackend for ArboardBackend {
    /// Image formats are checked before text, so a copied picture that also
    /// carries a textual alternative is recorded as an image
    fn read(&mut self) -> Result<ClipboardContent, ClipboardError> {
        match self.clipboard.get_image() {
            Ok(image) => {
                return Ok(ClipboardContent::Image(RgbaImage {
                    width: image.width,
                    height: image.height,
                    bytes: image.bytes.into_owned(),
                }));
            }
            Err(arboard::Error::ContentNotAvailable) => {}
            Err(e) => debug!(error = %e, "Image read failed, trying text"),
        }

        match self.clipboard.get_text() {
            Ok(text) => Ok(ClipboardContent::Text(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(ClipboardContent::Empty),
            Err(e) => Err(ClipboardError::Read(e.to_string())),
        }
    }

    fn write(&mut self, content: &ClipboardContent) -> Result<(), ClipboardError> {
        let result = match content {
            ClipboardContent::Empty => self.clipboard.clear(),
            ClipboardContent::Text(text) => self.clipboard.set_text(text.as_str()),
            ClipboardContent::Image(image) => self.clipboard.set_image(ImageData {
                width: image.width,
                height: image.height,
                bytes: Cow::Borrowed(&image.bytes),
            }),
        };
        result.map_err(|e| ClipboardError::Write(e.to_string()))
    }
}
