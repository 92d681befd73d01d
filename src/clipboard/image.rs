//! Image payload codec
//!
//! Image entries are stored as base64 text of a PNG file, so the history
//! document stays plain JSON.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::io::Cursor;

use super::{ClipboardError, RgbaImage};

/// Encode RGBA8 pixels as base64 PNG
pub fn encode_base64_png(image: &RgbaImage) -> Result<String, ClipboardError> {
    let expected = image.width * image.height * 4;
    if image.bytes.len() != expected {
        return Err(ClipboardError::Image(format!(
            "expected {} bytes for {}x{} RGBA, got {}",
            expected,
            image.width,
            image.height,
            image.bytes.len()
        )));
    }

    let width = u32::try_from(image.width).map_err(|e| ClipboardError::Image(e.to_string()))?;
    let height = u32::try_from(image.height).map_err(|e| ClipboardError::Image(e.to_string()))?;

    let mut png_bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_bytes, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| ClipboardError::Image(e.to_string()))?;
        writer
            .write_image_data(&image.bytes)
            .map_err(|e| ClipboardError::Image(e.to_string()))?;
        writer.finish().map_err(|e| ClipboardError::Image(e.to_string()))?;
    }

    Ok(STANDARD.encode(png_bytes))
}

/// Decode a stored base64 PNG back to RGBA8 pixels
pub fn decode_base64_png(payload: &str) -> Result<RgbaImage, ClipboardError> {
    let png_bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| ClipboardError::Image(format!("invalid base64: {e}")))?;

    let decoder = png::Decoder::new(Cursor::new(png_bytes.as_slice()));
    let mut reader = decoder
        .read_info()
        .map_err(|e| ClipboardError::Image(e.to_string()))?;

    let (color_type, bit_depth) = reader.output_color_type();
    if bit_depth != png::BitDepth::Eight
        || !matches!(color_type, png::ColorType::Rgba | png::ColorType::Rgb)
    {
        return Err(ClipboardError::Image(format!(
            "unsupported PNG format {color_type:?}/{bit_depth:?} (expected 8-bit RGB or RGBA)"
        )));
    }

    let (width, height) = {
        let info = reader.info();
        (info.width as usize, info.height as usize)
    };
    let mut buf = vec![0; width * height * 4];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| ClipboardError::Image(e.to_string()))?;
    let pixels = &buf[..info.buffer_size()];

    let bytes = match color_type {
        png::ColorType::Rgb => {
            let mut rgba = Vec::with_capacity(width * height * 4);
            for chunk in pixels.chunks_exact(3) {
                rgba.extend_from_slice(chunk);
                rgba.push(0xFF);
            }
            rgba
        }
        _ => pixels.to_vec(),
    };

    Ok(RgbaImage { width, height, bytes })
}
