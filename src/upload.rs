//! Turning a local image, prompt and style into a [`GenerationRequest`].
//!
//! This is the validation boundary in front of the controller: the controller itself
//! never checks its input.

use crate::model::{GenerationRequest, GenerationResult, Style};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;

pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Sniff PNG/JPEG from magic bytes, falling back to the file extension.
pub fn detect_mime(bytes: &[u8], path: &Path) -> Option<&'static str> {
    if bytes.starts_with(PNG_MAGIC) {
        return Some("image/png");
    }
    if bytes.starts_with(JPEG_MAGIC) {
        return Some("image/jpeg");
    }
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

pub fn load_image_data_url(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if meta.len() > MAX_FILE_BYTES {
        bail!("File is larger than 10MB; resize it before uploading");
    }
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let Some(mime) = detect_mime(&bytes, path) else {
        bail!("Please upload a PNG or JPG file");
    };
    Ok(to_data_url(mime, &bytes))
}

pub fn normalize_prompt(prompt: &str) -> Result<String> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        bail!("Please enter a prompt");
    }
    Ok(trimmed.to_string())
}

pub fn prepare_request(image: &Path, prompt: &str, style: Style) -> Result<GenerationRequest> {
    let prompt = normalize_prompt(prompt)?;
    let image_data_url = load_image_data_url(image)?;
    Ok(GenerationRequest {
        image_data_url,
        prompt,
        style,
    })
}

/// Rebuild a request from a stored result. Unknown styles fall back to the default.
pub fn request_from_history(entry: &GenerationResult) -> GenerationRequest {
    GenerationRequest {
        image_data_url: entry.image_url.clone(),
        prompt: entry.prompt.clone(),
        style: Style::from_label(&entry.style).unwrap_or_default(),
    }
}
