//! Image handling: base64 encoding, media types, and temp-file spooling
//! for uploads.

use std::io::{self, Write};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tempfile::NamedTempFile;

/// Media type for a raster image extension, or None if unsupported.
/// The upload surface accepts jpg/jpeg/png only.
pub fn media_type_for(extension: &str) -> Option<&'static str> {
    match extension.to_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

/// Read a file and return its full contents as base64.
pub async fn encode_file(path: &Path) -> io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(STANDARD.encode(&bytes))
}

/// Inline data URI for a base64 payload.
pub fn data_uri(media_type: &str, payload: &str) -> String {
    format!("data:{};base64,{}", media_type, payload)
}

/// An uploaded image spooled to a fresh temp file. The file keeps the
/// original extension so the media type survives. Dropping the value
/// removes the file, so cleanup happens on every exit path, including
/// upstream API failures.
#[derive(Debug)]
pub struct SpooledImage {
    file: NamedTempFile,
    media_type: &'static str,
    original_name: String,
    size_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SpoolError {
    #[error("Unsupported file type: {0} (expected jpg, jpeg or png)")]
    UnsupportedType(String),

    #[error("Upload exceeds size limit: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Failed to write temp file: {0}")]
    Io(#[from] io::Error),
}

impl SpooledImage {
    pub fn spool(bytes: &[u8], original_name: &str, max_size_bytes: u64) -> Result<Self, SpoolError> {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let media_type = media_type_for(&ext)
            .ok_or_else(|| SpoolError::UnsupportedType(original_name.to_string()))?;

        let size = bytes.len() as u64;
        if size > max_size_bytes {
            return Err(SpoolError::TooLarge {
                size,
                max: max_size_bytes,
            });
        }

        let mut file = tempfile::Builder::new()
            .prefix("medscan-")
            .suffix(&format!(".{}", ext))
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;

        Ok(Self {
            file,
            media_type,
            original_name: original_name.to_string(),
            size_bytes: size,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}
