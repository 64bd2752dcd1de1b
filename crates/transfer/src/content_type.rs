use std::path::Path;

/// Content type used when the payload's type cannot be detected.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Detects an image content type from a file name extension.
pub fn detect_content_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("heic") => Some("image/heic"),
        Some("bmp") => Some("image/bmp"),
        Some("tif" | "tiff") => Some("image/tiff"),
        Some("ico") => Some("image/x-icon"),
        _ => None,
    }
}

/// Like [`detect_content_type`], falling back to [`DEFAULT_CONTENT_TYPE`].
pub fn content_type_or_default(name: &str) -> &'static str {
    detect_content_type(name).unwrap_or(DEFAULT_CONTENT_TYPE)
}
