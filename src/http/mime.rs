//! MIME type detection module
//!
//! Determines Content-Type from a file's bytes, never from its name.
//! Binary formats are recognized by magic numbers (`infer`); text is
//! classified from a leading sample.

/// Returned when nothing recognizes the content
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// How much of the payload the text classifier inspects
const SNIFF_LEN: usize = 8192;

/// Get MIME Content-Type from file content
///
/// # Examples
/// ```ignore
/// assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\n...."), "image/png");
/// assert_eq!(sniff_content_type(b"plain words"), "text/plain");
/// assert_eq!(sniff_content_type(&[0, 159, 146, 150]), "application/octet-stream");
/// ```
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type();
    }
    sniff_text(data).unwrap_or(DEFAULT_CONTENT_TYPE)
}

fn sniff_text(data: &[u8]) -> Option<&'static str> {
    if data.is_empty() {
        return None;
    }

    let sample = &data[..data.len().min(SNIFF_LEN)];
    let text = match std::str::from_utf8(sample) {
        Ok(text) => text,
        // Sample cut through a multi-byte character
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&sample[..e.valid_up_to()]).ok()?,
        Err(_) => return None,
    };
    if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return None;
    }

    let head = text.trim_start_matches('\u{feff}').trim_start();
    let lower: String = head.chars().take(512).flat_map(char::to_lowercase).collect();

    if lower.starts_with("<!doctype html") || lower.starts_with("<html") {
        return Some("text/html");
    }
    if lower.starts_with("<svg") || (lower.starts_with("<?xml") && lower.contains("<svg")) {
        return Some("image/svg+xml");
    }
    if lower.starts_with("<?xml") {
        return Some("text/xml");
    }
    if (head.starts_with('{') || head.starts_with('['))
        && serde_json::from_slice::<serde_json::Value>(data).is_ok()
    {
        return Some("application/json");
    }
    Some("text/plain")
}
