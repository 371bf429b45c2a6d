//! Text decoding for uploaded and fetched Markdown/TXT sources.

use std::borrow::Cow;

use unicode_normalization::UnicodeNormalization;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decode bytes as UTF-8 text: strip a BOM, replace invalid sequences with
/// U+FFFD and normalize line endings to `\n`.
pub fn decode_text(bytes: &[u8]) -> String {
    let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = String::from_utf8_lossy(content);
    if matches!(text, Cow::Owned(_)) {
        tracing::debug!("Replaced invalid UTF-8 sequences while decoding text");
    }
    normalize_newlines(&text).into_owned()
}

/// CRLF and lone CR become LF.
pub fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Escape text for HTML element content and double-quoted attributes.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// NFC-normalize a metadata string (titles typed on macOS often arrive NFD).
pub fn normalize_nfc(s: &str) -> String {
    s.nfc().collect()
}
