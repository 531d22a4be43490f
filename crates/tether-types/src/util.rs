//! Utility functions for log-friendly payload previews.

use std::borrow::Cow;

/// Find the largest byte index <= `i` that is on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Truncate `&str` to at most `max_bytes`, never splitting a UTF-8 codepoint.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    &s[..floor_char_boundary(s, max_bytes)]
}

/// Lossy, truncated rendering of a payload for logs and error messages.
///
/// Appends `...` when the payload was cut.
pub fn preview(payload: &[u8], max_bytes: usize) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(payload);
    if text.len() <= max_bytes {
        return text;
    }
    Cow::Owned(format!("{}...", truncate_str(&text, max_bytes)))
}
