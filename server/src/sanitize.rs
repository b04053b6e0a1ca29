//! Text cleanup for chat lines and the room banner.

use arena_shared::{CHAT_TEXT_MAX_CHARS, WALL_TEXT_MAX_CHARS};

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Trims and caps a chat line. An empty result means "do not relay".
pub fn sanitize_chat(text: &str) -> String {
    truncate_chars(text.trim(), CHAT_TEXT_MAX_CHARS)
        .trim()
        .to_string()
}

/// Collapses all whitespace (newlines included) to single spaces and caps the
/// banner to a short single line.
pub fn sanitize_wall_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, WALL_TEXT_MAX_CHARS)
        .trim()
        .to_string()
}
