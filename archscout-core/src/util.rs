//! Text and vector helpers shared by the stages
use std::borrow::Cow;

/// Longest prefix of `text` holding at most `max_chars` characters
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// `text` cut to `max_chars` characters, with `...` appended when anything was cut
pub fn ellipsize(text: &str, max_chars: usize) -> Cow<'_, str> {
    let prefix = char_prefix(text, max_chars);
    if prefix.len() == text.len() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{prefix}..."))
    }
}

/// Log form of a long text: its first characters and the full character count
///
/// ```
/// # use archscout_core::util::log_preview;
/// assert_eq!(log_preview("建筑".repeat(10), 3), "建筑建 (20 chars)");
/// ```
pub fn log_preview(text: impl AsRef<str>, max_chars: usize) -> String {
    let text = text.as_ref();
    format!("{} ({} chars)", char_prefix(text, max_chars), text.chars().count())
}

/// Whether any component of the vector is NaN
pub fn has_nan(embedding: &[f32]) -> bool {
    embedding.iter().any(|v| v.is_nan())
}
