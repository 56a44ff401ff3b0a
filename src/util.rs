/// Cut `text` to at most `max_chars` characters for log output, marking the
/// cut with an ellipsis.
#[must_use]
pub(crate) fn truncate_for_log(text: &str, max_chars: usize) -> std::borrow::Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => std::borrow::Cow::Borrowed(text),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + 3);
            out.push_str(&text[..byte_idx]);
            out.push_str("...");
            std::borrow::Cow::Owned(out)
        }
    }
}
