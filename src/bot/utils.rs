const MAX_LENGTH: usize = 72;

/// Truncates `content` to [`MAX_LENGTH`] characters, marking the cut with an ellipsis.
pub(crate) fn shorten_content(content: &str) -> String {
    match content.char_indices().nth(MAX_LENGTH) {
        Some((end, _)) => format!("{}…", &content[..end]),
        None => content.to_owned(),
    }
}
