//! Tolerant extraction of JSON payloads from model output.
//!
//! Models wrap JSON in markdown fences or prose more often than not.
//! Extraction is lexical only; the caller still owns strict parsing.

/// Return the most plausible JSON slice of `text`.
///
/// Preference order: the body of the first fenced code block, then the
/// span from the first `{` or `[` to the matching last `}` or `]`, then
/// the trimmed input unchanged.
#[must_use]
pub fn extract_json(text: &str) -> &str {
    if let Some(inner) = fenced_block(text) {
        return inner.trim();
    }

    let trimmed = text.trim();
    let object = span(trimmed, '{', '}');
    let array = span(trimmed, '[', ']');
    match (object, array) {
        (Some(o), Some(a)) => {
            if a.0 < o.0 {
                &trimmed[a.0..=a.1]
            } else {
                &trimmed[o.0..=o.1]
            }
        }
        (Some(o), None) => &trimmed[o.0..=o.1],
        (None, Some(a)) => &trimmed[a.0..=a.1],
        (None, None) => trimmed,
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn span(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let first = text.find(open)?;
    let last = text.rfind(close)?;
    (last > first).then_some((first, last))
}
