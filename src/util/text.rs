use std::borrow::Cow;

/// Collapse feed-supplied text onto one line.
///
/// Control characters are removed and every whitespace run (including
/// newlines) becomes a single space, so the result is safe to embed in a
/// line-oriented file.
pub fn single_line(s: &str) -> String {
    strip_control_chars(s)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove control characters from feed-supplied text.
///
/// ANSI escape sequences (`ESC [ ... final`) are dropped as a whole so no
/// stray parameters are left behind. Tab, newline and carriage return are
/// kept; callers that need a single line use [`single_line`].
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_unwanted = |c: char| c.is_control() && !matches!(c, '\t' | '\n' | '\r');
    if !s.contains(is_unwanted) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\x1b' if chars.as_str().starts_with('[') => {
                // Parameters and intermediates run up to the first byte in '@'..='~'.
                chars.next();
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            c if is_unwanted(c) => {}
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}
