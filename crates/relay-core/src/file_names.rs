//! File-name hygiene for media written to, and served from, the download directory.

const MAX_FILE_NAME_CHARS: usize = 128;
const FALLBACK_FILE_NAME: &str = "attachment";

/// Reduces an arbitrary remote-supplied name to a single safe path component.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
/// Leading dots are stripped so the result can never be hidden or relative.
pub fn sanitize_file_name(raw: &str) -> String {
    let mapped = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    let trimmed = mapped.trim_start_matches('.');
    let bounded = trimmed.chars().take(MAX_FILE_NAME_CHARS).collect::<String>();
    if bounded.is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        bounded
    }
}

/// Returns true when `name` is safe to join onto the download directory.
pub fn is_servable_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}
