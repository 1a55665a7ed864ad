//! Filename sanitization for titles coming back from external tooling.
//!
//! Video titles are arbitrary text chosen by uploaders; they end up as file
//! stems for both the media file and the `.info.json` sidecar, so they must
//! be valid on Windows, Linux, and macOS while keeping non-ASCII text intact.

/// Characters that are invalid in Windows filenames.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved device names (case-insensitive, with or without extension).
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a title for use as a cross-platform file stem.
///
/// Control characters and Windows-invalid characters become underscores,
/// leading/trailing dots and spaces are trimmed, reserved device names get a
/// leading underscore, and an empty result falls back to `"video"`.
pub fn sanitize_title(input: &str) -> String {
    let replaced: String = input
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "video".to_string();
    }

    let stem_upper = trimmed
        .split('.')
        .next()
        .unwrap_or(trimmed)
        .to_ascii_uppercase();
    if RESERVED_NAMES.contains(&stem_upper.as_str()) {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// Deterministic collision variant: `stem` for the first claim, `stem (n)`
/// for the n-th.
pub fn numbered_variant(stem: &str, n: u32) -> String {
    if n <= 1 {
        stem.to_string()
    } else {
        format!("{stem} ({n})")
    }
}
