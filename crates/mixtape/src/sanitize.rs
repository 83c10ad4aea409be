//! Helpers for sanitizing names before they reach the archive or tracing spans.
//!
//! Entry names come from remote metadata and must never be able to escape
//! the archive root or produce names that common filesystems reject on
//! extraction.

use std::path::Path;

/// Longest entry stem kept, in characters.
pub const MAX_ENTRY_STEM: usize = 150;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: keeps the file name, drops the directories.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Returns only the host of a URL-like locator, for span fields.
///
/// - `https://soundcloud.com/user/sets/mix?si=abc` → `soundcloud.com`
/// - `not a url` → `<opaque>`
pub fn redact_locator(locator: &str) -> String {
    let Some(scheme_end) = locator.find("://") else {
        return "<opaque>".to_string();
    };
    let rest = &locator[scheme_end + 3..];
    let host_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let host = &rest[..host_end];
    // userinfo never belongs in a span
    let host = host.rsplit('@').next().unwrap_or(host);
    if host.is_empty() {
        "<opaque>".to_string()
    } else {
        host.to_string()
    }
}

fn is_forbidden(c: char) -> bool {
    c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

/// Cleans a free-form title into something usable as a file stem.
///
/// Forbidden characters become spaces, whitespace runs collapse to a single
/// space, and leading/trailing dots and spaces are trimmed. Returns an empty
/// string if nothing usable remains.
pub fn sanitize_stem(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if is_forbidden(c) { ' ' } else { c })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');

    let capped: String = trimmed.chars().take(MAX_ENTRY_STEM).collect();
    capped.trim_end_matches(|c: char| c == '.' || c == ' ').to_string()
}

/// Builds an archive entry name for item `index`.
///
/// Falls back to `Item_<index>` when `raw` sanitizes to nothing.
pub fn entry_name(raw: &str, index: usize, extension: &str) -> String {
    let stem = sanitize_stem(raw);
    let stem = if stem.is_empty() {
        format!("Item_{}", index)
    } else {
        stem
    };

    let extension = extension.trim_start_matches('.');
    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/var/cache/mixtape/job/items/3/track.mp3")),
            "track.mp3"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_redact_locator_keeps_host_only() {
        assert_eq!(
            redact_locator("https://soundcloud.com/user/sets/mix?si=abc"),
            "soundcloud.com"
        );
        assert_eq!(
            redact_locator("https://token@example.com/path"),
            "example.com"
        );
        assert_eq!(redact_locator("plain-id"), "<opaque>");
        assert_eq!(redact_locator("https:///nohost"), "<opaque>");
    }

    #[test]
    fn test_sanitize_stem_strips_separators_and_controls() {
        assert_eq!(sanitize_stem("AC/DC - Back\\In\tBlack"), "AC DC - Back In Black");
        assert_eq!(sanitize_stem("what?: \"why\" <not>|*"), "what why not");
    }

    #[test]
    fn test_sanitize_stem_trims_dots_and_spaces() {
        assert_eq!(sanitize_stem("  ..hidden.. "), "hidden");
        assert_eq!(sanitize_stem("../../etc/passwd"), "etc passwd");
    }

    #[test]
    fn test_sanitize_stem_caps_length() {
        let long = "a".repeat(400);
        assert_eq!(sanitize_stem(&long).chars().count(), MAX_ENTRY_STEM);
    }

    #[test]
    fn test_sanitize_stem_keeps_unicode() {
        assert_eq!(sanitize_stem("Sigur Rós – Hoppípolla"), "Sigur Rós – Hoppípolla");
    }

    #[test]
    fn test_entry_name_fallback() {
        assert_eq!(entry_name("///", 7, "mp3"), "Item_7.mp3");
        assert_eq!(entry_name("", 1, ".mp3"), "Item_1.mp3");
    }

    #[test]
    fn test_entry_name_with_extension() {
        assert_eq!(entry_name("Artist - Title", 2, "mp3"), "Artist - Title.mp3");
        assert_eq!(entry_name("No Ext", 2, ""), "No Ext");
    }
}
