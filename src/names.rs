//! Display name sanitization
//!
//! Completion providers accept author names matching `[A-Za-z0-9_-]{1,64}`.
//! Names are reduced to `[A-Za-z0-9_]`: hyphens become underscores and every
//! other character is dropped.

/// Longest sanitized name
pub const MAX_NAME_LENGTH: usize = 64;

/// Returned for an empty input
pub const UNKNOWN_NAME: &str = "unknown";

/// Returned when nothing survives sanitization
pub const INVALID_NAME: &str = "user";

/// Sanitize a display name for use as a message author name
pub fn sanitize(name: &str) -> String {
    if name.is_empty() {
        return UNKNOWN_NAME.to_string();
    }

    let cleaned: String = name
        .chars()
        .filter_map(|c| match c {
            '-' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '_' => Some(c),
            _ => None,
        })
        .take(MAX_NAME_LENGTH)
        .collect();

    if cleaned.is_empty() {
        INVALID_NAME.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_invalid_and_maps_hyphen() {
        assert_eq!(sanitize("Jöhn-Doe!"), "Jhn_Doe");
        assert_eq!(sanitize("alice_99"), "alice_99");
        assert_eq!(sanitize("a b\tc"), "abc");
    }

    #[test]
    fn test_placeholders_are_distinct() {
        assert_eq!(sanitize(""), UNKNOWN_NAME);
        assert_eq!(sanitize("!!!"), INVALID_NAME);
        assert_eq!(sanitize("   "), INVALID_NAME);
        assert_ne!(UNKNOWN_NAME, INVALID_NAME);
    }

    #[test]
    fn test_length_capped() {
        let long = "x".repeat(200);
        assert_eq!(sanitize(&long).len(), MAX_NAME_LENGTH);

        let mixed = "ä-".repeat(100);
        let out = sanitize(&mixed);
        assert_eq!(out.len(), MAX_NAME_LENGTH);
        assert!(out.chars().all(|c| c == '_'));
    }
}
