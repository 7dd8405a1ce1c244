//! URL name normalisation and uniqueness rules.

use crate::error::{Error, Result};

/// Maximum length of a sanitised URL name.
pub const MAX_URL_NAME_LENGTH: usize = 200;

/// Numbered candidates tried before giving up on a taken name.
pub const MAX_CANDIDATES: u32 = 1000;

/// Normalise a raw title into a URL name.
///
/// Lowercases, transliterates German umlauts, replaces every character
/// outside `[a-z0-9._-]` with `-`, collapses runs of `-` and trims `-` from
/// both ends. Empty and dot-only results are rejected.
pub fn sanitize_url_name(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        match c {
            'ä' => out.push_str("ae"),
            'ö' => out.push_str("oe"),
            'ü' => out.push_str("ue"),
            'ß' => out.push_str("ss"),
            'a'..='z' | '0'..='9' | '.' | '_' => out.push(c),
            _ => {
                if !out.ends_with('-') {
                    out.push('-');
                }
            }
        }
    }

    let trimmed: String = out
        .trim_matches('-')
        .chars()
        .take(MAX_URL_NAME_LENGTH)
        .collect();
    let trimmed = trimmed.trim_end_matches('-').to_string();
    // "." and ".." are not usable as path segments
    if trimmed.chars().all(|c| c == '.') {
        return Err(Error::InvalidInput(format!(
            "url name '{}' has no usable characters",
            raw
        )));
    }
    Ok(trimmed)
}

/// The `attempt`-th candidate for a name that is already taken.
///
/// Attempt 0 is the name itself, then `name-1`, `name-2`, ...
pub fn candidate(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize_url_name("Hello World").unwrap(), "hello-world");
        assert_eq!(sanitize_url_name("  News: 2026!! ").unwrap(), "news-2026");
    }

    #[test]
    fn test_sanitize_umlauts() {
        assert_eq!(sanitize_url_name("Grüße aus Köln").unwrap(), "gruesse-aus-koeln");
    }

    #[test]
    fn test_sanitize_keeps_dots_and_underscores() {
        assert_eq!(sanitize_url_name("file_name.v2").unwrap(), "file_name.v2");
    }

    #[test]
    fn test_sanitize_collapses_separators() {
        assert_eq!(sanitize_url_name("a -- b // c").unwrap(), "a-b-c");
    }

    #[test]
    fn test_sanitize_rejects_empty() {
        assert!(sanitize_url_name("!!!").is_err());
        assert!(sanitize_url_name("").is_err());
    }

    #[test]
    fn test_sanitize_rejects_dot_only_names() {
        assert!(sanitize_url_name(".").is_err());
        assert!(sanitize_url_name("..").is_err());
        assert!(sanitize_url_name(" - ... - ").is_err());
        assert_eq!(sanitize_url_name("v1.0").unwrap(), "v1.0");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(MAX_URL_NAME_LENGTH + 50);
        assert_eq!(sanitize_url_name(&long).unwrap().len(), MAX_URL_NAME_LENGTH);
    }

    #[test]
    fn test_candidate() {
        assert_eq!(candidate("news", 0), "news");
        assert_eq!(candidate("news", 3), "news-3");
    }
}
