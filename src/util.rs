//! Shared utility functions.

/// Normalize a site or URL to a bare lowercase host.
///
/// Strips scheme, path, port and surrounding whitespace:
/// "https://WWW.GitHub.com/login" -> "www.github.com".
pub fn normalize_site(input: &str) -> String {
    let s = input.trim();
    let s = s.split_once("://").map(|(_, rest)| rest).unwrap_or(s);
    let s = s.split(['/', '?', '#']).next().unwrap_or("");
    let s = s.split(':').next().unwrap_or("");
    s.to_ascii_lowercase()
}

/// Two-way substring match between a stored site and a visited host.
///
/// A stored "netflix" matches "www.netflix.com", and a stored
/// "accounts.google.com" matches a lookup for "google.com". Empty inputs never match.
pub fn site_matches(stored: &str, host: &str) -> bool {
    let stored = normalize_site(stored);
    let host = normalize_site(host);
    if stored.is_empty() || host.is_empty() {
        return false;
    }
    host.contains(&stored) || stored.contains(&host)
}

/// Mask a secret for display, keeping only its length class.
pub fn mask(secret: &str) -> String {
    "•".repeat(secret.chars().count().clamp(4, 12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_site_strips_scheme_path_and_port() {
        assert_eq!(normalize_site("https://WWW.GitHub.com/login?x=1"), "www.github.com");
        assert_eq!(normalize_site("localhost:8080"), "localhost");
        assert_eq!(normalize_site("  example.org  "), "example.org");
    }

    #[test]
    fn test_site_matches_both_directions() {
        assert!(site_matches("netflix", "www.netflix.com"));
        assert!(site_matches("accounts.google.com", "google.com"));
        assert!(site_matches("GitHub.com", "https://github.com/settings"));
    }

    #[test]
    fn test_site_matches_rejects_unrelated_and_empty() {
        assert!(!site_matches("netflix", "example.org"));
        assert!(!site_matches("", "example.org"));
        assert!(!site_matches("example.org", "   "));
    }

    #[test]
    fn test_mask_bounds_length() {
        assert_eq!(mask("ab").chars().count(), 4);
        assert_eq!(mask("p@ss1234").chars().count(), 8);
        assert_eq!(mask(&"x".repeat(40)).chars().count(), 12);
    }
}
