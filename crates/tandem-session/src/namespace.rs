//! Cache key namespacing.

/// Separator between prefix and session key.
pub const SEPARATOR: char = ':';

/// The cache-visible key for a session.
///
/// Deployments sharing one cache instance use distinct prefixes so their
/// session keys never collide. An empty prefix leaves the key untouched.
pub fn physical_key(session_key: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return session_key.to_string();
    }
    format!("{prefix}{SEPARATOR}{session_key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prefix_is_identity() {
        assert_eq!(physical_key("abc123xyz", ""), "abc123xyz");
    }

    #[test]
    fn test_prefix_is_joined_with_colon() {
        assert_eq!(physical_key("abc123xyz", "shop"), "shop:abc123xyz");
        assert_eq!(physical_key("abc123xyz", "a:b"), "a:b:abc123xyz");
    }

    #[test]
    fn test_prefixes_do_not_collide() {
        assert_ne!(physical_key("k1k1k1k1", "one"), physical_key("k1k1k1k1", "two"));
        assert_ne!(physical_key("k1k1k1k1", "one"), physical_key("k1k1k1k1", ""));
    }
}
