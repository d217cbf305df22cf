/// Number of leading characters of a secret kept visible when masking.
const MASK_VISIBLE_CHARS: usize = 4;

/// Mask a secret for logs and debug output, keeping only a short prefix.
pub fn mask_secret(secret: &str) -> String {
    let total = secret.chars().count();
    if total <= MASK_VISIBLE_CHARS * 2 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(MASK_VISIBLE_CHARS).collect();
    format!("{}**** ({} chars)", prefix, total)
}

/// Truncate a string to a maximum byte length on a char boundary,
/// noting how much was dropped.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &s[..end], s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "****");
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret("abcdefghijkl"), "abcd**** (12 chars)");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello... (truncated, 11 total bytes)");
        // Multi-byte chars are never split
        assert_eq!(truncate("héllo", 2), "h... (truncated, 6 total bytes)");
    }
}
