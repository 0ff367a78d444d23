//! Text helpers

/// Truncate to at most `max_chars` characters (not bytes)
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_unchanged() {
        assert_eq!(truncate_chars("tuned", 10), "tuned");
        assert_eq!(truncate_chars("tuned", 5), "tuned");
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        assert_eq!(truncate_chars("22°C humid", 3), "22°");
        assert_eq!(truncate_chars("éèê", 2), "éè");
    }

    #[test]
    fn test_zero_limit() {
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
