//! Small helpers shared across modules

pub mod retry;

pub use retry::{RetryConfig, RetryExhausted, retry};

/// Longest prefix of `s` that fits in `max_bytes` without splitting a UTF-8
/// character. Used to keep statement text in log lines bounded.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SELECT value FROM auth", 6, "SELECT")]
    #[case("SELECT value FROM auth", 100, "SELECT value FROM auth")]
    #[case("DELETE FROM auth", 0, "")]
    #[case("", 4, "")]
    fn test_truncate_ascii(#[case] sql: &str, #[case] max: usize, #[case] expected: &str) {
        assert_eq!(truncate_str(sql, max), expected);
    }

    #[test]
    fn test_truncate_backs_off_to_char_boundary() {
        // 'é' is two bytes: "id = 'é'" has the é at bytes 6..8
        let sql = "id = 'é'";
        assert_eq!(truncate_str(sql, 7), "id = '");
        assert_eq!(truncate_str(sql, 8), "id = 'é");
        assert_eq!(truncate_str("会话", 2), "");
        assert_eq!(truncate_str("会话", 3), "会");
    }
}
