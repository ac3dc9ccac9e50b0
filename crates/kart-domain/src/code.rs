//! Coupon code format rules.

/// Shortest accepted code, in bytes.
pub const MIN_CODE_LEN: usize = 8;

/// Longest accepted code, in bytes.
pub const MAX_CODE_LEN: usize = 10;

/// Returns true if `code` has an acceptable length.
///
/// Length is measured in bytes; input lines are expected to be ASCII.
#[inline]
pub fn is_well_formed(code: &str) -> bool {
    (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&code.len())
}

/// Trims a raw input line and returns it if it is a well-formed code.
///
/// Lines that are not valid UTF-8 are treated as malformed.
pub fn parse_line(line: &[u8]) -> Option<&str> {
    let trimmed = line.trim_ascii();
    if !(MIN_CODE_LEN..=MAX_CODE_LEN).contains(&trimmed.len()) {
        return None;
    }
    std::str::from_utf8(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_bounds() {
        assert!(!is_well_formed("SAVE100"));
        assert!(is_well_formed("SAVE1000"));
        assert!(is_well_formed("DISCOUNT50"));
        assert!(!is_well_formed("DISCOUNT500"));
        assert!(!is_well_formed(""));
    }

    #[test]
    fn test_parse_line_trims_whitespace() {
        assert_eq!(parse_line(b"  SAVE1000\r\n"), Some("SAVE1000"));
        assert_eq!(parse_line(b"\tDISCOUNT50\n"), Some("DISCOUNT50"));
    }

    #[test]
    fn test_parse_line_drops_malformed() {
        assert_eq!(parse_line(b"SHORT\n"), None);
        assert_eq!(parse_line(b"WAYTOOLONGCODE\n"), None);
        assert_eq!(parse_line(b"\n"), None);
        assert_eq!(parse_line(b"SAVE\xff\xfe00\n"), None);
    }
}
