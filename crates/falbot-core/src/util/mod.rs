pub mod http;

/// Get current timestamp in ISO format.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Truncate a string to max length, adding suffix if truncated.
pub fn truncate_string(s: &str, max_len: usize, suffix: &str) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(suffix.len());
    // Ensure we don't split a multi-byte UTF-8 character
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &s[..end], suffix)
}

/// Format an atom amount as a decimal coin value, trimming trailing zeros.
pub fn format_coin(atoms: crate::types::Atoms, atoms_per_coin: i64) -> String {
    let whole = atoms / atoms_per_coin;
    let frac = (atoms % atoms_per_coin).abs();
    if frac == 0 {
        return whole.to_string();
    }
    let digits = (atoms_per_coin as f64).log10().round() as usize;
    let s = format!("{}.{:0width$}", whole, frac, width = digits);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10, "..."), "hello");
        assert_eq!(truncate_string("hello world", 8, "..."), "hello...");
        assert_eq!(truncate_string("ab", 2, "..."), "ab");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert!(ts.contains('T'));
        assert!(ts.len() > 10);
    }

    #[test]
    fn test_format_coin() {
        assert_eq!(format_coin(100_000_000_000, 100_000_000_000), "1");
        assert_eq!(format_coin(150_000_000_000, 100_000_000_000), "1.5");
        assert_eq!(format_coin(80_000, 100_000_000), "0.0008");
        assert_eq!(format_coin(0, 100_000_000_000), "0");
    }
}
