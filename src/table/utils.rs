use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Office names arrive with stray spacing and trailing punctuation
/// (`"London ,"`, `"New  York."`). Collapse them to one spelling.
pub fn normalize_location(raw: &str) -> String {
    let s = clean_str(raw);
    let s = WHITESPACE.replace_all(&s, " ");
    s.trim_end_matches(['.', ',', ';', ':'])
        .trim_end()
        .to_string()
}

/// Parse a whole count from text such as `"10"`, `"10.0"` or `"1,234"`.
/// Negative or fractional values are rejected.
pub fn parse_count(raw: &str) -> Option<u64> {
    let s = clean_str(raw).replace(',', "");
    if s.is_empty() {
        return None;
    }
    if let Ok(v) = s.parse::<u64>() {
        return Some(v);
    }
    let f: f64 = s.parse().ok()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 {
        Some(f as u64)
    } else {
        None
    }
}

/// Render a spreadsheet float the way a person typed it: `10.0` → `"10"`.
pub fn format_number(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_collapse() {
        assert_eq!(normalize_location("  New   York. "), "New York");
        assert_eq!(normalize_location("London ,"), "London");
        assert_eq!(normalize_location("\"Austin;:\""), "Austin");
        assert_eq!(normalize_location(""), "");
    }

    #[test]
    fn counts() {
        assert_eq!(parse_count("10"), Some(10));
        assert_eq!(parse_count(" 10.0 "), Some(10));
        assert_eq!(parse_count("1,234"), Some(1234));
        assert_eq!(parse_count("2.5"), None);
        assert_eq!(parse_count("-3"), None);
        assert_eq!(parse_count("n/a"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-4.0), "-4");
    }
}
