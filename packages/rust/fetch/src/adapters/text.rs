//! Number and year parsing for loosely formatted source values.

use std::sync::LazyLock;

use regex::Regex;

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(trillion|billion|bn|million|mn|thousand)?").expect("valid regex")
});
static PAREN_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((?:[^)]*?\b)?((?:19|20)\d{2})\)").expect("valid regex"));
static BARE_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("valid regex"));

/// Parse the first amount in `text`, applying a trailing scale word.
///
/// `"US$ 394.3 billion (2023)"` gives 394_300_000_000. Thousands separators
/// are ignored. Amounts quoted in `MSEK`/`SEKm` are in millions.
pub fn parse_amount(text: &str) -> Option<i64> {
    let cleaned = text.to_lowercase().replace(',', "").replace("&nbsp;", " ").replace('\u{a0}', " ");
    let caps = AMOUNT.captures(&cleaned)?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;

    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        Some("trillion") => 1e12,
        Some("billion" | "bn") => 1e9,
        Some("million" | "mn") => 1e6,
        Some("thousand") => 1e3,
        _ if cleaned.contains("msek") || cleaned.contains("sekm") => 1e6,
        _ => 1.0,
    };

    let value = number * multiplier;
    (value.is_finite() && value < i64::MAX as f64).then(|| value.round() as i64)
}

/// The reporting year stated in `text`: a parenthesized year if any, else
/// the first four-digit year.
pub fn extract_year(text: &str) -> Option<i32> {
    PAREN_YEAR
        .captures(text)
        .or_else(|| BARE_YEAR.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_with_scale_words() {
        assert_eq!(parse_amount("US$ 394.3 billion (2023)"), Some(394_300_000_000));
        assert_eq!(parse_amount("€2.5 trillion"), Some(2_500_000_000_000));
        assert_eq!(parse_amount("164,000 (2023)"), Some(164_000));
        assert_eq!(parse_amount("MSEK 12345"), Some(12_345_000_000));
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn years_prefer_parentheses() {
        assert_eq!(extract_year("US$ 1.2 billion (FY 2023)"), Some(2023));
        assert_eq!(extract_year("2,000 employees in 2022"), Some(2022));
        assert_eq!(extract_year("164,000"), None);
    }
}
