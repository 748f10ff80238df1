//! Shared utility functions used across multiple modules.

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Parse a decimal amount such as `-12.5` or `1,204.99` into minor units.
///
/// At most two fractional digits are accepted.
pub fn parse_amount(input: &str) -> Result<i64, String> {
    let cleaned: String = input.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    if digits.is_empty() {
        return Err(format!("invalid amount '{input}'"));
    }

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    let valid = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !valid(whole) || !valid(fraction) {
        return Err(format!("invalid amount '{input}'"));
    }
    if fraction.len() > 2 {
        return Err(format!("amount '{input}' has more than two decimals"));
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| format!("amount '{input}' is out of range"))?
    };
    let fraction: i64 = format!("{fraction:0<2}")
        .parse()
        .map_err(|_| format!("invalid amount '{input}'"))?;
    let minor = whole
        .checked_mul(100)
        .and_then(|value| value.checked_add(fraction))
        .ok_or_else(|| format!("amount '{input}' is out of range"))?;
    Ok(if negative { -minor } else { minor })
}

/// Render minor units as a decimal string with two places.
pub fn format_amount(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
