//! Amounts are carried as integer minor units (cents) everywhere. Prices enter
//! the system as decimal strings and are rounded half-up to two decimals.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    Invalid(String),
    #[error("Amount out of range: {0}")]
    OutOfRange(String),
}

/// Parse a non-negative decimal amount ("12.345") into minor units (1235),
/// rounding half-up at the second decimal.
pub fn parse_minor_units(amount: &str) -> Result<i64, MoneyError> {
    let trimmed = amount.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };

    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() && fraction.is_empty() {
        return Err(MoneyError::Invalid(amount.to_string()));
    }
    if !digits_only(whole) || !digits_only(fraction) {
        return Err(MoneyError::Invalid(amount.to_string()));
    }

    let whole_units: i64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| MoneyError::OutOfRange(amount.to_string()))?
    };

    let mut frac_digits = fraction.bytes().map(|b| i64::from(b - b'0'));
    let tenths = frac_digits.next().unwrap_or(0);
    let hundredths = frac_digits.next().unwrap_or(0);
    let round_up = frac_digits.next().map(|d| d >= 5).unwrap_or(false);

    whole_units
        .checked_mul(100)
        .and_then(|c| c.checked_add(tenths * 10 + hundredths + i64::from(round_up)))
        .ok_or_else(|| MoneyError::OutOfRange(amount.to_string()))
}

/// Format minor units as a two-decimal string ("1235" -> "12.35").
pub fn format_minor_units(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
