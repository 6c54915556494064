//! Exact conversion between raw integer amounts and decimal strings.

use crate::error::{Error, Result};

/// Render `raw` with `precision` decimals, e.g. `(123456, 5)` → `"1.23456"`.
pub fn format_amount(raw: i64, precision: u8) -> String {
    let digits = raw.unsigned_abs().to_string();
    let sign = if raw < 0 { "-" } else { "" };
    let precision = usize::from(precision);
    if precision == 0 {
        return format!("{}{}", sign, digits);
    }

    let padded = format!("{:0>width$}", digits, width = precision + 1);
    let (whole, fraction) = padded.split_at(padded.len() - precision);
    format!("{}{}.{}", sign, whole, fraction)
}

/// Parse a positive decimal amount into raw units.
///
/// More decimals than `precision` allows, signs, exponents and zero are
/// rejected.
pub fn parse_amount(text: &str, precision: u8) -> Result<i64> {
    let invalid = || Error::validation(format!("invalid amount {:?}", text));
    let text = text.trim();
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };

    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(invalid());
    }
    if fraction.len() > usize::from(precision) {
        return Err(Error::validation(format!(
            "amount {} has more than {} decimals",
            text, precision
        )));
    }

    let mut raw: i64 = 0;
    let scaled = whole
        .bytes()
        .chain(fraction.bytes())
        .chain(std::iter::repeat(b'0').take(usize::from(precision) - fraction.len()));
    for digit in scaled {
        raw = raw
            .checked_mul(10)
            .and_then(|r| r.checked_add(i64::from(digit - b'0')))
            .ok_or_else(|| Error::validation(format!("amount {} is too large", text)))?;
    }

    if raw == 0 {
        return Err(Error::validation("amount must be positive"));
    }
    Ok(raw)
}
