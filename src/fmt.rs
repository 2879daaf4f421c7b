use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{Result, WaccyError};

fn group_thousands(int_part: &str) -> String {
    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    with_commas.chars().rev().collect()
}

fn two_places(val: Decimal) -> (bool, String, String) {
    let rounded = val.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let cents = format!("{:.2}", rounded.abs());
    let (int_part, dec_part) = cents.split_once('.').unwrap_or((cents.as_str(), "00"));
    (negative, group_thousands(int_part), dec_part.to_string())
}

/// Format a decimal as a dollar amount with thousands separators: $1,234.56
pub fn money(val: Decimal) -> String {
    let (negative, int_part, dec_part) = two_places(val);
    if negative {
        format!("-${int_part}.{dec_part}")
    } else {
        format!("${int_part}.{dec_part}")
    }
}

/// Like [`money`] but for an arbitrary ISO currency code; USD keeps the dollar sign.
pub fn format_currency(val: Decimal, currency: &str) -> String {
    if currency.eq_ignore_ascii_case("USD") {
        return money(val);
    }
    let (negative, int_part, dec_part) = two_places(val);
    let sign = if negative { "-" } else { "" };
    format!("{sign}{int_part}.{dec_part} {}", currency.to_uppercase())
}

/// `0.1234` with 1 decimal becomes `12.3%`.
pub fn format_percentage(value: f64, decimals: usize) -> String {
    format!("{:.*}%", decimals, value * 100.0)
}

/// Parse an amount string, handling `$`, commas, a leading sign and
/// accounting-style parentheses for negatives.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let (negative, inner) = match trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = inner
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let amount: Decimal = cleaned.parse().ok()?;
    Some(if negative { -amount } else { amount })
}

/// Parse MM/DD/YYYY into a date.
pub fn parse_date_mdy(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%m/%d/%Y").ok()
}

/// Parse either YYYY-MM-DD or MM/DD/YYYY.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_date_mdy(raw))
}

/// Parse `YYYY-MM-DD to YYYY-MM-DD` into an inclusive range.
pub fn parse_date_range(raw: &str) -> Result<(NaiveDate, NaiveDate)> {
    let (start, end) = raw
        .split_once(" to ")
        .ok_or_else(|| WaccyError::Configuration(format!("invalid date range: {raw}")))?;
    let start = parse_date(start)
        .ok_or_else(|| WaccyError::Configuration(format!("invalid start date: {start}")))?;
    let end = parse_date(end)
        .ok_or_else(|| WaccyError::Configuration(format!("invalid end date: {end}")))?;
    validate_date_range(start, end)?;
    Ok((start, end))
}

pub fn validate_date_range(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        return Err(WaccyError::Configuration(format!(
            "date range starts after it ends: {start} to {end}"
        )));
    }
    Ok(())
}
