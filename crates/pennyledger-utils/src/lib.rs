//! Formatting helpers for ledger rows
//!
//! Pure functions turning stored transaction values into display strings:
//! signed minor-unit amounts into currency text and ISO timestamps into
//! short calendar dates.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use std::cmp::Ordering;
use thiserror::Error;

/// Rendered in place of a date that could not be parsed
pub const DATE_PLACEHOLDER: &str = "Unknown date";

/// Errors raised by the formatting helpers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid date: {input}")]
    InvalidDate { input: String },
}

/// Format a number with thousands separators
pub fn format_number<T: ToString>(n: T) -> String {
    group_digits(&n.to_string(), ",")
}

fn group_digits(digits: &str, separator: &str) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };

    let mut result = String::new();
    let mut count = 0;
    for c in digits.chars().rev() {
        if count == 3 {
            result.push_str(&separator.chars().rev().collect::<String>());
            count = 0;
        }
        result.push(c);
        count += 1;
    }
    let grouped: String = result.chars().rev().collect();
    format!("{}{}", sign, grouped)
}

/// Currency display convention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyFormat {
    pub symbol: String,
    pub thousands_separator: String,
    pub decimal_separator: String,
}

impl Default for CurrencyFormat {
    fn default() -> Self {
        Self::gbp()
    }
}

impl CurrencyFormat {
    /// Pounds sterling, en-GB grouping
    pub fn gbp() -> Self {
        Self {
            symbol: "£".to_string(),
            thousands_separator: ",".to_string(),
            decimal_separator: ".".to_string(),
        }
    }

    pub fn new(symbol: &str, thousands_separator: &str, decimal_separator: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            thousands_separator: thousands_separator.to_string(),
            decimal_separator: decimal_separator.to_string(),
        }
    }

    /// Format a signed minor-unit amount.
    ///
    /// Credits get an explicit `+`, debits a single `-` in front of the
    /// symbol, and zero has no sign at all.
    pub fn format(&self, minor_units: i64) -> String {
        let magnitude = minor_units.unsigned_abs();
        let body = format!(
            "{}{}{}{:02}",
            self.symbol,
            group_digits(&(magnitude / 100).to_string(), &self.thousands_separator),
            self.decimal_separator,
            magnitude % 100
        );

        match minor_units.cmp(&0) {
            Ordering::Greater => format!("+{}", body),
            Ordering::Less => format!("-{}", body),
            Ordering::Equal => body,
        }
    }
}

/// Format pence as pounds, e.g. `-5510` becomes `-£55.10`
pub fn format_amount(minor_units: i64) -> String {
    CurrencyFormat::gbp().format(minor_units)
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with any offset, naive date-times and bare dates.
/// Inputs without an offset are read as UTC.
pub fn parse_timestamp(input: &str) -> Option<DateTime<FixedOffset>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt);
    }

    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    Some(DateTime::from_naive_utc_and_offset(naive, Utc.fix()))
}

/// Format a timestamp as `2 Jun 24`.
///
/// The calendar date is the one written in the timestamp, in its own offset.
pub fn format_date(input: &str) -> Result<String, FormatError> {
    let parsed = parse_timestamp(input).ok_or_else(|| FormatError::InvalidDate {
        input: input.to_string(),
    })?;
    Ok(parsed.date_naive().format("%-d %b %y").to_string())
}

/// Like [`format_date`] but renders [`DATE_PLACEHOLDER`] instead of failing
pub fn format_date_or_placeholder(input: &str) -> String {
    match format_date(input) {
        Ok(formatted) => formatted,
        Err(err) => {
            log::debug!("rendering placeholder: {}", err);
            DATE_PLACEHOLDER.to_string()
        }
    }
}
