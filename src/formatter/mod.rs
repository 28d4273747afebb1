use std::fmt::Display;

use chrono::{DateTime, TimeZone};

use crate::config::FormatConfig;


/// Turns amounts and timestamps into the strings shown in the report.
#[derive(Debug, Clone)]
pub(crate) struct Formatter {
    currency_symbol: String,
    thousands_separator: String,
    decimal_separator: String,
    datetime_pattern: String,
}


impl Formatter {
    pub(crate) fn new(config: &FormatConfig) -> Self {
        Self {
            currency_symbol: config.currency_symbol.clone(),
            thousands_separator: config.thousands_separator.clone(),
            decimal_separator: config.decimal_separator.clone(),
            datetime_pattern: config.datetime_pattern.clone(),
        }
    }

    /// Formats `amount` with two decimals and grouped thousands, eg. `-$1,234.50`.
    pub(crate) fn currency(&self, amount: f64) -> String {
        if !amount.is_finite() {
            return "N/A".into();
        }
        let rounded = format!("{:.2}", amount.abs());
        let (whole, fraction) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));

        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, digit) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push_str(&self.thousands_separator);
            }
            grouped.push(digit);
        }

        // -0.001 rounds to 0.00 and should not carry a sign
        let sign = if amount < 0.0 && rounded.bytes().any(|b| matches!(b, b'1'..=b'9')) {
            "-"
        } else {
            ""
        };
        format!("{sign}{}{grouped}{}{fraction}", self.currency_symbol, self.decimal_separator)
    }

    pub(crate) fn timestamp<Tz>(&self, at: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        at.format(&self.datetime_pattern).to_string()
    }
}
