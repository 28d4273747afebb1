use std::sync::OnceLock;

use regex::Regex;


/// An optional currency code or symbol, then digits grouped by commas or not,
/// then an optional fractional part. Anything else on the line means the
/// element holds something other than a price.
fn price_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[A-Z]{3}\s*)?\$?\s*(\d{1,3}(?:,\d{3})+|\d+)(\.\d+)?\s*(?:[A-Z]{3})?$")
            .expect("price pattern should be a valid regex")
    })
}


/// A whole count, digits grouped by commas or not.
fn stock_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:\d{1,3}(?:,\d{3})+|\d+)$").expect("stock pattern should be a valid regex")
    })
}


/// Reads an amount such as `$1,299.00` or `MXN 850`.
///
/// Returns `None` when the text is not a price, rather than guessing.
pub(crate) fn parse_price(text: &str) -> Option<f64> {
    let captures = price_pattern().captures(text.trim())?;
    let whole = captures.get(1)?.as_str().replace(',', "");
    let fraction = captures.get(2).map_or("", |m| m.as_str());
    format!("{whole}{fraction}").parse().ok()
}


/// Reads a stock flag such as `Disponibles: 12 pzas.`
///
/// `prefix` and `suffix` are stripped when present. What is left has to be a
/// whole count, otherwise the flag is unparsable.
pub(crate) fn parse_stock(text: &str, prefix: &str, suffix: &str) -> Option<u32> {
    let text = text.trim();
    let text = text.strip_prefix(prefix).unwrap_or(text);
    let text = text.strip_suffix(suffix).unwrap_or(text).trim();
    if !stock_pattern().is_match(text) {
        return None;
    }
    text.replace(',', "").parse().ok()
}
