//! Parsing of the textual formats odds feeds publish

use once_cell::sync::Lazy;
use regex::Regex;

static FRACTIONAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*[-/]\s*(\d+)$").unwrap_or_else(|_| unreachable!()));

const SCRATCHED: [&str; 3] = ["SCR", "SCRATCH", "SCRATCHED"];
const EVENS: [&str; 2] = ["EVN", "EVEN"];

/// Parse odds as published (`5-2`, `7/2`, `EVN`, `2.5`) into a ratio.
///
/// Scratched runners and unparseable text yield `None`.
pub fn parse_odds(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let upper = text.to_ascii_uppercase();
    if SCRATCHED.contains(&upper.as_str()) {
        return None;
    }
    if EVENS.contains(&upper.as_str()) {
        return Some(1.0);
    }

    if let Some(caps) = FRACTIONAL.captures(text) {
        let numerator: f64 = caps[1].parse().ok()?;
        let denominator: f64 = caps[2].parse().ok()?;
        if denominator > 0.0 {
            return Some(numerator / denominator);
        }
        return None;
    }

    text.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse a pool amount such as `$12,345` or `12345.75` into whole units
pub fn parse_pool_amount(text: &str) -> Option<i64> {
    let cleaned: String = text.trim().chars().filter(|c| !matches!(c, '$' | ',')).collect();
    if cleaned.is_empty() {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    value.is_finite().then(|| value.trunc() as i64)
}

/// Normalize a program number: uppercase, alphanumerics only (`1a` becomes `1A`)
pub fn parse_program_number(text: &str) -> String {
    text.trim()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Parse an exacta payout such as `$42.60`
pub fn parse_payout(text: &str) -> Option<f64> {
    let cleaned = text.trim().trim_start_matches('$').replace(',', "");
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
