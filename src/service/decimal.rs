//! Plain decimal literals: optional sign, digits, optional fraction. No exponents, no inf/nan.

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Decimal<'a> {
    pub negative: bool,
    pub whole: &'a str,
    pub frac: &'a str,
}

impl<'a> Decimal<'a> {
    pub fn parse(s: &'a str) -> Option<Self> {
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() && frac.is_empty() {
            return None;
        }
        if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Decimal { negative, whole, frac })
    }

    /// Integer digits without leading zeros.
    pub fn int_digits(&self) -> usize {
        self.whole.trim_start_matches('0').len()
    }

    pub fn frac_digits(&self) -> usize {
        self.frac.len()
    }
}

/// Text form of a JSON number or string, for `Decimal::parse`.
pub(crate) fn decimal_text(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.trim().to_string()),
        _ => None,
    }
}
