//! Field validation for aggregated records.
//!
//! Invalid values are nulled and explained in a note; records themselves are
//! never dropped. Dates are normalised to `YYYY-MM-DD` when they are
//! unambiguous (ISO, RFC 3339, or written with a month name). Purely numeric
//! forms such as `03/04/2024` are rejected because day and month cannot be
//! told apart.

use crate::model::{Deliverable, Milestone, PaymentTerm};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

const MONTH_NAME_FORMATS: &[&str] = &[
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%d-%b-%Y",
    "%d-%B-%Y",
];

static RE_ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").unwrap());

static RE_PERCENTAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(?:\.\d+)?\s*%?$").unwrap());

static RE_ISO_CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(USD|EUR|GBP|CAD|AUD|NZD|CHF|JPY|CNY|INR|SGD|HKD|SEK|NOK|DKK|ZAR|BRL|MXN)\b")
        .unwrap()
});

/// Normalise a date to ISO-8601, or `None` when it is not a real,
/// unambiguous date.
pub fn normalize_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date().format("%Y-%m-%d").to_string());
    }

    let cleaned = RE_ORDINAL_SUFFIX.replace_all(s, "$1").replace([',', '.'], " ");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    MONTH_NAME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

pub fn is_valid_percentage(raw: &str) -> bool {
    RE_PERCENTAGE.is_match(raw.trim())
}

pub fn is_valid_amount(raw: &str) -> bool {
    raw.chars().any(|c| c.is_ascii_digit())
}

/// ISO-4217 code implied by an amount string.
pub fn infer_currency(amount: &str) -> Option<&'static str> {
    let a = amount.trim();
    if let Some(caps) = RE_ISO_CURRENCY.captures(&a.to_ascii_uppercase()) {
        return ISO_CODES.iter().copied().find(|c| *c == &caps[1]);
    }
    let symbols: &[(&str, &str)] = &[
        ("US$", "USD"),
        ("C$", "CAD"),
        ("CA$", "CAD"),
        ("A$", "AUD"),
        ("AU$", "AUD"),
        ("NZ$", "NZD"),
        ("$", "USD"),
        ("€", "EUR"),
        ("£", "GBP"),
        ("¥", "JPY"),
        ("₹", "INR"),
    ];
    symbols
        .iter()
        .find(|(sym, _)| a.starts_with(sym) || a.ends_with(sym))
        .map(|(_, code)| *code)
}

const ISO_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "CAD", "AUD", "NZD", "CHF", "JPY", "CNY", "INR", "SGD", "HKD", "SEK",
    "NOK", "DKK", "ZAR", "BRL", "MXN",
];

/// Collects notes while validating one record.
struct Checker<'a> {
    notes: &'a mut Vec<String>,
    label: String,
}

impl Checker<'_> {
    fn date(&mut self, field: &str, value: &mut Option<String>) {
        let Some(raw) = value.take() else { return };
        match normalize_date(&raw) {
            Some(iso) => *value = Some(iso),
            None => self
                .notes
                .push(format!("{}: {field} {raw:?} is not a valid date, nulled", self.label)),
        }
    }

    fn percentage(&mut self, field: &str, value: &mut Option<String>) {
        if let Some(raw) = value.as_deref() {
            if !is_valid_percentage(raw) {
                self.notes
                    .push(format!("{}: {field} {raw:?} is not a percentage, nulled", self.label));
                *value = None;
            }
        }
    }

    fn amount(&mut self, field: &str, value: &mut Option<String>) {
        if let Some(raw) = value.as_deref() {
            if !is_valid_amount(raw) {
                self.notes
                    .push(format!("{}: {field} {raw:?} is not an amount, nulled", self.label));
                *value = None;
            }
        }
    }
}

pub fn validate_milestone(m: &mut Milestone, notes: &mut Vec<String>) {
    let mut c = Checker {
        notes,
        label: format!("milestone {:?}", m.name),
    };
    c.date("due_date", &mut m.due_date);
    c.amount("payment_amount", &mut m.payment_amount);
    c.percentage("payment_percentage", &mut m.payment_percentage);
}

pub fn validate_deliverable(d: &mut Deliverable, notes: &mut Vec<String>) {
    let mut c = Checker {
        notes,
        label: format!("deliverable {:?}", d.name),
    };
    c.date("delivery_date", &mut d.delivery_date);
}

pub fn validate_payment(p: &mut PaymentTerm, notes: &mut Vec<String>) {
    let mut c = Checker {
        notes,
        label: format!("payment term {:?}", p.dedup_name()),
    };
    c.date("due_date", &mut p.due_date);
    c.amount("amount", &mut p.amount);
    c.percentage("percentage", &mut p.percentage);
    if p.currency.is_none() {
        p.currency = p.amount.as_deref().and_then(infer_currency).map(str::to_string);
    }
}
