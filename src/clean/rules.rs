//! Field-level repair rules
//!
//! Each rule is a pure function from a raw cell (or raw text) to its canonical
//! form, or `None` when the input cannot be repaired without guessing. The
//! cleaning pass and the extraction validator both call into this module.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::RangeInclusive;

use crate::table::Value;

/// Plausible employee age range
pub const AGE_RANGE: RangeInclusive<i64> = 16..=80;

/// Performance score range
pub const SCORE_RANGE: RangeInclusive<f64> = 0.0..=10.0;

/// Minimum similarity for a fuzzy location match
pub const LOCATION_MATCH_THRESHOLD: f64 = 0.88;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}$").expect("email pattern")
});

static AT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(\[at\]|\(at\)|\sat\s)\s*").expect("at pattern"));

static DOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(\[dot\]|\(dot\)|\sdot\s)\s*").expect("dot pattern"));

static SALARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-?[0-9]*\.?[0-9]+)\s*(k|m|thousand|million)?$").expect("salary pattern")
});

const UNITS: &[(&str, i64)] = &[
    ("zero", 0), ("one", 1), ("two", 2), ("three", 3), ("four", 4),
    ("five", 5), ("six", 6), ("seven", 7), ("eight", 8), ("nine", 9),
];

const TEENS: &[(&str, i64)] = &[
    ("ten", 10), ("eleven", 11), ("twelve", 12), ("thirteen", 13), ("fourteen", 14),
    ("fifteen", 15), ("sixteen", 16), ("seventeen", 17), ("eighteen", 18), ("nineteen", 19),
];

const TENS: &[(&str, i64)] = &[
    ("twenty", 20), ("thirty", 30), ("forty", 40), ("fifty", 50),
    ("sixty", 60), ("seventy", 70), ("eighty", 80), ("ninety", 90),
];

const LOCATIONS: &[(&str, &str)] = &[
    ("nyc", "New York"),
    ("new york", "New York"),
    ("new york city", "New York"),
    ("sf", "San Francisco"),
    ("san francisco", "San Francisco"),
    ("chicago", "Chicago"),
    ("seattle", "Seattle"),
    ("boston", "Boston"),
    ("austin", "Austin"),
    ("la", "Los Angeles"),
    ("los angeles", "Los Angeles"),
    ("remote", "Remote"),
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%m/%d/%y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%Y%m%d",
];

fn lookup(words: &[(&str, i64)], word: &str) -> Option<i64> {
    words.iter().find(|(w, _)| *w == word).map(|(_, n)| *n)
}

/// Normalized Levenshtein similarity in `[0, 1]`
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for j in 1..=b.len() {
            let cost = if *ca == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    1.0 - prev[b.len()] as f64 / longest as f64
}

/// Parse digits or an English number below one hundred ("twenty-nine", "thirty").
pub fn parse_word_number(raw: &str) -> Option<i64> {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    if text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse().ok();
    }

    let words: Vec<&str> = text
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty() && *w != "and")
        .collect();
    match words.as_slice() {
        [w] => lookup(UNITS, w).or_else(|| lookup(TEENS, w)).or_else(|| lookup(TENS, w)),
        [tens, unit] => {
            let t = lookup(TENS, tens)?;
            let u = lookup(UNITS, unit).filter(|u| *u > 0)?;
            Some(t + u)
        }
        _ => None,
    }
}

/// Integer view of an age cell, without range checks
pub fn parse_age(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        Value::String(s) => parse_word_number(s).or_else(|| {
            s.trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        }),
        _ => None,
    }
}

/// Age as an integer within `AGE_RANGE`
pub fn normalize_age(value: &Value) -> Option<i64> {
    parse_age(value).filter(|age| AGE_RANGE.contains(age))
}

/// Lowercase, trim and repair common obfuscations; `None` if still not an address.
pub fn normalize_email(raw: &str) -> Option<String> {
    let mut email = raw.trim().to_lowercase();
    if email.is_empty() {
        return None;
    }
    email = AT_RE.replace_all(&email, "@").into_owned();
    email = DOT_RE.replace_all(&email, ".").into_owned();
    email.retain(|c| !c.is_whitespace());
    while email.contains("@@") {
        email = email.replace("@@", "@");
    }
    while email.contains("..") {
        email = email.replace("..", ".");
    }
    EMAIL_RE.is_match(&email).then_some(email)
}

/// Numeric salary, stripping currency markers, separators and scale words.
///
/// Negative amounts parse; range checks belong to the caller.
pub fn parse_salary_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) if f.is_finite() => Some(*f),
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            if lowered.is_empty() || lowered == "nan" {
                return None;
            }
            let stripped: String = lowered
                .replace("usd", "")
                .replace("eur", "")
                .replace("gbp", "")
                .chars()
                .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '€' | '£' | ',' | '_'))
                .collect();
            let caps = SALARY_RE.captures(stripped.trim())?;
            let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
            let scale = match caps.get(2).map(|m| m.as_str()) {
                Some("k") | Some("thousand") => 1_000.0,
                Some("m") | Some("million") => 1_000_000.0,
                _ => 1.0,
            };
            Some(amount * scale)
        }
        _ => None,
    }
}

/// Non-negative salary
pub fn normalize_salary(value: &Value) -> Option<f64> {
    parse_salary_amount(value).filter(|s| *s >= 0.0)
}

/// Parse a calendar date in any of the accepted formats
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::String(s) => parse_date_str(s),
        Value::Integer(i) if *i >= 19000101 => parse_date_str(&i.to_string()),
        _ => None,
    }
}

pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim().trim_end_matches('.');
    if text.is_empty() {
        return None;
    }
    // Datetimes ("2024-01-15T09:30", "2024-01-15 09:30:00"): keep the date part
    let text = match (text.get(..10), text.get(10..11), text.get(11..)) {
        (Some(date), Some("T"), _) => date,
        (Some(date), Some(" "), Some(time)) if time.contains(':') => date,
        _ => text,
    };
    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .find(|d| d.year() >= 1900)
}

/// Trim, collapse inner whitespace and title-case each word
pub fn title_case_name(raw: &str) -> Option<String> {
    let words: Vec<String> = raw
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Map known city spellings onto a canonical name; unknown locations are trimmed only
pub fn canonical_location(raw: &str) -> Option<String> {
    let trimmed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        return None;
    }
    let key = trimmed.to_lowercase();
    if let Some((_, canon)) = LOCATIONS.iter().find(|(alias, _)| *alias == key) {
        return Some(canon.to_string());
    }
    let best = LOCATIONS
        .iter()
        .map(|(alias, canon)| (similarity(&key, alias), *canon))
        .filter(|(score, _)| *score >= LOCATION_MATCH_THRESHOLD)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    Some(best.map(|(_, c)| c.to_string()).unwrap_or(trimmed))
}

/// Numeric score, without range checks
pub fn parse_score(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) if f.is_finite() => Some(*f),
        Value::String(s) => parse_word_number(s)
            .map(|n| n as f64)
            .or_else(|| s.trim().parse::<f64>().ok().filter(|f| f.is_finite())),
        _ => None,
    }
}

/// Score within `SCORE_RANGE`
pub fn normalize_score(value: &Value) -> Option<f64> {
    parse_score(value).filter(|s| SCORE_RANGE.contains(s))
}
