//! Refusal of prompt-injection questions before they reach the planner

use once_cell::sync::Lazy;
use regex::Regex;

/// Message returned for refused questions
pub const REFUSAL: &str =
    "That request looks like a prompt-injection attempt. Only questions about the loaded dataset are answered.";

static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"ignore\s+(all|any|the)?\s*(previous|prior|above)",
        r"disregard\s+(all|any|the)?\s*(previous|prior|above)",
        r"system\s+prompt",
        r"reveal.*(key|secret|token|password)",
        r"exfiltrat",
        r"prompt\s+injection",
        r"you\s+are\s+now\s+",
    ]
    .iter()
    .filter_map(|p| Regex::new(&format!("(?i){}", p)).ok())
    .collect()
});

/// The pattern a question trips, if any
pub fn injection_match(question: &str) -> Option<&'static str> {
    INJECTION_PATTERNS
        .iter()
        .find(|re| re.is_match(question))
        .map(|re| re.as_str())
}

pub fn is_injection(question: &str) -> bool {
    injection_match(question).is_some()
}
