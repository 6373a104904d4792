//! Department enumeration and free-text lookup

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::rules::similarity;

/// Minimum similarity for a fuzzy department match
pub const DEPARTMENT_MATCH_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Department {
    ArtificialIntelligence,
    AiMl,
    MachineLearning,
    DataScience,
    Engineering,
    HumanResources,
    Finance,
    Sales,
    Marketing,
    Operations,
    Unknown,
}

const ALIASES: &[(&str, Department)] = &[
    ("ai", Department::ArtificialIntelligence),
    ("artificial intelligence", Department::ArtificialIntelligence),
    ("ai/ml", Department::AiMl),
    ("ai-ml", Department::AiMl),
    ("ai ml", Department::AiMl),
    ("aiml", Department::AiMl),
    ("ml", Department::MachineLearning),
    ("machine learning", Department::MachineLearning),
    ("data science", Department::DataScience),
    ("datascience", Department::DataScience),
    ("ds", Department::DataScience),
    ("engineering", Department::Engineering),
    ("eng", Department::Engineering),
    ("software engineering", Department::Engineering),
    ("hr", Department::HumanResources),
    ("human resources", Department::HumanResources),
    ("people ops", Department::HumanResources),
    ("finance", Department::Finance),
    ("accounting", Department::Finance),
    ("sales", Department::Sales),
    ("marketing", Department::Marketing),
    ("mktg", Department::Marketing),
    ("operations", Department::Operations),
    ("ops", Department::Operations),
];

impl Department {
    /// Every assignable department, excluding the `Unknown` fallback
    pub const KNOWN: [Department; 10] = [
        Department::ArtificialIntelligence,
        Department::AiMl,
        Department::MachineLearning,
        Department::DataScience,
        Department::Engineering,
        Department::HumanResources,
        Department::Finance,
        Department::Sales,
        Department::Marketing,
        Department::Operations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Department::ArtificialIntelligence => "Artificial Intelligence",
            Department::AiMl => "AI/ML",
            Department::MachineLearning => "Machine Learning",
            Department::DataScience => "Data Science",
            Department::Engineering => "Engineering",
            Department::HumanResources => "Human Resources",
            Department::Finance => "Finance",
            Department::Sales => "Sales",
            Department::Marketing => "Marketing",
            Department::Operations => "Operations",
            Department::Unknown => "Unknown",
        }
    }

    /// Map free text onto the enumeration.
    ///
    /// Exact canonical names and aliases match case-insensitively, then the
    /// closest alias above `DEPARTMENT_MATCH_THRESHOLD` is taken. Anything else
    /// is `Unknown`.
    pub fn lookup(raw: &str) -> Department {
        let key = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if key.is_empty() {
            return Department::Unknown;
        }
        if let Some(dept) = Self::KNOWN.iter().find(|d| d.as_str().to_lowercase() == key) {
            return *dept;
        }
        if let Some((_, dept)) = ALIASES.iter().find(|(alias, _)| *alias == key) {
            return *dept;
        }

        let mut best: Option<(f64, Department)> = None;
        for (alias, dept) in ALIASES {
            let score = similarity(&key, alias);
            if score >= DEPARTMENT_MATCH_THRESHOLD && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, *dept));
            }
        }
        best.map(|(_, d)| d).unwrap_or(Department::Unknown)
    }

    pub fn allowed_names() -> Vec<&'static str> {
        Self::KNOWN.iter().map(|d| d.as_str()).collect()
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Department {
    type Err = String;

    /// Strict parse of a canonical name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::KNOWN
            .iter()
            .chain(std::iter::once(&Department::Unknown))
            .find(|d| d.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown department '{}'", s))
    }
}

impl Serialize for Department {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Department {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Department::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_lookup() {
        assert_eq!(Department::lookup("AI"), Department::ArtificialIntelligence);
        assert_eq!(Department::lookup("  data   Science "), Department::DataScience);
        assert_eq!(Department::lookup("DataScience"), Department::DataScience);
        assert_eq!(Department::lookup("ML"), Department::MachineLearning);
        assert_eq!(Department::lookup("engineering"), Department::Engineering);
    }

    #[test]
    fn test_fuzzy_lookup() {
        assert_eq!(Department::lookup("Enginering"), Department::Engineering);
        assert_eq!(Department::lookup("Machine Learnig"), Department::MachineLearning);
        assert_eq!(Department::lookup("Underwater Basketry"), Department::Unknown);
        assert_eq!(Department::lookup(""), Department::Unknown);
    }

    #[test]
    fn test_serde_uses_display_names() {
        let json = serde_json::to_string(&Department::AiMl).unwrap();
        assert_eq!(json, "\"AI/ML\"");
        let back: Department = serde_json::from_str("\"Data Science\"").unwrap();
        assert_eq!(back, Department::DataScience);
        assert!(serde_json::from_str::<Department>("\"ai\"").is_err());
    }
}
