//! Employee record schema and candidate validation
//!
//! Candidates arrive as loose JSON objects from the model. They are normalized
//! with the cleaning rules first, so "thirty" or "JANE@X.com" pass, and only
//! then checked.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clean::rules::{self, AGE_RANGE, SCORE_RANGE};
use crate::clean::Department;
use crate::table::{Table, Value};

/// Field carrying the record identifier
pub const IDENTIFIER_FIELD: &str = "user_id";

/// Alternative spellings models use for the identifier
const IDENTIFIER_ALIASES: &[&str] = &["user_id", "employee_id", "id"];

/// A schema-valid employee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub user_id: i64,
    pub name: String,
    pub age: Option<i64>,
    pub email: Option<String>,
    pub salary: Option<f64>,
    pub join_date: Option<NaiveDate>,
    pub department: Option<Department>,
    pub performance_score: Option<f64>,
    pub location: Option<String>,
    pub job_title: Option<String>,
}

impl Employee {
    pub const COLUMNS: [&'static str; 10] = [
        "user_id",
        "name",
        "age",
        "email",
        "salary",
        "join_date",
        "department",
        "performance_score",
        "location",
        "job_title",
    ];

    pub fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.user_id),
            Value::from(self.name.as_str()),
            self.age.into(),
            self.email.clone().into(),
            self.salary.into(),
            self.join_date.into(),
            self.department.map(|d| d.as_str()).into(),
            self.performance_score.into(),
            self.location.clone().into(),
            self.job_title.clone().into(),
        ]
    }
}

/// Accepted employees as a table
pub fn employees_table(employees: &[Employee]) -> Table {
    let mut table = Table::new(Employee::COLUMNS);
    for employee in employees {
        // Width always matches COLUMNS
        let _ = table.push_row(employee.to_values());
    }
    table
}

/// One failed check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// A record that could not be accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// The record as last seen, JSON-encoded
    pub raw_record: String,
    pub reasons: Vec<String>,
    /// Correction cycles spent on the record
    pub attempts: u32,
}

/// Outcome of validating one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(Employee),
    Invalid {
        /// Identifier text used to match corrections to this record
        identifier: String,
        violations: Vec<FieldViolation>,
    },
    MissingIdentifier,
}

type Record = serde_json::Map<String, serde_json::Value>;

/// True when at least one key names an employee field or identifier alias
pub fn has_employee_fields(record: &Record) -> bool {
    record
        .keys()
        .any(|k| Employee::COLUMNS.contains(&k.as_str()) || IDENTIFIER_ALIASES.contains(&k.as_str()))
}

/// Identifier text of a candidate, or `None` when absent, null or blank.
///
/// Whole floats print as integers so `42.0` and `42` match.
pub fn identifier_key(record: &Record) -> Option<String> {
    let value = IDENTIFIER_ALIASES
        .iter()
        .find_map(|k| record.get(*k).filter(|v| !v.is_null()))?;
    let key = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    };
    (!key.is_empty()).then_some(key)
}

fn field<'a>(record: &'a Record, name: &str) -> Option<&'a serde_json::Value> {
    record.get(name).filter(|v| !v.is_null())
}

/// Collects normalized fields and violations for one candidate
struct Checker<'a> {
    record: &'a Record,
    violations: Vec<FieldViolation>,
}

impl<'a> Checker<'a> {
    fn violation(&mut self, field: &str, reason: impl Into<String>) {
        self.violations.push(FieldViolation::new(field, reason));
    }

    /// Present, non-null value as a cell; empty strings are recorded as violations
    fn cell(&mut self, name: &str) -> Option<Value> {
        let raw = field(self.record, name)?;
        if let serde_json::Value::String(s) = raw {
            if s.trim().is_empty() {
                self.violation(name, "empty string is not allowed; use null");
                return None;
            }
        }
        Some(Value::from_json(raw))
    }

    fn user_id(&mut self) -> i64 {
        let raw = IDENTIFIER_ALIASES
            .iter()
            .find_map(|k| field(self.record, k));
        match raw {
            Some(serde_json::Value::Number(n)) => match n.as_i64() {
                Some(id) => return id,
                None => {
                    if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0) {
                        return f as i64;
                    }
                }
            },
            Some(serde_json::Value::String(s)) => {
                self.violation(
                    IDENTIFIER_FIELD,
                    format!("must be an integer, got string \"{}\"", s),
                );
                return 0;
            }
            _ => {}
        }
        self.violation(
            IDENTIFIER_FIELD,
            format!("must be an integer, got {}", raw.map(|v| v.to_string()).unwrap_or_default()),
        );
        0
    }

    fn name(&mut self) -> String {
        match self.cell("name") {
            Some(Value::String(s)) => rules::title_case_name(&s).unwrap_or_default(),
            Some(other) => {
                self.violation("name", format!("must be a string, got {}", other.type_name()));
                String::new()
            }
            None => {
                if !self.violations.iter().any(|v| v.field == "name") {
                    self.violation("name", "is required");
                }
                String::new()
            }
        }
    }

    fn age(&mut self) -> Option<i64> {
        let cell = self.cell("age")?;
        match rules::parse_age(&cell) {
            Some(age) if AGE_RANGE.contains(&age) => Some(age),
            Some(age) => {
                self.violation(
                    "age",
                    format!("{} is outside {}..={}", age, AGE_RANGE.start(), AGE_RANGE.end()),
                );
                None
            }
            None => {
                self.violation("age", format!("could not read '{}' as an integer", cell));
                None
            }
        }
    }

    fn email(&mut self) -> Option<String> {
        let cell = self.cell("email")?;
        let normalized = rules::normalize_email(&cell.to_string());
        if normalized.is_none() {
            self.violation("email", format!("'{}' is not a valid address", cell));
        }
        normalized
    }

    fn salary(&mut self) -> Option<f64> {
        let cell = self.cell("salary")?;
        match rules::parse_salary_amount(&cell) {
            Some(s) if s >= 0.0 => Some(s),
            Some(s) => {
                self.violation("salary", format!("{} must be >= 0", s));
                None
            }
            None => {
                self.violation("salary", format!("could not read '{}' as an amount", cell));
                None
            }
        }
    }

    fn join_date(&mut self) -> Option<NaiveDate> {
        let cell = self.cell("join_date")?;
        let date = rules::parse_date(&cell);
        if date.is_none() {
            self.violation("join_date", format!("'{}' is not a recognised date (YYYY-MM-DD)", cell));
        }
        date
    }

    fn department(&mut self) -> Option<Department> {
        let cell = self.cell("department")?;
        match Department::lookup(&cell.to_string()) {
            Department::Unknown => {
                self.violation(
                    "department",
                    format!(
                        "'{}' is not one of: {}",
                        cell,
                        Department::allowed_names().join(", ")
                    ),
                );
                None
            }
            dept => Some(dept),
        }
    }

    fn performance_score(&mut self) -> Option<f64> {
        let cell = self.cell("performance_score")?;
        match rules::parse_score(&cell) {
            Some(s) if SCORE_RANGE.contains(&s) => Some(s),
            Some(s) => {
                self.violation(
                    "performance_score",
                    format!("{} is outside {}..={}", s, SCORE_RANGE.start(), SCORE_RANGE.end()),
                );
                None
            }
            None => {
                self.violation("performance_score", format!("could not read '{}' as a number", cell));
                None
            }
        }
    }

    fn text(&mut self, name: &str) -> Option<String> {
        let cell = self.cell(name)?;
        let text = cell.to_string().split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    }
}

/// Normalize and check one candidate record
pub fn validate_candidate(record: &Record) -> Validation {
    let Some(identifier) = identifier_key(record) else {
        return Validation::MissingIdentifier;
    };

    let mut checker = Checker {
        record,
        violations: Vec::new(),
    };
    let user_id = checker.user_id();
    let name = checker.name();
    let age = checker.age();
    let email = checker.email();
    let salary = checker.salary();
    let join_date = checker.join_date();
    let department = checker.department();
    let performance_score = checker.performance_score();
    let location = checker
        .text("location")
        .and_then(|l| rules::canonical_location(&l));
    let job_title = checker.text("job_title");

    if !checker.violations.is_empty() {
        return Validation::Invalid {
            identifier,
            violations: checker.violations,
        };
    }

    Validation::Valid(Employee {
        user_id,
        name,
        age,
        email,
        salary,
        join_date,
        department,
        performance_score,
        location,
        job_title,
    })
}
