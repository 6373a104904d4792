//! Cleaning normalizer
//!
//! Applies deterministic field repairs to a raw table. The output always has
//! the same rows as the input; every changed cell is recorded as an
//! [`AuditEntry`] naming the rule that changed it.

pub mod department;
pub mod rules;

pub use department::Department;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::table::{Table, Value};

/// Column names that identify a row in audit entries
pub const ID_COLUMNS: &[&str] = &["user_id", "employee_id", "id"];

/// Fields the normalizer knows how to repair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Name,
    Age,
    Email,
    Salary,
    JoinDate,
    Department,
    Location,
    PerformanceScore,
}

impl FieldRule {
    pub const ALL: [FieldRule; 8] = [
        FieldRule::Name,
        FieldRule::Age,
        FieldRule::Email,
        FieldRule::Salary,
        FieldRule::JoinDate,
        FieldRule::Department,
        FieldRule::Location,
        FieldRule::PerformanceScore,
    ];

    /// Header spellings this rule applies to
    pub fn column_names(&self) -> &'static [&'static str] {
        match self {
            FieldRule::Name => &["name", "full_name"],
            FieldRule::Age => &["age"],
            FieldRule::Email => &["email", "email_address"],
            FieldRule::Salary => &["salary", "annual_salary"],
            FieldRule::JoinDate => &["join_date", "joined", "start_date"],
            FieldRule::Department => &["department", "dept"],
            FieldRule::Location => &["location", "city"],
            FieldRule::PerformanceScore => &["performance_score", "performance"],
        }
    }

    /// Rule identifier used in audit entries and fix counts
    pub fn rule_name(&self) -> &'static str {
        match self {
            FieldRule::Name => "name_normalized",
            FieldRule::Age => "age_parsed",
            FieldRule::Email => "email_cleaned",
            FieldRule::Salary => "salary_cleaned",
            FieldRule::JoinDate => "join_date_normalized",
            FieldRule::Department => "department_standardized",
            FieldRule::Location => "location_standardized",
            FieldRule::PerformanceScore => "performance_parsed",
        }
    }

    /// Canonical form of one cell
    pub fn apply(&self, value: &Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }
        let text = value.to_string();
        match self {
            FieldRule::Name => rules::title_case_name(&text).into(),
            FieldRule::Age => rules::normalize_age(value).into(),
            FieldRule::Email => rules::normalize_email(&text).into(),
            FieldRule::Salary => rules::normalize_salary(value).into(),
            FieldRule::JoinDate => rules::parse_date(value).into(),
            FieldRule::Department => Value::from(Department::lookup(&text).as_str()),
            FieldRule::Location => rules::canonical_location(&text).into(),
            FieldRule::PerformanceScore => rules::normalize_score(value).into(),
        }
    }
}

/// One corrected cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Zero-based row index in the input table
    pub row: usize,
    /// Identifier column value for the row, when the table has one
    pub record_id: Option<String>,
    pub field: String,
    pub original: Value,
    pub corrected: Value,
    pub rule: &'static str,
}

/// Summary of a cleaning pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleaningReport {
    pub rows: usize,
    /// Rule name -> number of cells it changed
    pub fixes: IndexMap<String, usize>,
    pub warnings: Vec<String>,
}

/// Output of [`clean_table`]
#[derive(Debug, Clone, Serialize)]
pub struct CleaningOutcome {
    pub table: Table,
    pub audit: Vec<AuditEntry>,
    pub report: CleaningReport,
}

/// Clean every recognised column of `raw`, returning a new table plus its audit trail.
pub fn clean_table(raw: &Table) -> CleaningOutcome {
    let mut table = raw.clone();
    let mut audit = Vec::new();
    let mut report = CleaningReport {
        rows: raw.len(),
        ..CleaningReport::default()
    };

    let id_col = raw.resolve_any(ID_COLUMNS);

    for rule in FieldRule::ALL {
        let Some(col) = raw.resolve_any(rule.column_names()) else {
            continue;
        };
        let field = raw.columns()[col].clone();
        let mut fixes = 0usize;
        let mut nulled = 0usize;
        let mut unknown = 0usize;

        for (row, cells) in raw.rows().iter().enumerate() {
            let original = &cells[col];
            let corrected = rule.apply(original);

            if !original.is_null() && !original.to_string().trim().is_empty() && corrected.is_null() {
                nulled += 1;
            }
            if rule == FieldRule::Department && corrected.as_str() == Some(Department::Unknown.as_str()) {
                unknown += 1;
            }
            // Only textual changes are audited: Float(29.0) -> Integer(29) is not a correction.
            let changed = original.to_string() != corrected.to_string();
            table.set(row, col, corrected.clone());
            if !changed {
                continue;
            }

            fixes += 1;
            audit.push(AuditEntry {
                row,
                record_id: id_col
                    .and_then(|c| cells.get(c))
                    .filter(|v| !v.is_null())
                    .map(|v| v.to_string()),
                field: field.clone(),
                original: original.clone(),
                corrected,
                rule: rule.rule_name(),
            });
        }

        debug!("Rule {} changed {} cell(s) in column '{}'", rule.rule_name(), fixes, field);
        report.fixes.insert(rule.rule_name().to_string(), fixes);
        if nulled > 0 {
            report.warnings.push(format!(
                "{} value(s) in '{}' could not be repaired and were set to null",
                nulled, field
            ));
        }
        if unknown > 0 {
            report.warnings.push(format!(
                "{} value(s) in '{}' did not match a known department and were set to Unknown",
                unknown, field
            ));
        }
    }

    info!(
        "Cleaned {} row(s): {} correction(s), {} warning(s)",
        report.rows,
        audit.len(),
        report.warnings.len()
    );

    CleaningOutcome { table, audit, report }
}
