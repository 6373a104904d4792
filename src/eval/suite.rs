//! Benchmark suite file format

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{EvalError, EvalResult};
use crate::query::QueryPlan;

/// Whether a case runs offline or against the configured model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseMode {
    #[default]
    Deterministic,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetEquals {
    pub column: String,
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarApprox {
    pub value: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_tolerance() -> f64 {
    1e-6
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryExpectation {
    pub set_equals: Option<SetEquals>,
    pub row_count_equals: Option<usize>,
    pub row_count_gte: Option<usize>,
    pub scalar_approx: Option<ScalarApprox>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractExpectation {
    pub accepted_count: Option<usize>,
    pub rejected_count: Option<usize>,
    /// Upper bound on correction cycles
    pub max_attempts_used: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaseKind {
    Query {
        /// Plan executed as-is in deterministic mode
        #[serde(default)]
        plan: Option<QueryPlan>,
        /// Question sent to the planner in llm mode
        #[serde(default)]
        question: Option<String>,
        #[serde(default)]
        expect: QueryExpectation,
    },
    Extract {
        text: String,
        /// Scripted model outputs for deterministic mode, in call order
        #[serde(default)]
        responses: Vec<String>,
        #[serde(default)]
        max_attempts: Option<u32>,
        #[serde(default)]
        expect: ExtractExpectation,
    },
}

impl CaseKind {
    pub fn name(&self) -> &'static str {
        match self {
            CaseKind::Query { .. } => "query",
            CaseKind::Extract { .. } => "extract",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub id: String,
    #[serde(default)]
    pub mode: CaseMode,
    #[serde(flatten)]
    pub kind: CaseKind,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSuite {
    #[serde(default)]
    pub name: Option<String>,
    /// CSV dataset for query cases, relative to the suite file
    #[serde(default)]
    pub dataset: Option<PathBuf>,
    /// Run the cleaning normalizer over the dataset before querying
    #[serde(default = "default_true")]
    pub clean_dataset: bool,
    pub cases: Vec<BenchmarkCase>,
}

impl BenchmarkSuite {
    /// Load a suite; `.json` is read as JSON, anything else as YAML
    pub fn load(path: &Path) -> EvalResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json(&text)
        } else {
            Self::from_yaml(&text)
        }
    }

    pub fn from_json(text: &str) -> EvalResult<Self> {
        serde_json::from_str(text).map_err(|e| EvalError::Parse(e.to_string()))
    }

    pub fn from_yaml(text: &str) -> EvalResult<Self> {
        serde_yaml::from_str(text).map_err(|e| EvalError::Parse(e.to_string()))
    }

    /// Dataset path resolved against the directory holding the suite file
    pub fn dataset_path(&self, suite_path: &Path) -> Option<PathBuf> {
        let dataset = self.dataset.as_ref()?;
        if dataset.is_absolute() {
            return Some(dataset.clone());
        }
        Some(
            suite_path
                .parent()
                .map(|dir| dir.join(dataset))
                .unwrap_or_else(|| dataset.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::OperationKind;

    #[test]
    fn test_parse_yaml_suite() {
        let suite = BenchmarkSuite::from_yaml(
            r#"
name: smoke
dataset: employees.csv
cases:
  - id: eng-count
    kind: query
    plan:
      operation: aggregate
      aggregation: count
      target: user_id
      predicate: {field: department, op: eq, value: Engineering}
    expect:
      scalar_approx: {value: 3}
  - id: ask
    mode: llm
    kind: query
    question: how many people work in Sales?
  - id: extract-one
    kind: extract
    text: "Employee 42, Jane Doe"
    responses: ['{"employees": [{"user_id": 42, "name": "Jane Doe"}]}']
    expect: {accepted_count: 1, max_attempts_used: 0}
"#,
        )
        .unwrap();

        assert_eq!(suite.cases.len(), 3);
        assert!(suite.clean_dataset);
        let CaseKind::Query { plan: Some(plan), expect, .. } = &suite.cases[0].kind else {
            panic!("expected a query case with a plan");
        };
        assert_eq!(plan.operation, OperationKind::Aggregate);
        assert_eq!(expect.scalar_approx.as_ref().map(|s| s.tolerance), Some(1e-6));
        assert_eq!(suite.cases[1].mode, CaseMode::Llm);
        assert_eq!(suite.cases[2].kind.name(), "extract");
        assert_eq!(
            suite.dataset_path(Path::new("/bench/suite.yaml")),
            Some(PathBuf::from("/bench/employees.csv"))
        );
    }
}
