//! Benchmark suite runner
//!
//! Deterministic cases run offline: query cases execute a fixed plan, extract
//! cases replay scripted model outputs. Llm-mode cases use the configured
//! client and are smoke tests only.

pub mod suite;

pub use suite::{
    BenchmarkCase, BenchmarkSuite, CaseKind, CaseMode, ExtractExpectation, QueryExpectation,
    ScalarApprox, SetEquals,
};

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::agent::{AgentResult, SelfCorrectingAgent};
use crate::config::AppConfig;
use crate::llm::{LlmClient, ScriptedLlmClient};
use crate::query::{PlanExecutor, QueryOutput, QueryPipeline};
use crate::table::{Table, TableError, Value};

/// Failure detail for llm-mode cases without a client
pub const NO_CLIENT: &str = "no LLM client configured";

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Suite parse error: {0}")]
    Parse(String),

    #[error("Dataset error: {0}")]
    Table(#[from] TableError),
}

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub id: String,
    pub kind: &'static str,
    pub mode: CaseMode,
    pub passed: bool,
    /// Failed checks, or a one-line summary when the case passed
    pub details: Vec<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub name: Option<String>,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }
}

fn value_keys(values: impl IntoIterator<Item = Value>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|v| v.to_string().trim().to_lowercase())
        .collect()
}

/// Checks for a query result; an empty vector means every expectation held
pub fn check_query(expect: &QueryExpectation, output: &QueryOutput) -> Vec<String> {
    let mut failures = Vec::new();
    let rows = output.row_count();

    if let Some(expected) = expect.row_count_equals {
        if rows != expected {
            failures.push(format!("row_count_equals: expected {}, got {}", expected, rows));
        }
    }
    if let Some(minimum) = expect.row_count_gte {
        if rows < minimum {
            failures.push(format!("row_count_gte: expected at least {}, got {}", minimum, rows));
        }
    }
    if let Some(set) = &expect.set_equals {
        match output.column_values(&set.column) {
            Some(values) => {
                let got = value_keys(values);
                let want = value_keys(set.values.iter().map(Value::from_json));
                if got != want {
                    failures.push(format!(
                        "set_equals on '{}': expected {:?}, got {:?}",
                        set.column, want, got
                    ));
                }
            }
            None => failures.push(format!("set_equals: result has no column '{}'", set.column)),
        }
    }
    if let Some(approx) = &expect.scalar_approx {
        match output.scalar().map(|v| (v, v.as_f64())) {
            Some((_, Some(got))) if (got - approx.value).abs() <= approx.tolerance => {}
            Some((value, _)) => failures.push(format!(
                "scalar_approx: expected {} +/- {}, got {}",
                approx.value,
                approx.tolerance,
                if value.is_null() { "null".to_string() } else { value.to_string() }
            )),
            None => failures.push("scalar_approx: result is not a scalar".to_string()),
        }
    }
    failures
}

/// Checks for an extraction result
pub fn check_extract(expect: &ExtractExpectation, result: &AgentResult) -> Vec<String> {
    let mut failures = Vec::new();
    if let Some(expected) = expect.accepted_count {
        if result.accepted.len() != expected {
            failures.push(format!(
                "accepted_count: expected {}, got {}",
                expected,
                result.accepted.len()
            ));
        }
    }
    if let Some(expected) = expect.rejected_count {
        if result.rejected.len() != expected {
            failures.push(format!(
                "rejected_count: expected {}, got {}",
                expected,
                result.rejected.len()
            ));
        }
    }
    if let Some(bound) = expect.max_attempts_used {
        if result.total_attempts > bound {
            failures.push(format!(
                "max_attempts_used: expected at most {}, used {}",
                bound, result.total_attempts
            ));
        }
    }
    failures
}

pub struct BenchmarkRunner {
    config: AppConfig,
    table: Option<Table>,
    client: Option<Arc<dyn LlmClient>>,
}

impl BenchmarkRunner {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            table: None,
            client: None,
        }
    }

    /// Dataset for query cases
    pub fn with_table(mut self, table: Table) -> Self {
        self.table = Some(table);
        self
    }

    /// Client for llm-mode cases
    pub fn with_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub async fn run(&self, suite: &BenchmarkSuite) -> SuiteReport {
        let mut report = SuiteReport {
            name: suite.name.clone(),
            results: Vec::with_capacity(suite.cases.len()),
        };
        for case in &suite.cases {
            let started = Instant::now();
            let outcome = self.run_case(case).await;
            let (passed, details) = match outcome {
                Ok(summary) => (true, vec![summary]),
                Err(failures) => (false, failures),
            };
            if passed {
                info!("Case {} passed", case.id);
            } else {
                warn!("Case {} failed: {}", case.id, details.join("; "));
            }
            report.results.push(CaseResult {
                id: case.id.clone(),
                kind: case.kind.name(),
                mode: case.mode,
                passed,
                details,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
        info!(
            "Suite finished: {}/{} case(s) passed",
            report.passed(),
            report.total()
        );
        report
    }

    fn llm_client(&self) -> Result<Arc<dyn LlmClient>, Vec<String>> {
        self.client.clone().ok_or_else(|| vec![NO_CLIENT.to_string()])
    }

    /// `Ok(summary)` when every check held, `Err(failures)` otherwise
    async fn run_case(&self, case: &BenchmarkCase) -> Result<String, Vec<String>> {
        match (&case.kind, case.mode) {
            (CaseKind::Query { plan, question, expect }, mode) => {
                let table = self
                    .table
                    .as_ref()
                    .ok_or_else(|| vec!["no dataset loaded for query case".to_string()])?;

                let output = match mode {
                    CaseMode::Deterministic => {
                        let plan = plan
                            .as_ref()
                            .ok_or_else(|| vec!["deterministic query case needs a plan".to_string()])?;
                        plan.validate().map_err(|e| vec![e.to_string()])?;
                        PlanExecutor::new(self.config.query.default_limit)
                            .execute(plan, table)
                            .map_err(|e| vec![e.to_string()])?
                    }
                    CaseMode::Llm => {
                        let client = self.llm_client()?;
                        let question = question
                            .as_deref()
                            .ok_or_else(|| vec!["llm query case needs a question".to_string()])?;
                        let pipeline = QueryPipeline::new(client, &self.config.query);
                        let plan = pipeline.plan(question, table).await.map_err(|e| vec![e.to_string()])?;
                        pipeline.execute(&plan, table).map_err(|e| vec![e.to_string()])?
                    }
                };

                let failures = check_query(expect, &output);
                if failures.is_empty() {
                    Ok(format!("{} result row(s)", output.row_count()))
                } else {
                    Err(failures)
                }
            }

            (CaseKind::Extract { text, responses, max_attempts, expect }, mode) => {
                let max_attempts = max_attempts.unwrap_or(self.config.agent.max_attempts);
                let run = match mode {
                    CaseMode::Deterministic => {
                        let client = ScriptedLlmClient::new(responses.iter().cloned());
                        SelfCorrectingAgent::new(client, &self.config.agent)
                            .with_max_attempts(max_attempts)
                            .run(text)
                            .await
                    }
                    CaseMode::Llm => {
                        SelfCorrectingAgent::new(self.llm_client()?, &self.config.agent)
                            .with_max_attempts(max_attempts)
                            .run(text)
                            .await
                    }
                };
                let result = run.map_err(|e| vec![e.to_string()])?;

                let failures = check_extract(expect, &result);
                if failures.is_empty() {
                    Ok(format!(
                        "{} accepted, {} rejected, {} correction(s)",
                        result.accepted.len(),
                        result.rejected.len(),
                        result.total_attempts
                    ))
                } else {
                    Err(failures)
                }
            }
        }
    }
}
