//! Validata
//!
//! Deterministic cleaning of tabular HR records, natural-language questions
//! answered by model-planned but deterministically executed query plans, and
//! structured record extraction with a bounded validation/correction loop.
//!
//! # Architecture
//!
//! - `table`: in-memory tables and CSV I/O
//! - `clean`: field normalization rules and the audited cleaning pass
//! - `llm`: the model client seam (`LlmClient`) with HTTP and scripted clients
//! - `query`: plan parsing, execution and the plan/execute/explain pipeline
//! - `agent`: the extract/validate/correct/finalize loop
//! - `eval`: benchmark suites over deterministic and model-backed cases
//! - `http`: JSON API
//! - `config`: file and environment configuration
//!
//! ## Example Usage
//!
//! ```rust
//! use validata::clean::clean_table;
//! use validata::query::{AggregateFunction, Comparator, PlanExecutor, Predicate, QueryPlan};
//! use validata::table::csv::read_csv_str;
//!
//! let raw = read_csv_str("user_id,department,salary\n1,eng,\"$100,000\"\n2,Sales,50k\n").unwrap();
//! let cleaned = clean_table(&raw);
//! assert_eq!(cleaned.table.len(), 2);
//!
//! let plan = QueryPlan::aggregate(
//!     Some(Predicate::new("department", Comparator::Eq, "Engineering".into())),
//!     AggregateFunction::Mean,
//!     "salary",
//! );
//! let output = PlanExecutor::default().execute(&plan, &cleaned.table).unwrap();
//! assert_eq!(output.scalar().and_then(|v| v.as_f64()), Some(100_000.0));
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod clean;
pub mod config;
pub mod eval;
pub mod http;
pub mod llm;
pub mod query;
pub mod table;

// Re-export main types for convenience
pub use agent::{AgentError, AgentResult, Employee, RejectedRecord, SelfCorrectingAgent};
pub use clean::{clean_table, AuditEntry, CleaningOutcome, CleaningReport, Department};
pub use config::{AppConfig, ConfigError, LlmConfig, LlmProvider};
pub use eval::{BenchmarkRunner, BenchmarkSuite, SuiteReport};
pub use http::{AppState, HttpServer};
pub use llm::{HttpLlmClient, LlmClient, LlmError, LlmRequest, ScriptedLlmClient};
pub use query::{PlanExecutor, QueryError, QueryOutput, QueryPipeline, QueryPlan};
pub use table::{Table, TableError, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

/// Build the configured model client, or `None` when the provider needs a key that is missing
pub fn build_client(config: &LlmConfig) -> Result<Option<std::sync::Arc<dyn LlmClient>>, LlmError> {
    let needs_key = matches!(config.provider, LlmProvider::OpenAI | LlmProvider::Gemini);
    if needs_key && config.api_key.is_none() {
        return Ok(None);
    }
    let client = HttpLlmClient::new(config)?;
    Ok(Some(std::sync::Arc::new(client)))
}
