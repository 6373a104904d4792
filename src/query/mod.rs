//! Natural-language questions over a table
//!
//! The model only ever produces a [`QueryPlan`]; answers come from
//! [`PlanExecutor`]. Stages run strictly in order:
//! - plan: question + schema + sample rows -> model -> plan
//! - execute: filter, group and aggregate deterministically
//! - explain: optional phrasing of the computed result

pub mod executor;
pub mod guard;
pub mod pipeline;
pub mod plan;

pub use executor::{ExecutionError, ExecutionResult, GroupRow, PlanExecutor, QueryOutput};
pub use pipeline::{QueryAnswer, QueryPipeline};
pub use plan::{AggregateFunction, Comparator, OperationKind, Predicate, QueryPlan};

use crate::llm::LlmError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    /// Planner output was not a well-formed plan
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Question refused before planning
    #[error("Question rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

pub type QueryResult<T> = Result<T, QueryError>;
