//! HTTP handlers for the JSON API

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::AppState;
use crate::agent::SelfCorrectingAgent;
use crate::clean::clean_table;
use crate::query::{QueryError, QueryPipeline, QueryPlan};
use crate::table::csv::read_csv_str;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn query_status(err: &QueryError) -> StatusCode {
    match err {
        QueryError::Rejected(_) => StatusCode::BAD_REQUEST,
        QueryError::PlanParse(_) | QueryError::UnsupportedOperation(_) | QueryError::Execution(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        QueryError::Llm(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Clean an uploaded CSV body and make it the active table
pub async fn clean_handler(State(state): State<AppState>, body: String) -> Response {
    let raw = match read_csv_str(&body) {
        Ok(table) => table,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let outcome = clean_table(&raw);
    let response = json!({
        "rows": outcome.table.len(),
        "columns": outcome.table.columns(),
        "audit": outcome.audit,
        "report": outcome.report,
        "table": outcome.table,
    });
    *state.table.write().await = Some(outcome.table);
    info!("Active table replaced with {} cleaned row(s)", raw.len());

    Json(response).into_response()
}

/// Either a question for the planner or a ready-made plan
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub plan: Option<QueryPlan>,
}

pub async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryRequest>,
) -> Response {
    let Some(table) = state.snapshot().await else {
        return error_response(StatusCode::CONFLICT, "no table loaded; POST a CSV to /api/clean first");
    };

    if let Some(plan) = payload.plan {
        let executor = crate::query::PlanExecutor::new(state.config.query.default_limit);
        let result = plan
            .validate()
            .and_then(|_| executor.execute(&plan, &table).map_err(QueryError::from));
        return match result {
            Ok(output) => Json(json!({ "plan": plan, "output": output })).into_response(),
            Err(e) => error_response(query_status(&e), e.to_string()),
        };
    }

    let Some(question) = payload.question else {
        return error_response(StatusCode::BAD_REQUEST, "request needs a question or a plan");
    };
    let Some(client) = state.client.clone() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "no LLM client configured");
    };

    let pipeline = QueryPipeline::new(client, &state.config.query);
    match pipeline.answer(&question, &table).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => {
            warn!("Query failed: {}", e);
            error_response(query_status(&e), e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub text: String,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

pub async fn extract_handler(
    State(state): State<AppState>,
    Json(payload): Json<ExtractRequest>,
) -> Response {
    let Some(client) = state.client.clone() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "no LLM client configured");
    };

    // Requests may lower the configured limit, never raise it
    let cap = state.config.agent.max_attempts;
    let max_attempts = payload.max_attempts.map_or(cap, |n| n.min(cap));
    let agent = SelfCorrectingAgent::new(client, &state.config.agent).with_max_attempts(max_attempts);
    match agent.run(&payload.text).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let table = state.table.read().await;
    let table_info = table
        .as_ref()
        .map(|t| json!({ "rows": t.len(), "columns": t.columns() }));
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "table": table_info,
        "llm": {
            "configured": state.client.is_some(),
            "provider": state.config.llm.provider,
            "model": state.config.llm.model,
        },
        "agent": { "max_attempts": state.config.agent.max_attempts },
    }))
}
