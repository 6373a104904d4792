//! Boundary parse of extraction and correction output

use serde_json::Value as Json;

use super::schema::has_employee_fields;
use crate::llm::extract_json_block;

/// Rejection reported by the model itself
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRejection {
    pub raw_record: String,
    pub reasons: Vec<String>,
}

/// Model output after the boundary parse.
///
/// Downstream code never sees raw text: either candidates were found or the
/// output is malformed with a reason.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Parsed {
        employees: Vec<serde_json::Map<String, Json>>,
        rejected: Vec<ModelRejection>,
    },
    Malformed {
        reason: String,
    },
}

fn malformed(reason: impl Into<String>) -> ModelResponse {
    ModelResponse::Malformed {
        reason: reason.into(),
    }
}

fn records(value: Json, key: &str) -> Result<Vec<serde_json::Map<String, Json>>, String> {
    match value {
        Json::Null => Ok(Vec::new()),
        Json::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                Json::Object(map) => Ok(map),
                other => Err(format!("{}[{}] is not an object: {}", key, idx, other)),
            })
            .collect(),
        other => Err(format!("'{}' must be an array, got {}", key, other)),
    }
}

fn rejection(value: Json) -> ModelRejection {
    let (raw_record, reasons) = match value {
        Json::Object(mut map) => {
            let raw = match map.remove("raw_record") {
                Some(Json::String(s)) => s,
                Some(other) => other.to_string(),
                None => Json::Object(map.clone()).to_string(),
            };
            let reasons = match map.remove("reasons").or_else(|| map.remove("reason")) {
                Some(Json::Array(items)) => items
                    .into_iter()
                    .map(|r| match r {
                        Json::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
                Some(Json::String(s)) => vec![s],
                _ => Vec::new(),
            };
            (raw, reasons)
        }
        Json::String(s) => (s, Vec::new()),
        other => (other.to_string(), Vec::new()),
    };
    ModelRejection {
        raw_record,
        reasons: reasons.into_iter().filter(|r| !r.trim().is_empty()).collect(),
    }
}

impl ModelResponse {
    /// Accepts `{"employees": [...], "rejected": [...]}`, a bare array of
    /// records, or a single record object.
    pub fn parse(output: &str) -> Self {
        let body = extract_json_block(output);
        if body.is_empty() {
            return malformed("empty response");
        }
        let value: Json = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => return malformed(format!("invalid JSON: {}", e)),
        };

        match value {
            Json::Object(mut map) if map.contains_key("employees") || map.contains_key("rejected") => {
                let employees = match records(map.remove("employees").unwrap_or(Json::Null), "employees") {
                    Ok(e) => e,
                    Err(reason) => return malformed(reason),
                };
                let rejected = match map.remove("rejected").unwrap_or(Json::Null) {
                    Json::Null => Vec::new(),
                    Json::Array(items) => items.into_iter().map(rejection).collect(),
                    other => return malformed(format!("'rejected' must be an array, got {}", other)),
                };
                ModelResponse::Parsed { employees, rejected }
            }
            Json::Object(map) if has_employee_fields(&map) => ModelResponse::Parsed {
                employees: vec![map],
                rejected: Vec::new(),
            },
            Json::Object(_) => malformed("object has no employee fields"),
            array @ Json::Array(_) => match records(array, "records") {
                Ok(employees) => ModelResponse::Parsed {
                    employees,
                    rejected: Vec::new(),
                },
                Err(reason) => malformed(reason),
            },
            other => malformed(format!("expected a JSON object or array, got {}", other)),
        }
    }
}
