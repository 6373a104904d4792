//! Self-correcting record extraction
//!
//! A bounded loop over an explicit state enum:
//! - `Extract`: one model call turns free text into candidate records
//! - `Validate`: candidates are normalized and checked against the schema
//! - `Correct`: invalid records go back to the model with their violations
//! - `Finalize`: partition into accepted and rejected
//!
//! `Correct` runs at most `max_attempts` times per run. Records without an
//! identifier are rejected immediately and never sent for correction.

pub mod response;
pub mod schema;

pub use response::{ModelRejection, ModelResponse};
pub use schema::{validate_candidate, Employee, FieldViolation, RejectedRecord, Validation};

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clean::Department;
use crate::config::AgentSettings;
use crate::llm::{truncate_for_log, LlmClient, LlmError, LlmRequest, MAX_LOG_CHARS};
use schema::{identifier_key, IDENTIFIER_FIELD};

/// Reason attached to records that arrive without an identifier
pub const MISSING_IDENTIFIER_REASON: &str = "missing identifier (user_id)";

/// Reason used when the model rejects a record without saying why
pub const EXTRACTOR_REJECTED_REASON: &str = "rejected by extractor";

const EXTRACT_PROMPT: &str = r#"You extract employee records from free text.
Reply with JSON only, shaped as:
{"employees": [{"user_id": int, "name": string, "age": int|null, "email": string|null,
  "salary": number|null, "join_date": "YYYY-MM-DD"|null, "department": string|null,
  "performance_score": number|null, "location": string|null, "job_title": string|null}],
 "rejected": [{"raw_record": string, "reasons": [string]}]}
Rules:
- Never invent a user_id. A record whose id is absent or unclear goes to "rejected".
- Do not guess from vague wording ("maybe", "around", "probably"); use null instead.
- Use null for missing values, never an empty string.
- department must be one of "allowed_departments" or null.
- Convert word numbers to digits and dates to YYYY-MM-DD when unambiguous."#;

const CORRECT_PROMPT: &str = r#"You repair employee records that failed validation.
You get the records you produced earlier and the exact violations for each one.
Reply with JSON only, in the same {"employees": [...], "rejected": [...]} shape.
Rules:
- Keep each record's user_id unchanged. Never add records that were not given to you.
- Fix only the fields named in the violations. Use null where a value cannot be fixed.
- If a record cannot be made valid without guessing, move it to "rejected" with reasons."#;

#[derive(Error, Debug)]
pub enum AgentError {
    /// The extraction call failed at transport level
    #[error("Extraction call failed: {0}")]
    Llm(#[from] LlmError),
}

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Extract,
    Validate,
    Correct,
    Finalize,
}

/// One correction cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionAttempt {
    pub attempt: u32,
    /// Records sent for correction, JSON-encoded
    pub prior_json: String,
    /// Violations sent with them, verbatim
    pub violations: Vec<String>,
    /// Model output for this cycle
    pub resulting_json: String,
}

/// Ordered loop events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum LogEntry {
    Extract {
        output: String,
    },
    ExtractionError {
        reason: String,
    },
    Validate {
        attempt: u32,
        accepted: usize,
        invalid: usize,
        missing_identifier: usize,
    },
    Correct(CorrectionAttempt),
    CorrectionError {
        attempt: u32,
        reason: String,
    },
    /// A corrected record that did not match any pending record
    Discarded {
        attempt: u32,
        identifier: Option<String>,
        reason: String,
    },
}

/// Outcome of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentResult {
    pub accepted: Vec<Employee>,
    pub rejected: Vec<RejectedRecord>,
    pub log: Vec<LogEntry>,
    /// Correction cycles used
    pub total_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,
}

impl AgentResult {
    /// Correction cycles recorded in the log
    pub fn corrections(&self) -> impl Iterator<Item = &CorrectionAttempt> {
        self.log.iter().filter_map(|entry| match entry {
            LogEntry::Correct(attempt) => Some(attempt),
            _ => None,
        })
    }
}

/// A record waiting for correction
#[derive(Debug, Clone)]
struct Pending {
    identifier: String,
    record: serde_json::Map<String, serde_json::Value>,
    violations: Vec<FieldViolation>,
    attempts: u32,
}

impl Pending {
    fn raw(&self) -> String {
        serde_json::Value::Object(self.record.clone()).to_string()
    }

    fn reasons(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.to_string()).collect()
    }

    fn reject(self, mut reasons: Vec<String>) -> RejectedRecord {
        if reasons.is_empty() {
            reasons = self.reasons();
        }
        RejectedRecord {
            raw_record: self.raw(),
            reasons,
            attempts: self.attempts,
        }
    }
}

fn model_rejection(rejection: ModelRejection, attempts: u32) -> RejectedRecord {
    let reasons = if rejection.reasons.is_empty() {
        vec![EXTRACTOR_REJECTED_REASON.to_string()]
    } else {
        rejection.reasons
    };
    RejectedRecord {
        raw_record: rejection.raw_record,
        reasons,
        attempts,
    }
}

/// Whether `raw` mentions the identifier as a standalone token
fn mentions_identifier(raw: &str, identifier: &str) -> bool {
    raw.split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .any(|token| token == identifier)
}

/// Index of the record under correction that a rejection refers to.
///
/// A raw record that parses as a JSON object is matched on its identifier
/// field only. Free text falls back to a token scan and must name exactly
/// one waiting record.
fn rejection_slot(raw: &str, waiting: &[Option<Pending>]) -> Option<usize> {
    let waiting_for = |matches: &dyn Fn(&Pending) -> bool| {
        waiting
            .iter()
            .enumerate()
            .filter(|(_, p)| p.as_ref().map_or(false, |p| matches(p)))
            .map(|(index, _)| index)
            .collect::<Vec<_>>()
    };
    if let Ok(serde_json::Value::Object(record)) = serde_json::from_str::<serde_json::Value>(raw) {
        let key = identifier_key(&record)?;
        return waiting_for(&|p| p.identifier == key).first().copied();
    }
    match waiting_for(&|p| mentions_identifier(raw, &p.identifier)).as_slice() {
        [index] => Some(*index),
        _ => None,
    }
}

pub struct SelfCorrectingAgent<C> {
    client: C,
    max_attempts: u32,
}

impl<C: LlmClient> SelfCorrectingAgent<C> {
    pub fn new(client: C, settings: &AgentSettings) -> Self {
        Self {
            client,
            max_attempts: settings.max_attempts,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn extract_request(&self, raw_text: &str) -> LlmRequest {
        let payload = json!({
            "raw_text": raw_text,
            "allowed_departments": Department::allowed_names(),
        });
        LlmRequest::new(EXTRACT_PROMPT, payload.to_string()).with_temperature(0.0)
    }

    fn correct_request(&self, prior_json: &str, pending: &[Pending]) -> LlmRequest {
        let violations: Vec<serde_json::Value> = pending
            .iter()
            .map(|p| json!({ IDENTIFIER_FIELD: p.identifier, "violations": p.reasons() }))
            .collect();
        let payload = json!({
            "previous_json": prior_json,
            "violations": violations,
            "allowed_departments": Department::allowed_names(),
        });
        LlmRequest::new(CORRECT_PROMPT, payload.to_string()).with_temperature(0.0)
    }

    /// Run the loop over `raw_text`.
    ///
    /// Only a transport failure of the extraction call is an error; every other
    /// failure ends up in the result.
    pub async fn run(&self, raw_text: &str) -> Result<AgentResult, AgentError> {
        let mut result = AgentResult::default();
        let mut state = AgentState::Extract;
        let mut attempt: u32 = 0;
        let mut candidates: Vec<(serde_json::Map<String, serde_json::Value>, u32)> = Vec::new();
        let mut pending: Vec<Pending> = Vec::new();
        let mut transport_failure: Option<String> = None;

        loop {
            debug!("Agent state {:?}, attempt {}", state, attempt);
            match state {
                AgentState::Extract => {
                    let output = self.client.complete(self.extract_request(raw_text)).await?;
                    result.log.push(LogEntry::Extract {
                        output: truncate_for_log(&output, MAX_LOG_CHARS),
                    });

                    match ModelResponse::parse(&output) {
                        ModelResponse::Malformed { reason } => {
                            warn!("Extraction output unusable: {}", reason);
                            result.log.push(LogEntry::ExtractionError { reason: reason.clone() });
                            result.extraction_error = Some(reason);
                            state = AgentState::Finalize;
                        }
                        ModelResponse::Parsed { employees, rejected } => {
                            info!(
                                "Extracted {} candidate(s), {} rejected by the model",
                                employees.len(),
                                rejected.len()
                            );
                            result
                                .rejected
                                .extend(rejected.into_iter().map(|r| model_rejection(r, 0)));
                            candidates = employees.into_iter().map(|e| (e, 0)).collect();
                            state = AgentState::Validate;
                        }
                    }
                }

                AgentState::Validate => {
                    let mut accepted = 0;
                    let mut missing = 0;
                    for (record, attempts) in candidates.drain(..) {
                        match validate_candidate(&record) {
                            Validation::Valid(employee) => {
                                accepted += 1;
                                result.accepted.push(employee);
                            }
                            Validation::MissingIdentifier => {
                                missing += 1;
                                warn!("Rejected record without {}", IDENTIFIER_FIELD);
                                result.rejected.push(RejectedRecord {
                                    raw_record: serde_json::Value::Object(record).to_string(),
                                    reasons: vec![MISSING_IDENTIFIER_REASON.to_string()],
                                    attempts: 0,
                                });
                            }
                            Validation::Invalid { identifier, violations } => pending.push(Pending {
                                identifier,
                                record,
                                violations,
                                attempts,
                            }),
                        }
                    }
                    result.log.push(LogEntry::Validate {
                        attempt,
                        accepted,
                        invalid: pending.len(),
                        missing_identifier: missing,
                    });

                    state = if pending.is_empty() || attempt >= self.max_attempts {
                        AgentState::Finalize
                    } else {
                        AgentState::Correct
                    };
                }

                AgentState::Correct => {
                    attempt += 1;
                    for p in pending.iter_mut() {
                        p.attempts += 1;
                    }
                    let prior_json = serde_json::Value::Array(
                        pending
                            .iter()
                            .map(|p| serde_json::Value::Object(p.record.clone()))
                            .collect(),
                    )
                    .to_string();
                    let violations: Vec<String> = pending
                        .iter()
                        .flat_map(|p| {
                            p.violations
                                .iter()
                                .map(move |v| format!("[{}={}] {}", IDENTIFIER_FIELD, p.identifier, v))
                        })
                        .collect();
                    info!(
                        "Correction attempt {}/{} for {} record(s)",
                        attempt,
                        self.max_attempts,
                        pending.len()
                    );

                    let request = self.correct_request(&prior_json, &pending);
                    let output = match self.client.complete(request).await {
                        Ok(output) => output,
                        Err(e) => {
                            warn!("Correction call failed: {}", e);
                            result.log.push(LogEntry::CorrectionError {
                                attempt,
                                reason: e.to_string(),
                            });
                            transport_failure = Some(e.to_string());
                            state = AgentState::Finalize;
                            continue;
                        }
                    };

                    result.log.push(LogEntry::Correct(CorrectionAttempt {
                        attempt,
                        prior_json,
                        violations,
                        resulting_json: truncate_for_log(&output, MAX_LOG_CHARS),
                    }));
                    self.merge_correction(&output, attempt, &mut pending, &mut candidates, &mut result);
                    state = AgentState::Validate;
                }

                AgentState::Finalize => {
                    for p in pending.drain(..) {
                        let reasons = match &transport_failure {
                            Some(reason) => {
                                let mut reasons = vec![format!("correction call failed: {}", reason)];
                                reasons.extend(p.reasons());
                                reasons
                            }
                            None => p.reasons(),
                        };
                        result.rejected.push(p.reject(reasons));
                    }
                    result.total_attempts = attempt;
                    info!(
                        "Extraction finished: {} accepted, {} rejected after {} correction(s)",
                        result.accepted.len(),
                        result.rejected.len(),
                        attempt
                    );
                    return Ok(result);
                }
            }
        }
    }

    /// Fold one correction response back into the candidate set.
    ///
    /// Each corrected record replaces the pending record with the same
    /// identifier. Records with unknown identifiers are discarded. Pending
    /// records the model moved to `rejected` are rejected with the model's
    /// reasons; pending records missing from the output are rejected with their
    /// last violations.
    fn merge_correction(
        &self,
        output: &str,
        attempt: u32,
        pending: &mut Vec<Pending>,
        candidates: &mut Vec<(serde_json::Map<String, serde_json::Value>, u32)>,
        result: &mut AgentResult,
    ) {
        let (employees, rejected) = match ModelResponse::parse(output) {
            ModelResponse::Parsed { employees, rejected } => (employees, rejected),
            ModelResponse::Malformed { reason } => {
                // Nothing usable came back; the same records are validated again.
                warn!("Correction output unusable: {}", reason);
                candidates.extend(pending.drain(..).map(|p| (p.record, p.attempts)));
                return;
            }
        };

        let mut waiting: Vec<Option<Pending>> = pending.drain(..).map(Some).collect();

        for record in employees {
            let key = identifier_key(&record);
            let slot = match key.as_deref() {
                Some(k) => waiting
                    .iter_mut()
                    .find(|p| p.as_ref().map_or(false, |p| p.identifier == k)),
                None => None,
            };
            match slot.and_then(Option::take) {
                Some(original) => candidates.push((record, original.attempts)),
                None => {
                    warn!("Discarded corrected record with unknown identifier {:?}", key);
                    result.log.push(LogEntry::Discarded {
                        attempt,
                        identifier: key,
                        reason: "identifier does not match a record under correction".to_string(),
                    });
                }
            }
        }

        for rejection in rejected {
            let slot = rejection_slot(&rejection.raw_record, &waiting)
                .and_then(|index| waiting[index].take());
            match slot {
                Some(original) => {
                    let mut reasons = rejection.reasons;
                    if reasons.is_empty() {
                        reasons.push(EXTRACTOR_REJECTED_REASON.to_string());
                    }
                    reasons.extend(original.reasons());
                    result.rejected.push(original.reject(reasons));
                }
                None => result.log.push(LogEntry::Discarded {
                    attempt,
                    identifier: None,
                    reason: format!(
                        "rejection does not match a record under correction: {}",
                        truncate_for_log(&rejection.raw_record, 200)
                    ),
                }),
            }
        }

        for original in waiting.into_iter().flatten() {
            warn!(
                "Record {}={} missing from correction output",
                IDENTIFIER_FIELD, original.identifier
            );
            let mut reasons = original.reasons();
            reasons.push("dropped from correction output".to_string());
            result.rejected.push(original.reject(reasons));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions_identifier_is_token_exact() {
        assert!(mentions_identifier(r#"{"user_id":101,"name":"x"}"#, "101"));
        assert!(mentions_identifier("Employee 101 - no email", "101"));
        assert!(!mentions_identifier("Employee 1011", "101"));
    }

    fn waiting(ids: &[&str]) -> Vec<Option<Pending>> {
        ids.iter()
            .map(|id| {
                Some(Pending {
                    identifier: id.to_string(),
                    record: serde_json::Map::new(),
                    violations: Vec::new(),
                    attempts: 1,
                })
            })
            .collect()
    }

    #[test]
    fn test_rejection_slot_prefers_identifier_field() {
        let slots = waiting(&["1", "30"]);
        let raw = r#"{"user_id":30,"name":"Bo","age":200,"performance_score":1}"#;
        assert_eq!(rejection_slot(raw, &slots), Some(1));
        assert_eq!(rejection_slot(r#"{"name":"Bo","age":1}"#, &slots), None);
        assert_eq!(rejection_slot(r#"{"user_id":99}"#, &slots), None);
    }

    #[test]
    fn test_rejection_slot_text_must_be_unambiguous() {
        let mut slots = waiting(&["1", "30"]);
        assert_eq!(rejection_slot("employee 30 has no real age", &slots), Some(1));
        assert_eq!(rejection_slot("employees 1 and 30 are duplicates", &slots), None);
        slots[1] = None;
        assert_eq!(rejection_slot("employees 1 and 30 are duplicates", &slots), Some(0));
    }

    #[test]
    fn test_model_rejection_gets_default_reason() {
        let rejected = model_rejection(
            ModelRejection {
                raw_record: "???".to_string(),
                reasons: Vec::new(),
            },
            0,
        );
        assert_eq!(rejected.reasons, vec![EXTRACTOR_REJECTED_REASON.to_string()]);
    }

    #[test]
    fn test_log_entries_are_tagged_by_step() {
        let entry = LogEntry::Correct(CorrectionAttempt {
            attempt: 1,
            prior_json: "[]".to_string(),
            violations: vec!["[user_id=1] age: 95 is outside 16..=80".to_string()],
            resulting_json: "{}".to_string(),
        });
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["step"], "correct");
        assert_eq!(value["attempt"], 1);
        let value = serde_json::to_value(LogEntry::ExtractionError { reason: "bad".into() }).unwrap();
        assert_eq!(value["step"], "extraction_error");
    }
}
