//! Model client seam
//!
//! Every model interaction in the crate goes through [`LlmClient`], an opaque
//! and fallible `text -> text` call. [`client::HttpLlmClient`] talks to hosted
//! providers; [`scripted::ScriptedLlmClient`] replays canned responses.

pub mod client;
pub mod scripted;

pub use client::HttpLlmClient;
pub use scripted::ScriptedLlmClient;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Characters of prompt/output text kept in debug logs
pub const MAX_LOG_CHARS: usize = 2_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM configuration error: {0}")]
    Config(String),
    #[error("LLM network error: {0}")]
    Network(String),
    #[error("LLM API error: {0}")]
    Api(String),
    #[error("LLM serialization error: {0}")]
    Serialization(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// One completion request
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    /// Per-request temperature; `None` uses the client's configured value
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> LlmResult<String>;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete(&self, request: LlmRequest) -> LlmResult<String> {
        (**self).complete(request).await
    }
}

/// Pull the JSON payload out of a model response.
///
/// Handles markdown fences and leading/trailing prose: the result runs from the
/// first `{` or `[` to the last matching closer. Returns the trimmed input when
/// no bracket is found so the caller's parser reports the error.
pub fn extract_json_block(response: &str) -> &str {
    let mut text = response.trim();

    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        // Skip language tag (e.g. "json\n")
        let code_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(end) = after_fence[code_start..].find("```") {
            text = after_fence[code_start..code_start + end].trim();
        }
    }

    let Some(open) = text.find(|c: char| c == '{' || c == '[') else {
        return text;
    };
    let closer = if text[open..].starts_with('{') { '}' } else { ']' };
    match text.rfind(closer) {
        Some(close) if close > open => &text[open..=close],
        _ => &text[open..],
    }
}

/// Shorten text for log output
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...[truncated]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fence() {
        let response = "Here you go:\n```json\n{\"operation\": \"filter\"}\n```\nThanks";
        assert_eq!(extract_json_block(response), "{\"operation\": \"filter\"}");
    }

    #[test]
    fn test_extract_json_from_prose() {
        assert_eq!(extract_json_block("Sure! [1, 2] done"), "[1, 2]");
        assert_eq!(extract_json_block("  {\"a\": {\"b\": 1}} "), "{\"a\": {\"b\": 1}}");
        assert_eq!(extract_json_block("no json here"), "no json here");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("abcdef", 3), "abc...[truncated]");
    }
}
