//! Application configuration
//!
//! Loaded from an optional YAML or JSON file, then patched from environment
//! variables. The resulting [`AppConfig`] is handed to each component
//! explicitly; nothing reads configuration from global state.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file did not parse
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    /// An override or field had an invalid value
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAI,
    Ollama,
    Gemini,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAI),
            "ollama" => Ok(LlmProvider::Ollama),
            "gemini" => Ok(LlmProvider::Gemini),
            other => Err(ConfigError::InvalidValue {
                key: "provider".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Model endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Model name (e.g., "gpt-4.1-mini", "llama3")
    pub model: String,
    /// API key; OpenAI and Gemini require one
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Override for the provider's default base URL
    pub api_base_url: Option<String>,
    pub temperature: f32,
    /// HTTP client timeout in seconds
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            model: "gpt-4.1-mini".to_string(),
            api_key: None,
            api_base_url: None,
            temperature: 0.0,
            timeout_secs: 60,
            max_output_tokens: 1200,
        }
    }
}

/// Self-correction loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Maximum number of correction cycles per run
    pub max_attempts: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Query planner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Rows of the table shown to the planner as a sample
    pub sample_rows: usize,
    /// Row limit for filter results when the plan gives none
    pub default_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            sample_rows: 8,
            default_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentSettings,
    pub query: QuerySettings,
    pub http: HttpSettings,
}

impl AppConfig {
    /// Load from `path` (or defaults) and apply environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        info!(
            "Configuration loaded: provider={:?}, model={}, max_attempts={}",
            config.llm.provider, config.llm.model, config.agent.max_attempts
        );
        Ok(config)
    }

    /// Parse a config file; `.json` is read as JSON, anything else as YAML
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: shown.clone(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let parsed = if is_json {
            serde_json::from_str(&text).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&text).map_err(|e| e.to_string())
        };
        debug!("Parsed config file {}", shown);
        parsed.map_err(|message| ConfigError::Parse {
            path: shown,
            message,
        })
    }

    /// Apply `VALIDATA_*` and provider key overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("VALIDATA_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = lookup("VALIDATA_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("VALIDATA_API_BASE_URL") {
            self.llm.api_base_url = Some(url);
        }
        if let Some(raw) = lookup("VALIDATA_MAX_ATTEMPTS") {
            self.agent.max_attempts = parse_number("VALIDATA_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("VALIDATA_PORT") {
            self.http.port = parse_number("VALIDATA_PORT", &raw)?;
        }

        if self.llm.api_key.is_none() {
            let key_var = match self.llm.provider {
                LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
                LlmProvider::Gemini => Some("GEMINI_API_KEY"),
                LlmProvider::Ollama => None,
            };
            self.llm.api_key = key_var.and_then(&lookup).filter(|k| !k.trim().is_empty());
        }
        Ok(())
    }

    /// Whether a model client can be built from this configuration
    pub fn llm_available(&self) -> bool {
        match self.llm.provider {
            LlmProvider::Ollama => true,
            LlmProvider::OpenAI | LlmProvider::Gemini => self.llm.api_key.is_some(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> ConfigResult<T> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.agent.max_attempts, 3);
        assert_eq!(config.query.sample_rows, 8);
        assert_eq!(config.query.default_limit, 50);
        assert_eq!(config.llm.timeout_secs, 60);
        assert!(!config.llm_available());
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("VALIDATA_PROVIDER", "gemini"),
            ("VALIDATA_MAX_ATTEMPTS", "5"),
            ("VALIDATA_PORT", "9000"),
            ("GEMINI_API_KEY", "g-key"),
            ("OPENAI_API_KEY", "o-key"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Gemini);
        assert_eq!(config.agent.max_attempts, 5);
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.llm.api_key.as_deref(), Some("g-key"));
        assert!(config.llm_available());
    }

    #[test]
    fn test_invalid_override_is_error() {
        let vars = env(&[("VALIDATA_MAX_ATTEMPTS", "lots")]);
        let mut config = AppConfig::default();
        let err = config.apply_overrides(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_yaml_and_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("validata.yaml");
        std::fs::write(&yaml, "llm:\n  provider: ollama\n  model: llama3\nagent:\n  max_attempts: 2\n").unwrap();
        let config = AppConfig::from_file(&yaml).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.agent.max_attempts, 2);
        assert_eq!(config.query.sample_rows, 8);

        let json = dir.path().join("validata.json");
        std::fs::write(&json, r#"{"http": {"port": 3000}}"#).unwrap();
        let config = AppConfig::from_file(&json).unwrap();
        assert_eq!(config.http.port, 3000);
        assert_eq!(config.llm.model, "gpt-4.1-mini");
    }
}
