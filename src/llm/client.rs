//! HTTP client for hosted model providers

use crate::config::{LlmConfig, LlmProvider};
use crate::llm::{truncate_for_log, LlmClient, LlmError, LlmRequest, LlmResult, MAX_LOG_CHARS};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct HttpLlmClient {
    client: Client,
    config: LlmConfig,
    api_base_url: String,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        let api_base_url = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| match config.provider {
                LlmProvider::OpenAI => "https://api.openai.com/v1".to_string(),
                LlmProvider::Ollama => "http://localhost:11434".to_string(),
                LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta".to_string(),
            })
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            config: config.clone(),
            api_base_url,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    fn api_key(&self, provider: &str) -> LlmResult<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Config(format!("{} requires API key", provider)))
    }

    async fn openai_chat(&self, request: &LlmRequest) -> LlmResult<String> {
        #[derive(Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            messages: Vec<Message<'a>>,
            temperature: f32,
            max_tokens: u32,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MessageContent,
        }

        #[derive(Deserialize)]
        struct MessageContent {
            content: Option<String>,
        }

        let api_key = self.api_key("OpenAI")?;
        let url = format!("{}/chat/completions", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&Request {
                model: &self.config.model,
                messages: vec![
                    Message { role: "system", content: &request.system },
                    Message { role: "user", content: &request.user },
                ],
                temperature: request.temperature.unwrap_or(self.config.temperature),
                max_tokens: request.max_tokens.unwrap_or(self.config.max_output_tokens),
            })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Api(format!("OpenAI error: {}", resp.status())));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;
        Ok(result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn ollama_generate(&self, request: &LlmRequest) -> LlmResult<String> {
        #[derive(Serialize)]
        struct Options {
            temperature: f32,
            num_predict: u32,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            prompt: &'a str,
            system: &'a str,
            stream: bool,
            options: Options,
        }

        #[derive(Deserialize)]
        struct Response {
            response: String,
        }

        let url = format!("{}/api/generate", self.api_base_url);
        let resp = self
            .client
            .post(&url)
            .json(&Request {
                model: &self.config.model,
                prompt: &request.user,
                system: &request.system,
                stream: false,
                options: Options {
                    temperature: request.temperature.unwrap_or(self.config.temperature),
                    num_predict: request.max_tokens.unwrap_or(self.config.max_output_tokens),
                },
            })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Api(format!("Ollama error: {}", resp.status())));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;
        Ok(result.response)
    }

    async fn gemini_generate(&self, request: &LlmRequest) -> LlmResult<String> {
        #[derive(Serialize)]
        struct Request {
            contents: Vec<Content>,
            #[serde(rename = "systemInstruction")]
            system_instruction: Content,
            #[serde(rename = "generationConfig")]
            generation_config: GenerationConfig,
        }

        #[derive(Serialize, Deserialize)]
        struct Content {
            #[serde(skip_serializing_if = "Option::is_none")]
            role: Option<String>,
            #[serde(default)]
            parts: Vec<Part>,
        }

        #[derive(Serialize, Deserialize)]
        struct Part {
            text: String,
        }

        #[derive(Serialize)]
        struct GenerationConfig {
            temperature: f32,
            #[serde(rename = "maxOutputTokens")]
            max_output_tokens: u32,
        }

        #[derive(Deserialize)]
        struct Response {
            candidates: Option<Vec<Candidate>>,
        }

        #[derive(Deserialize)]
        struct Candidate {
            content: Content,
        }

        let api_key = self.api_key("Gemini")?;
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base_url, self.config.model, api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&Request {
                contents: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part { text: request.user.clone() }],
                }],
                system_instruction: Content {
                    role: None,
                    parts: vec![Part { text: request.system.clone() }],
                },
                generation_config: GenerationConfig {
                    temperature: request.temperature.unwrap_or(self.config.temperature),
                    max_output_tokens: request.max_tokens.unwrap_or(self.config.max_output_tokens),
                },
            })
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("Gemini error: {}", text)));
        }

        let result: Response = resp
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;

        Ok(result
            .candidates
            .and_then(|c| c.into_iter().next())
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: LlmRequest) -> LlmResult<String> {
        debug!(
            "LLM request ({:?}/{}): {}",
            self.config.provider,
            self.config.model,
            truncate_for_log(&request.user, MAX_LOG_CHARS)
        );
        let output = match self.config.provider {
            LlmProvider::OpenAI => self.openai_chat(&request).await,
            LlmProvider::Ollama => self.ollama_generate(&request).await,
            LlmProvider::Gemini => self.gemini_generate(&request).await,
        }?;
        debug!("LLM output: {}", truncate_for_log(&output, MAX_LOG_CHARS));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_urls() {
        let mut config = LlmConfig::default();
        let client = HttpLlmClient::new(&config).unwrap();
        assert_eq!(client.api_base_url, "https://api.openai.com/v1");

        config.provider = LlmProvider::Ollama;
        config.api_base_url = Some("http://gpu-box:11434/".to_string());
        let client = HttpLlmClient::new(&config).unwrap();
        assert_eq!(client.api_base_url, "http://gpu-box:11434");
        assert_eq!(client.provider(), LlmProvider::Ollama);
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let client = HttpLlmClient::new(&LlmConfig::default()).unwrap();
        let err = client
            .complete(LlmRequest::new("system", "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
    }
}
