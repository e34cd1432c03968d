//! Language model client
//!
//! One seam, [`LanguageModel`], so the categorizer and the digest compiler
//! can run against a fake in tests. The production client talks to any
//! OpenAI-compatible `/v1/chat/completions` endpoint.

use crate::config::AiConfig;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("AI request failed: {0}")]
    Request(String),

    #[error("AI endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI response is malformed: {0}")]
    InvalidResponse(String),

    #[error("AI output does not match the schema: {0}")]
    Schema(String),
}

pub type AiResult<T> = Result<T, AiError>;

/// JSON schema constraining the model output
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub schema: Option<OutputSchema>,
}

impl CompletionRequest {
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            schema: None,
        }
    }

    pub fn structured(system: impl Into<String>, user: impl Into<String>, schema: OutputSchema) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            schema: Some(schema),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Raw text content of the first choice
    async fn complete(&self, request: &CompletionRequest) -> AiResult<String>;
}

/// Deserialize a structured completion, mapping failures to [`AiError::Schema`]
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> AiResult<T> {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(trimmed).map_err(|e| AiError::Schema(e.to_string()))
}

/// Schema for an object with a single string property restricted to `values`
pub fn enum_schema(name: &'static str, property: &str, values: &[&str]) -> OutputSchema {
    let mut properties = serde_json::Map::new();
    properties.insert(
        property.to_string(),
        serde_json::json!({ "type": "string", "enum": values }),
    );

    OutputSchema {
        name,
        schema: serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": [property],
            "additionalProperties": false
        }),
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(config: &AiConfig) -> AiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AiError::Request(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!("{}/v1/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, request: &CompletionRequest) -> AiResult<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user }
            ],
            "temperature": 0,
            "stream": false
        });

        if let Some(schema) = &request.schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": true,
                    "schema": schema.schema
                }
            });
        }

        let mut http_request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let resp = http_request
            .send()
            .await
            .map_err(|e| AiError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AiError::InvalidResponse("empty completion".to_string()))
    }
}
