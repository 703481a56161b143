//! Streaming chat client for OpenAI-compatible and Anthropic endpoints

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::LlmSettings;
use crate::sse::{self, TokenEvent, TokenStream};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Longest upstream error body kept in an error message
const MAX_ERROR_BODY: usize = 500;

/// Errors talking to the LLM backend
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("Could not connect to the LLM endpoint: {0}")]
    Connect(String),

    #[error("LLM API error ({code}): {body}")]
    Status { code: u16, body: String },

    #[error("LLM request failed: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else if e.is_connect() {
            UpstreamError::Connect(e.to_string())
        } else {
            UpstreamError::Protocol(e.to_string())
        }
    }
}

/// Wire format spoken by the configured endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| UpstreamError::Protocol(e.to_string()))?;
        Ok(Self {
            client,
            api_key: settings.api_key.trim().to_string(),
            base_url: settings.base_url.trim().trim_end_matches('/').to_string(),
            model: settings.model.trim().to_string(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    pub fn format(&self) -> ApiFormat {
        if self.model.to_lowercase().contains("claude") {
            ApiFormat::Anthropic
        } else {
            ApiFormat::OpenAi
        }
    }

    pub fn endpoint(&self) -> String {
        let base = &self.base_url;
        match self.format() {
            ApiFormat::Anthropic if base.ends_with("/messages") => base.clone(),
            ApiFormat::Anthropic if base.ends_with("/v1") => format!("{}/messages", base),
            ApiFormat::Anthropic => format!("{}/v1/messages", base),
            ApiFormat::OpenAi if base.ends_with("/chat/completions") => base.clone(),
            ApiFormat::OpenAi if base.ends_with("/v1") => format!("{}/chat/completions", base),
            ApiFormat::OpenAi => format!("{}/v1/chat/completions", base),
        }
    }

    fn payload(&self, messages: &[ChatMessage]) -> Value {
        match self.format() {
            ApiFormat::OpenAi => json!({
                "model": self.model,
                "messages": messages,
                "stream": true,
                "max_tokens": self.max_tokens,
                "temperature": self.temperature,
            }),
            ApiFormat::Anthropic => {
                let system = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == "system")
                    .map(|m| m.content.clone());
                let rest: Vec<&ChatMessage> =
                    messages.iter().filter(|m| m.role != "system").collect();
                let mut body = json!({
                    "model": self.model,
                    "messages": rest,
                    "stream": true,
                    "max_tokens": self.max_tokens,
                    "temperature": self.temperature,
                });
                if let Some(system) = system.filter(|s| !s.is_empty()) {
                    body["system"] = Value::String(system);
                }
                body
            }
        }
    }

    /// Stream a chat completion as token events
    ///
    /// Connection and HTTP status failures are returned before any token;
    /// failures mid-stream arrive as a final `TokenEvent::Error`.
    pub async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream, UpstreamError> {
        let format = self.format();
        let mut request = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.payload(messages));
        if format == ApiFormat::Anthropic {
            request = request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(UpstreamError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| UpstreamError::from(e).to_string())
            })
            .boxed();
        Ok(match format {
            ApiFormat::OpenAi => sse::token_stream(bytes, parse_openai_frame),
            ApiFormat::Anthropic => sse::token_stream(bytes, parse_anthropic_frame),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: Option<OpenAiDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

fn parse_openai_frame(payload: &str) -> Vec<TokenEvent> {
    let Ok(chunk) = serde_json::from_str::<OpenAiChunk>(payload) else {
        return Vec::new();
    };
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Vec::new();
    };
    let mut events = Vec::new();
    if let Some(content) = choice
        .delta
        .and_then(|d| d.content)
        .filter(|c| !c.is_empty())
    {
        events.push(TokenEvent::Token(content));
    }
    if choice.finish_reason.is_some() {
        events.push(TokenEvent::Done);
    }
    events
}

#[derive(Debug, Deserialize)]
struct AnthropicEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
    #[serde(default)]
    error: Option<AnthropicErrorBody>,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(default)]
    message: String,
}

fn parse_anthropic_frame(payload: &str) -> Vec<TokenEvent> {
    let Ok(event) = serde_json::from_str::<AnthropicEvent>(payload) else {
        return Vec::new();
    };
    match event.kind.as_str() {
        "content_block_delta" => match event.delta {
            Some(delta) if delta.kind == "text_delta" && !delta.text.is_empty() => {
                vec![TokenEvent::Token(delta.text)]
            }
            _ => Vec::new(),
        },
        "message_delta" | "message_stop" => vec![TokenEvent::Done],
        "error" => {
            let message = event
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "upstream error".to_string());
            vec![TokenEvent::Error(message)]
        }
        _ => Vec::new(),
    }
}
