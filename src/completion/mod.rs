//! Text-completion providers used for chunk summaries and answer synthesis.
//!
//! Both adapters speak plain HTTP to the runtime and return the trimmed message content.
//! Calls are never retried here; callers decide whether a failure is fatal.

use crate::config::{CompletionProvider, Config};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Provider was unreachable or misconfigured.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// One system + user prompt pair with sampling parameters.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Instruction framing the task.
    pub system_prompt: String,
    /// Task input.
    pub user_prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Cap on generated tokens.
    pub max_tokens: u32,
}

/// Interface implemented by text-completion providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a completion for the request.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn http_client(agent: &str) -> Result<Client, CompletionError> {
    Client::builder()
        .user_agent(agent)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|error| CompletionError::ProviderUnavailable(error.to_string()))
}

/// Completions from a local Ollama runtime (`/api/chat`).
pub struct OllamaCompletionClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaCompletionClient {
    /// Build a client for `model` served at `base_url`.
    pub fn new(base_url: &str, model: &str) -> Result<Self, CompletionError> {
        Ok(Self {
            http: http_client("mathdoc-rag/completion")?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
    #[serde(default = "default_done")]
    done: bool,
}

fn default_done() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionClient for OllamaCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let payload = json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                CompletionError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CompletionError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaChatResponse = response.json().await.map_err(|error| {
            CompletionError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(CompletionError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        non_empty(body.message.content)
    }
}

/// Completions from an OpenAI-compatible API (`/v1/chat/completions`).
pub struct OpenAiCompletionClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompletionClient {
    /// Build a client for `model` authenticated with `api_key`.
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, CompletionError> {
        Ok(Self {
            http: http_client("mathdoc-rag/completion")?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| CompletionError::ProviderUnavailable(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::GenerationFailed(format!(
                "chat completions API returned {status}: {body}"
            )));
        }

        let body: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|error| CompletionError::InvalidResponse(error.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);
        non_empty(content)
    }
}

fn non_empty(content: Option<String>) -> Result<String, CompletionError> {
    let text = content.map(|value| value.trim().to_string()).unwrap_or_default();
    if text.is_empty() {
        Err(CompletionError::InvalidResponse(
            "provider returned an empty completion".into(),
        ))
    } else {
        Ok(text)
    }
}

/// Build a completion client based on configuration.
pub fn build_completion_client(
    config: &Config,
) -> Result<Box<dyn CompletionClient>, CompletionError> {
    match config.completion_provider {
        CompletionProvider::Ollama => Ok(Box::new(OllamaCompletionClient::new(
            &config.ollama_url,
            &config.completion_model,
        )?)),
        CompletionProvider::OpenAI => {
            let api_key = config.openai_api_key.as_deref().ok_or_else(|| {
                CompletionError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
            })?;
            Ok(Box::new(OpenAiCompletionClient::new(
                &config.openai_base_url,
                api_key,
                &config.completion_model,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "You are concise.".into(),
            user_prompt: "Summarize".into(),
            temperature: 0.3,
            max_tokens: 60,
        }
    }

    #[tokio::test]
    async fn ollama_client_handles_successful_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .body_contains("\"num_predict\":60");
                then.status(200).json_body(json!({
                    "message": { "role": "assistant", "content": " Summary text " },
                    "done": true
                }));
            })
            .await;

        let client = OllamaCompletionClient::new(&server.base_url(), "llama3.1").expect("client");
        let text = client.complete(request()).await.expect("completion");

        mock.assert_async().await;
        assert_eq!(text, "Summary text");
    }

    #[tokio::test]
    async fn ollama_client_handles_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(500).body("boom");
            })
            .await;

        let client = OllamaCompletionClient::new(&server.base_url(), "llama3.1").expect("client");
        let error = client.complete(request()).await.expect_err("error response");

        assert!(
            matches!(error, CompletionError::GenerationFailed(message) if message.contains("500"))
        );
    }

    #[tokio::test]
    async fn openai_client_reads_first_choice() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer key");
                then.status(200).json_body(json!({
                    "choices": [ { "message": { "role": "assistant", "content": "Answer" } } ]
                }));
            })
            .await;

        let client =
            OpenAiCompletionClient::new(&server.base_url(), "key", "gpt-4o-mini").expect("client");
        assert_eq!(client.complete(request()).await.expect("answer"), "Answer");
    }

    #[tokio::test]
    async fn empty_completion_is_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let client =
            OpenAiCompletionClient::new(&server.base_url(), "key", "gpt-4o-mini").expect("client");
        let error = client.complete(request()).await.expect_err("empty");
        assert!(matches!(error, CompletionError::InvalidResponse(_)));
    }
}
