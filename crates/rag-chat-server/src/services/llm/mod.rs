//! Text-completion clients for the supported model backends.
//!
//! Every client takes a fully rendered prompt and returns the generated
//! text. Backend-specific request bodies and response shapes stay inside
//! the client; the chain only sees [`LlmClient`].

pub mod bedrock;
pub mod cohere;
pub mod openai;
pub mod sagemaker;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::utils::error::ChatError;

pub use bedrock::{BedrockClient, BedrockFamily};
pub use cohere::CohereClient;
pub use openai::OpenAiClient;
pub use sagemaker::{SageMakerClient, SageMakerFamily};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError>;
}

/// Shared HTTP client with the configured request timeout.
pub fn http_client(timeout_seconds: u64) -> Result<Client, ChatError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| ChatError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Pull the generated text out of a backend response by JSON pointer.
pub(crate) fn text_at(body: &Value, pointer: &str, backend: &str) -> Result<String, ChatError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| {
            ChatError::MalformedResult(format!("{} response has no text at `{}`", backend, pointer))
        })
}

/// Read a successful response as JSON, mapping failures to the error taxonomy.
pub(crate) async fn json_body(response: reqwest::Response, backend: &str) -> Result<Value, ChatError> {
    response.json::<Value>().await.map_err(|e| {
        ChatError::MalformedResult(format!("Failed to parse {} response: {}", backend, e))
    })
}

/// Reject non-2xx responses with the status and body text.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    backend: &str,
) -> Result<reqwest::Response, ChatError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Provider(format!(
        "{} API error: {} - {}",
        backend, status, body
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_at_trims() {
        let body = json!({ "choices": [{ "text": "  hello \n" }] });
        assert_eq!(text_at(&body, "/choices/0/text", "test").unwrap(), "hello");
    }

    #[test]
    fn test_missing_text_is_malformed() {
        let body = json!({ "choices": [] });
        assert!(matches!(
            text_at(&body, "/choices/0/text", "test"),
            Err(ChatError::MalformedResult(_))
        ));
        assert!(matches!(
            text_at(&json!({ "text": 42 }), "/text", "test"),
            Err(ChatError::MalformedResult(_))
        ));
    }
}
