use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{ensure_success, json_body, text_at, LlmClient};
use crate::config::GenerationConfig;
use crate::utils::error::ChatError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

/// OpenAI-compatible `/v1/chat/completions` client.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    generation: GenerationConfig,
}

impl OpenAiClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            generation,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        debug!("OpenAI completion with model {}", self.model);

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.generation.max_tokens,
            temperature: self.generation.temperature,
            top_p: self.generation.top_p,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Provider(format!("Failed to call OpenAI API: {}", e)))?;

        let response = ensure_success(response, "OpenAI").await?;
        let body = json_body(response, "OpenAI").await?;
        text_at(&body, "/choices/0/message/content", "OpenAI")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(
            Client::new(),
            server.uri(),
            "sk-test",
            "gpt-3.5-turbo",
            GenerationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_complete_returns_message_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-3.5-turbo",
                "messages": [{ "role": "user", "content": "Say hi" }],
                "max_tokens": 1024,
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Hi!" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(client(&server).complete("Say hi").await.unwrap(), "Hi!");
    }

    #[tokio::test]
    async fn test_rate_limit_is_provider_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let result = client(&server).complete("Say hi").await;
        assert!(matches!(result, Err(ChatError::Provider(msg)) if msg.contains("429")));
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let result = client(&server).complete("Say hi").await;
        assert!(matches!(result, Err(ChatError::MalformedResult(_))));
    }
}
