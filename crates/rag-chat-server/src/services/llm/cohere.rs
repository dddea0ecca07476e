use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{ensure_success, json_body, text_at, LlmClient};
use crate::config::GenerationConfig;
use crate::utils::error::ChatError;

pub const DEFAULT_BASE_URL: &str = "https://api.cohere.ai";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    p: f32,
    k: u32,
}

/// Cohere `/v1/generate` client.
#[derive(Clone)]
pub struct CohereClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    generation: GenerationConfig,
}

impl CohereClient {
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
impl LlmClient for CohereClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        debug!("Cohere generation with model {}", self.model);

        // Cohere caps `k` at 500
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            max_tokens: self.generation.max_tokens,
            temperature: self.generation.temperature,
            p: self.generation.top_p,
            k: self.generation.top_k.min(500),
        };

        let response = self
            .client
            .post(format!("{}/v1/generate", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Provider(format!("Failed to call Cohere API: {}", e)))?;

        let response = ensure_success(response, "Cohere").await?;
        let body = json_body(response, "Cohere").await?;
        text_at(&body, "/generations/0/text", "Cohere")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_complete_returns_first_generation() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/generate"))
            .and(header("authorization", "Bearer co-test"))
            .and(body_partial_json(json!({
                "model": "command",
                "prompt": "Question?",
                "max_tokens": 1024,
                "k": 250
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "gen-1",
                "generations": [{ "id": "g1", "text": " Answer. " }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CohereClient::new(
            Client::new(),
            server.uri(),
            "co-test",
            "command",
            GenerationConfig::default(),
        );

        assert_eq!(client.complete("Question?").await.unwrap(), "Answer.");
    }
}
