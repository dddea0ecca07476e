//! Amazon Bedrock `InvokeModel` client.
//!
//! Each model family has its own request body and response layout; the
//! family is fixed when the client is built.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tracing::debug;

use super::{json_body, text_at, LlmClient};
use crate::config::GenerationConfig;
use crate::services::aws::{uri_encode, SigV4Signer};
use crate::utils::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BedrockFamily {
    /// `anthropic.claude-*`
    Anthropic,
    /// `amazon.titan-*`
    Titan,
    /// `ai21.j2-*`
    Ai21,
}

impl BedrockFamily {
    fn request_body(&self, prompt: &str, generation: &GenerationConfig) -> Value {
        match self {
            BedrockFamily::Anthropic => json!({
                "prompt": format!("\n\nHuman: {}\n\nAssistant:", prompt),
                "max_tokens_to_sample": generation.max_tokens,
                "temperature": generation.temperature,
                "top_p": generation.top_p,
                "top_k": generation.top_k,
                "stop_sequences": ["\n\nHuman:"],
            }),
            BedrockFamily::Titan => json!({
                "inputText": prompt,
                "textGenerationConfig": {
                    "maxTokenCount": generation.max_tokens,
                    "temperature": generation.temperature,
                    "topP": generation.top_p,
                    "stopSequences": [],
                },
            }),
            BedrockFamily::Ai21 => json!({
                "prompt": prompt,
                "maxTokens": generation.max_tokens,
                "temperature": generation.temperature,
                "topP": generation.top_p,
            }),
        }
    }

    fn text_pointer(&self) -> &'static str {
        match self {
            BedrockFamily::Anthropic => "/completion",
            BedrockFamily::Titan => "/results/0/outputText",
            BedrockFamily::Ai21 => "/completions/0/data/text",
        }
    }
}

pub struct BedrockClient {
    client: Client,
    signer: SigV4Signer,
    invoke_url: Url,
    family: BedrockFamily,
    generation: GenerationConfig,
}

impl BedrockClient {
    /// `base_url` replaces `https://bedrock-runtime.{region}.amazonaws.com`.
    pub fn new(
        client: Client,
        signer: SigV4Signer,
        base_url: Option<&str>,
        model_id: &str,
        family: BedrockFamily,
        generation: GenerationConfig,
    ) -> Result<Self, ChatError> {
        let base = match base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", signer.region()),
        };
        let url = format!("{}/model/{}/invoke", base, uri_encode(model_id));
        let invoke_url = Url::parse(&url).map_err(|e| {
            ChatError::Configuration(format!("Invalid Bedrock URL `{}`: {}", url, e))
        })?;

        Ok(Self {
            client,
            signer,
            invoke_url,
            family,
            generation,
        })
    }
}

#[async_trait]
impl LlmClient for BedrockClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        debug!("Bedrock invoke {:?} at {}", self.family, self.invoke_url);

        let body = serde_json::to_vec(&self.family.request_body(prompt, &self.generation))
            .map_err(|e| ChatError::Provider(format!("Failed to encode Bedrock request: {}", e)))?;

        let response = self
            .signer
            .post(
                &self.client,
                self.invoke_url.clone(),
                &[
                    ("Content-Type", "application/json"),
                    ("Accept", "application/json"),
                ],
                body,
            )
            .await?;

        let body = json_body(response, "Bedrock").await?;
        text_at(&body, self.family.text_pointer(), "Bedrock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::aws::AwsCredentials;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, model_id: &str, family: BedrockFamily) -> BedrockClient {
        let signer = SigV4Signer::new(
            AwsCredentials::new("AKID", "secret", None),
            "us-east-1",
            "bedrock",
        );
        BedrockClient::new(
            Client::new(),
            signer,
            Some(&server.uri()),
            model_id,
            family,
            GenerationConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_claude_prompt_and_completion() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/model/anthropic.claude-v2/invoke"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "prompt": "\n\nHuman: Hello\n\nAssistant:",
                "max_tokens_to_sample": 1024,
                "stop_sequences": ["\n\nHuman:"]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "completion": " Hi there", "stop_reason": "stop_sequence" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let answer = client(&server, "anthropic.claude-v2", BedrockFamily::Anthropic)
            .complete("Hello")
            .await
            .unwrap();
        assert_eq!(answer, "Hi there");
    }

    #[tokio::test]
    async fn test_titan_output_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/model/amazon.titan-tg1-large/invoke"))
            .and(body_partial_json(json!({ "inputText": "Hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "inputTextTokenCount": 1,
                "results": [{ "tokenCount": 2, "outputText": "\nHi", "completionReason": "FINISH" }]
            })))
            .mount(&server)
            .await;

        let answer = client(&server, "amazon.titan-tg1-large", BedrockFamily::Titan)
            .complete("Hello")
            .await
            .unwrap();
        assert_eq!(answer, "Hi");
    }

    #[tokio::test]
    async fn test_ai21_completion_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/model/ai21.j2-ultra-v1/invoke"))
            .and(body_partial_json(json!({ "prompt": "Hello", "maxTokens": 1024 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "completions": [{ "data": { "text": "Hi from Jurassic" } }]
            })))
            .mount(&server)
            .await;

        let answer = client(&server, "ai21.j2-ultra-v1", BedrockFamily::Ai21)
            .complete("Hello")
            .await
            .unwrap();
        assert_eq!(answer, "Hi from Jurassic");
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "outputs": [] })))
            .mount(&server)
            .await;

        let result = client(&server, "anthropic.claude-v2", BedrockFamily::Anthropic)
            .complete("Hello")
            .await;
        assert!(matches!(result, Err(ChatError::MalformedResult(_))));
    }

    #[test]
    fn test_model_id_is_encoded_in_path() {
        let signer = SigV4Signer::new(
            AwsCredentials::new("AKID", "secret", None),
            "us-west-2",
            "bedrock",
        );
        let client = BedrockClient::new(
            Client::new(),
            signer,
            None,
            "anthropic.claude-v2:1",
            BedrockFamily::Anthropic,
            GenerationConfig::default(),
        )
        .unwrap();
        assert_eq!(
            client.invoke_url.as_str(),
            "https://bedrock-runtime.us-west-2.amazonaws.com/model/anthropic.claude-v2%3A1/invoke"
        );
    }
}
