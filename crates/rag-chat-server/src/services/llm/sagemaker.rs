//! SageMaker runtime `InvokeEndpoint` client for JumpStart text models.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tracing::debug;

use super::{json_body, text_at, LlmClient};
use crate::config::GenerationConfig;
use crate::services::aws::{uri_encode, SigV4Signer};
use crate::utils::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SageMakerFamily {
    FlanT5,
    Llama2Chat,
    /// Text Generation Inference containers (Falcon).
    Falcon,
}

impl SageMakerFamily {
    fn request_body(&self, prompt: &str, generation: &GenerationConfig) -> Value {
        match self {
            SageMakerFamily::FlanT5 => json!({
                "text_inputs": prompt,
                "max_length": generation.max_tokens,
                "temperature": generation.temperature,
                "top_p": generation.top_p,
            }),
            SageMakerFamily::Llama2Chat => json!({
                "inputs": [[{ "role": "user", "content": prompt }]],
                "parameters": {
                    "max_new_tokens": generation.max_tokens,
                    "top_p": generation.top_p,
                    "temperature": generation.temperature,
                },
            }),
            SageMakerFamily::Falcon => json!({
                "inputs": prompt,
                "parameters": {
                    "max_new_tokens": generation.max_tokens,
                    "top_p": generation.top_p,
                    "temperature": generation.temperature,
                    "return_full_text": false,
                },
            }),
        }
    }

    fn text_pointer(&self) -> &'static str {
        match self {
            SageMakerFamily::FlanT5 => "/generated_texts/0",
            SageMakerFamily::Llama2Chat => "/0/generation/content",
            SageMakerFamily::Falcon => "/0/generated_text",
        }
    }
}

pub struct SageMakerClient {
    client: Client,
    signer: SigV4Signer,
    invoke_url: Url,
    family: SageMakerFamily,
    generation: GenerationConfig,
}

impl SageMakerClient {
    /// `base_url` replaces `https://runtime.sagemaker.{region}.amazonaws.com`.
    pub fn new(
        client: Client,
        signer: SigV4Signer,
        base_url: Option<&str>,
        endpoint_name: &str,
        family: SageMakerFamily,
        generation: GenerationConfig,
    ) -> Result<Self, ChatError> {
        let base = match base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://runtime.sagemaker.{}.amazonaws.com", signer.region()),
        };
        let url = format!("{}/endpoints/{}/invocations", base, uri_encode(endpoint_name));
        let invoke_url = Url::parse(&url).map_err(|e| {
            ChatError::Configuration(format!("Invalid SageMaker URL `{}`: {}", url, e))
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
impl LlmClient for SageMakerClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        debug!("SageMaker invoke {:?} at {}", self.family, self.invoke_url);

        let body = serde_json::to_vec(&self.family.request_body(prompt, &self.generation))
            .map_err(|e| {
                ChatError::Provider(format!("Failed to encode SageMaker request: {}", e))
            })?;

        let mut headers = vec![("Content-Type", "application/json")];
        if self.family == SageMakerFamily::Llama2Chat {
            headers.push(("X-Amzn-SageMaker-Custom-Attributes", "accept_eula=true"));
        }

        let response = self
            .signer
            .post(&self.client, self.invoke_url.clone(), &headers, body)
            .await?;

        let body = json_body(response, "SageMaker").await?;
        text_at(&body, self.family.text_pointer(), "SageMaker")
    }
}
