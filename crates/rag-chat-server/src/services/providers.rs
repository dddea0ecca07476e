//! Provider adapters: one LLM backend paired with the Kendra retriever,
//! selected once at startup.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::config::{ProviderConfig, Settings};
use crate::services::aws::{AwsCredentials, SigV4Signer};
use crate::services::chain::{AnswerResult, ConversationalRetrievalChain, PromptTemplates};
use crate::services::conversation::HistoryWindow;
use crate::services::llm::{
    self, BedrockClient, BedrockFamily, CohereClient, LlmClient, OpenAiClient, SageMakerClient,
    SageMakerFamily,
};
use crate::services::retriever::KendraRetriever;
use crate::utils::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    FlanXl,
    FlanXxl,
    Llama2Chat,
    Falcon,
    BedrockClaude,
    BedrockTitan,
    BedrockAi21Labs,
    Cohere,
}

impl Provider {
    pub const ALL: [Provider; 9] = [
        Provider::OpenAi,
        Provider::FlanXl,
        Provider::FlanXxl,
        Provider::Llama2Chat,
        Provider::Falcon,
        Provider::BedrockClaude,
        Provider::BedrockTitan,
        Provider::BedrockAi21Labs,
        Provider::Cohere,
    ];

    /// Selection key accepted on the command line.
    pub fn key(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::FlanXl => "flanxl",
            Provider::FlanXxl => "flanxxl",
            Provider::Llama2Chat => "llama2chat",
            Provider::Falcon => "falcon",
            Provider::BedrockClaude => "bedrockclaude",
            Provider::BedrockTitan => "bedrocktitan",
            Provider::BedrockAi21Labs => "bedrockai21labs",
            Provider::Cohere => "cohere",
        }
    }

    pub fn default_display_name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI GPT-3.5 Turbo",
            Provider::FlanXl => "Flan-T5-XL",
            Provider::FlanXxl => "Flan-T5-XXL",
            Provider::Llama2Chat => "Llama-2 13B Chat",
            Provider::Falcon => "Falcon 40B BF16",
            Provider::BedrockClaude => "Bedrock Anthropic Claude",
            Provider::BedrockTitan => "Titan Text Large",
            Provider::BedrockAi21Labs => "AI21 Labs Jurassic-2",
            Provider::Cohere => "Cohere Command",
        }
    }

    /// Model id used when neither `generation.model_name` nor the provider
    /// section sets one. SageMaker endpoints have no default.
    fn default_model(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAi => Some("gpt-3.5-turbo"),
            Provider::BedrockClaude => Some("anthropic.claude-v2"),
            Provider::BedrockTitan => Some("amazon.titan-tg1-large"),
            Provider::BedrockAi21Labs => Some("ai21.j2-ultra-v1"),
            Provider::Cohere => Some("command"),
            Provider::FlanXl | Provider::FlanXxl | Provider::Llama2Chat | Provider::Falcon => None,
        }
    }

    /// Environment variable that names the SageMaker endpoint.
    fn endpoint_env(&self) -> &'static str {
        match self {
            Provider::FlanXl => "FLAN_XL_ENDPOINT",
            Provider::FlanXxl => "FLAN_XXL_ENDPOINT",
            Provider::Llama2Chat => "LLAMA_2_ENDPOINT",
            Provider::Falcon => "FALCON_40B_ENDPOINT",
            _ => "MODEL_NAME",
        }
    }

    pub fn config<'a>(&self, settings: &'a Settings) -> &'a ProviderConfig {
        let providers = &settings.providers;
        match self {
            Provider::OpenAi => &providers.openai,
            Provider::FlanXl => &providers.flanxl,
            Provider::FlanXxl => &providers.flanxxl,
            Provider::Llama2Chat => &providers.llama2chat,
            Provider::Falcon => &providers.falcon,
            Provider::BedrockClaude => &providers.bedrockclaude,
            Provider::BedrockTitan => &providers.bedrocktitan,
            Provider::BedrockAi21Labs => &providers.bedrockai21labs,
            Provider::Cohere => &providers.cohere,
        }
    }

    pub fn display_name(&self, settings: &Settings) -> String {
        non_empty(self.config(settings).display_name.as_deref())
            .unwrap_or_else(|| self.default_display_name())
            .to_string()
    }

    fn usage() -> String {
        let keys: Vec<&str> = Provider::ALL.iter().map(Provider::key).collect();
        format!("expected one of: {}", keys.join(", "))
    }

    fn model_id(&self, settings: &Settings) -> Result<String, ChatError> {
        let section = self.config(settings);
        let is_sagemaker = self.default_model().is_none();

        let chosen = if is_sagemaker {
            non_empty(section.model.as_deref())
        } else {
            non_empty(settings.generation.model_name.as_deref())
                .or_else(|| non_empty(section.model.as_deref()))
                .or_else(|| self.default_model())
        };

        chosen.map(str::to_string).ok_or_else(|| {
            ChatError::Configuration(format!(
                "{} is not set (required by provider `{}`)",
                self.endpoint_env(),
                self.key()
            ))
        })
    }

    fn api_key(&self, settings: &Settings, env_name: &str) -> Result<String, ChatError> {
        non_empty(self.config(settings).api_key.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                ChatError::Configuration(format!(
                    "{} is not set (required by provider `{}`)",
                    env_name,
                    self.key()
                ))
            })
    }

    fn build_llm(
        &self,
        settings: &Settings,
        client: reqwest::Client,
        credentials: &AwsCredentials,
    ) -> Result<Arc<dyn LlmClient>, ChatError> {
        let section = self.config(settings);
        let model = self.model_id(settings)?;
        let generation = settings.generation.clone();
        let region = settings.aws.region.as_str();
        let base_url = non_empty(section.base_url.as_deref());

        let llm: Arc<dyn LlmClient> = match self {
            Provider::OpenAi => Arc::new(OpenAiClient::new(
                client,
                base_url.unwrap_or(llm::openai::DEFAULT_BASE_URL),
                self.api_key(settings, "OPENAI_API_KEY")?,
                model,
                generation,
            )),
            Provider::Cohere => Arc::new(CohereClient::new(
                client,
                base_url.unwrap_or(llm::cohere::DEFAULT_BASE_URL),
                self.api_key(settings, "COHERE_API_KEY")?,
                model,
                generation,
            )),
            Provider::BedrockClaude | Provider::BedrockTitan | Provider::BedrockAi21Labs => {
                let family = match self {
                    Provider::BedrockClaude => BedrockFamily::Anthropic,
                    Provider::BedrockTitan => BedrockFamily::Titan,
                    _ => BedrockFamily::Ai21,
                };
                let signer = SigV4Signer::new(credentials.clone(), region, "bedrock");
                Arc::new(BedrockClient::new(
                    client, signer, base_url, &model, family, generation,
                )?)
            }
            Provider::FlanXl | Provider::FlanXxl | Provider::Llama2Chat | Provider::Falcon => {
                let family = match self {
                    Provider::Llama2Chat => SageMakerFamily::Llama2Chat,
                    Provider::Falcon => SageMakerFamily::Falcon,
                    _ => SageMakerFamily::FlanT5,
                };
                let signer = SigV4Signer::new(credentials.clone(), region, "sagemaker");
                Arc::new(SageMakerClient::new(
                    client, signer, base_url, &model, family, generation,
                )?)
            }
        };

        Ok(llm)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Provider {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Provider::ALL
            .iter()
            .copied()
            .find(|p| p.key() == key)
            .ok_or_else(|| {
                ChatError::Configuration(format!(
                    "Unsupported provider `{}`: {}",
                    s,
                    Provider::usage()
                ))
            })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Opaque handle to an initialized chain, cheap to clone.
#[derive(Clone)]
pub struct ChainHandle {
    provider: Provider,
    chain: Arc<ConversationalRetrievalChain>,
}

impl ChainHandle {
    pub fn new(provider: Provider, chain: ConversationalRetrievalChain) -> Self {
        Self {
            provider,
            chain: Arc::new(chain),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }
}

impl fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainHandle")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Two-operation contract every backend satisfies.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Build the LLM client and retriever. Fails when a required
    /// connection parameter is missing.
    fn initialize(&self, settings: &Settings) -> Result<ChainHandle, ChatError>;

    /// Answer `question` given `history`. Upstream failures are returned
    /// as-is; nothing is retried.
    async fn answer(
        &self,
        chain: &ChainHandle,
        question: &str,
        history: &HistoryWindow,
    ) -> Result<AnswerResult, ChatError>;
}

#[async_trait]
impl ProviderAdapter for Provider {
    fn initialize(&self, settings: &Settings) -> Result<ChainHandle, ChatError> {
        let index_id = non_empty(settings.retriever.index_id.as_deref()).ok_or_else(|| {
            ChatError::Configuration("KENDRA_INDEX_ID is not set".to_string())
        })?;
        let prompts = PromptTemplates::from_config(&settings.prompts)?;
        let credentials = AwsCredentials::from_settings(&settings.aws)?;
        let client = llm::http_client(settings.http.timeout_seconds)?;

        let retriever = KendraRetriever::new(
            client.clone(),
            SigV4Signer::new(credentials.clone(), settings.aws.region.as_str(), "kendra"),
            non_empty(settings.retriever.endpoint.as_deref()),
            index_id,
            settings.retriever.top_k,
        )?;

        let llm = self.build_llm(settings, client, &credentials)?;

        info!(
            "Initialized provider {} ({}) with Kendra index {}",
            self.key(),
            self.display_name(settings),
            index_id
        );

        Ok(ChainHandle::new(
            *self,
            ConversationalRetrievalChain::new(llm, Arc::new(retriever), prompts),
        ))
    }

    async fn answer(
        &self,
        chain: &ChainHandle,
        question: &str,
        history: &HistoryWindow,
    ) -> Result<AnswerResult, ChatError> {
        info!(
            "Answering with {} ({} history turns)",
            chain.provider(),
            history.len()
        );
        chain.chain.run(question, history).await
    }
}
