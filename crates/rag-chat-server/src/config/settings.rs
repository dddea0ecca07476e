use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::chain::{DEFAULT_CONDENSE_TEMPLATE, DEFAULT_QA_TEMPLATE};
use crate::utils::error::ChatError;

const DEFAULT_SETTINGS_FILE: &str = "config/settings.toml";

/// Flat variable names understood for compatibility with existing deployments.
/// Each one overrides the nested key it maps to.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("KENDRA_INDEX_ID", "retriever.index_id"),
    ("AWS_REGION", "aws.region"),
    ("AWS_ACCESS_KEY_ID", "aws.access_key_id"),
    ("AWS_SECRET_ACCESS_KEY", "aws.secret_access_key"),
    ("AWS_SESSION_TOKEN", "aws.session_token"),
    ("MODEL_NAME", "generation.model_name"),
    ("TEMPERATURE", "generation.temperature"),
    ("MAX_TOKENS", "generation.max_tokens"),
    ("TOP_P", "generation.top_p"),
    ("TOP_K", "generation.top_k"),
    ("MAX_HISTORY_LENGTH", "history.max_length"),
    ("SHOW_DOC_SOURCES", "ui.show_doc_sources"),
    ("SHOW_SAMPLE_QUESTIONS", "ui.show_sample_questions"),
    ("HEADER_TITLE", "ui.header_title"),
    ("PAGE_TITLE", "ui.page_title"),
    ("TEXT_INPUT_PROMPT", "ui.text_input_prompt"),
    ("TEXT_INPUT_PLACEHOLDER", "ui.text_input_placeholder"),
    ("TEXT_INPUT_HELP", "ui.text_input_help"),
    ("OPENAI_API_KEY", "providers.openai.api_key"),
    ("COHERE_API_KEY", "providers.cohere.api_key"),
    ("FLAN_XL_ENDPOINT", "providers.flanxl.model"),
    ("FLAN_XXL_ENDPOINT", "providers.flanxxl.model"),
    ("LLAMA_2_ENDPOINT", "providers.llama2chat.model"),
    ("FALCON_40B_ENDPOINT", "providers.falcon.model"),
    ("OPENAI_MODEL_NAME", "providers.openai.display_name"),
    ("FLANXL_MODEL_NAME", "providers.flanxl.display_name"),
    ("FLANXXL_MODEL_NAME", "providers.flanxxl.display_name"),
    ("LLAMA_MODEL_NAME", "providers.llama2chat.display_name"),
    ("FALCON_MODEL_NAME", "providers.falcon.display_name"),
    ("BEDROCK_CLAUDE_MODEL_NAME", "providers.bedrockclaude.display_name"),
    ("BEDROCK_TITAN_MODEL_NAME", "providers.bedrocktitan.display_name"),
    ("BEDROCK_AI21_LABS_MODEL_NAME", "providers.bedrockai21labs.display_name"),
    ("COHERE_MODEL_NAME", "providers.cohere.display_name"),
];

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub ui: UiConfig,
    pub history: HistoryConfig,
    pub generation: GenerationConfig,
    pub retriever: RetrieverConfig,
    pub aws: AwsConfig,
    pub providers: ProvidersConfig,
    pub session: SessionConfig,
    pub http: HttpConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct UiConfig {
    pub header_title: String,
    pub page_title: String,
    pub text_input_prompt: String,
    pub text_input_placeholder: String,
    pub text_input_help: String,
    #[serde(deserialize_with = "strict_bool")]
    pub show_doc_sources: bool,
    #[serde(deserialize_with = "strict_bool")]
    pub show_sample_questions: bool,
    pub sample_questions: Vec<String>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            header_title: "A Chatbot powered by Amazon Kendra".to_string(),
            page_title: "AI Chatbot".to_string(),
            text_input_prompt: "Ask me any question about Amazon SageMaker.".to_string(),
            text_input_placeholder: "What is Amazon SageMaker?".to_string(),
            text_input_help: "For more help, see our official documentation: \
                              https://docs.aws.amazon.com/sagemaker/index.html"
                .to_string(),
            show_doc_sources: true,
            show_sample_questions: true,
            sample_questions: [
                "What is Amazon SageMaker?",
                "What are some of its major features?",
                "How do I get started using it?",
                "Tell me about Amazon SageMaker Feature Store.",
                "What does the Inference Recommender do?",
                "What is Autopilot?",
                "How much does SageMaker cost?",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of (question, answer) turns sent back as context.
    /// Zero or negative disables history.
    pub max_length: i64,
}

impl HistoryConfig {
    pub fn capacity(&self) -> usize {
        usize::try_from(self.max_length).unwrap_or(0)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_length: 5 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    /// Overrides the selected provider's model identifier when set.
    pub model_name: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model_name: None,
            temperature: 1e-10,
            max_tokens: 1024,
            top_p: 0.5,
            top_k: 250,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Kendra index identifier. Mandatory for every provider.
    pub index_id: Option<String>,
    pub top_k: usize,
    /// Replaces `https://kendra.{region}.amazonaws.com` (VPC endpoints, tests).
    pub endpoint: Option<String>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            index_id: None,
            top_k: 3,
            endpoint: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
        }
    }
}

/// Per-backend connection settings. `model` is the model id for hosted APIs
/// and Bedrock, and the endpoint name for SageMaker.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ProviderConfig {
    pub model: Option<String>,
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
    pub flanxl: ProviderConfig,
    pub flanxxl: ProviderConfig,
    pub llama2chat: ProviderConfig,
    pub falcon: ProviderConfig,
    pub bedrockclaude: ProviderConfig,
    pub bedrocktitan: ProviderConfig,
    pub bedrockai21labs: ProviderConfig,
    pub cohere: ProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_ttl_minutes: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_minutes: 6 * 60,
            sweep_interval_seconds: 300,
        }
    }
}

impl SessionConfig {
    /// Huge values saturate instead of overflowing.
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_minutes.saturating_mul(60))
    }

    /// Never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: 120 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    /// Needs `{context}` and `{question}`.
    pub qa_template: String,
    /// Needs `{chat_history}` and `{question}`.
    pub condense_template: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            qa_template: DEFAULT_QA_TEMPLATE.to_string(),
            condense_template: DEFAULT_CONDENSE_TEMPLATE.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the settings file, `APP__*` variables and the
    /// flat legacy variables, in increasing priority. `.env` is read by the
    /// binary before this runs.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ChatError> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

        let builder = Config::builder()
            .add_source(File::from(file.as_path()).required(path.is_some()))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let builder = apply_legacy_env(builder, |name| std::env::var(name).ok())
            .map_err(config_error)?;

        Self::from_builder(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ChatError> {
        let config = builder.build().map_err(config_error)?;
        config.try_deserialize().map_err(config_error)
    }
}

/// Apply the flat legacy variables found by `lookup` as overrides.
pub fn apply_legacy_env<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: F,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for (env_name, key) in LEGACY_ENV_KEYS {
        builder = builder.set_override_option(*key, lookup(env_name))?;
    }
    Ok(builder)
}

fn config_error(err: ConfigError) -> ChatError {
    ChatError::Configuration(err.to_string())
}

/// Accept a real boolean or the strings `true`/`false` (any case), nothing else.
fn strict_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer) {
        Ok(Flag::Bool(value)) => Ok(value),
        Ok(Flag::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(D::Error::custom(format!(
                "expected `true` or `false`, got `{}`",
                text
            ))),
        },
        Err(_) => Err(D::Error::custom("expected `true` or `false`")),
    }
}
