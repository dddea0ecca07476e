pub mod settings;

pub use settings::{
    AwsConfig, GenerationConfig, HistoryConfig, PromptsConfig, ProviderConfig, RetrieverConfig, Settings,
    UiConfig,
};
