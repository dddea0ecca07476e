pub mod aws;
pub mod chain;
pub mod conversation;
pub mod llm;
pub mod providers;
pub mod retriever;

pub use chain::{AnswerResult, ConversationalRetrievalChain, PromptTemplates};
pub use conversation::ChatOrchestrator;
pub use providers::{ChainHandle, Provider, ProviderAdapter};
pub use retriever::{KendraRetriever, Retriever, SourceDocument};
