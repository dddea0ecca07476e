//! Conversational retrieval chain: condense the follow-up question against
//! the history, retrieve supporting documents, then answer from them.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PromptsConfig;
use crate::services::conversation::HistoryWindow;
use crate::services::llm::LlmClient;
use crate::services::retriever::{Retriever, SourceDocument};
use crate::utils::error::ChatError;

pub const DEFAULT_QA_TEMPLATE: &str = r#"
  The following is a friendly conversation between a human and an AI.
  The AI is talkative and provides lots of specific details from its context.
  If the AI does not know the answer to a question, it truthfully says it
  does not know.
  {context}
  Instruction: Based on the above documents, provide a detailed answer for, {question} Answer "don't know"
  if not present in the document.
  Solution:"#;

pub const DEFAULT_CONDENSE_TEMPLATE: &str = r#"
  Given the following conversation and a follow up question, rephrase the follow up question
  to be a standalone question.

  Chat History:
  {chat_history}
  Follow Up Input: {question}
  Standalone question:"#;

/// Validated prompt templates.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    qa: String,
    condense: String,
}

impl PromptTemplates {
    pub fn new(qa: impl Into<String>, condense: impl Into<String>) -> Result<Self, ChatError> {
        let qa = qa.into();
        let condense = condense.into();

        require_placeholders("prompts.qa_template", &qa, &["context", "question"])?;
        require_placeholders(
            "prompts.condense_template",
            &condense,
            &["chat_history", "question"],
        )?;

        Ok(Self { qa, condense })
    }

    pub fn from_config(config: &PromptsConfig) -> Result<Self, ChatError> {
        Self::new(config.qa_template.clone(), config.condense_template.clone())
    }

    fn render_qa(&self, context: &str, question: &str) -> String {
        render(&self.qa, &[("context", context), ("question", question)])
    }

    fn render_condense(&self, chat_history: &str, question: &str) -> String {
        render(
            &self.condense,
            &[("chat_history", chat_history), ("question", question)],
        )
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            qa: DEFAULT_QA_TEMPLATE.to_string(),
            condense: DEFAULT_CONDENSE_TEMPLATE.to_string(),
        }
    }
}

fn require_placeholders(key: &str, template: &str, names: &[&str]) -> Result<(), ChatError> {
    let missing: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| !template.contains(&format!("{{{}}}", name)))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ChatError::Configuration(format!(
            "{} is missing placeholder(s): {}",
            key,
            missing
                .iter()
                .map(|name| format!("{{{}}}", name))
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

/// Fill `{name}` placeholders in one pass, so substituted text containing
/// braces is never expanded again. Unknown placeholders are left verbatim.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });

        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Generated answer plus the documents it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    pub source_documents: Vec<SourceDocument>,
}

pub struct ConversationalRetrievalChain {
    llm: Arc<dyn LlmClient>,
    retriever: Arc<dyn Retriever>,
    prompts: PromptTemplates,
}

impl ConversationalRetrievalChain {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        retriever: Arc<dyn Retriever>,
        prompts: PromptTemplates,
    ) -> Self {
        Self {
            llm,
            retriever,
            prompts,
        }
    }

    pub async fn run(
        &self,
        question: &str,
        history: &HistoryWindow,
    ) -> Result<AnswerResult, ChatError> {
        let standalone = if history.is_empty() {
            question.to_string()
        } else {
            let prompt = self
                .prompts
                .render_condense(&history.to_prompt_text(), question);
            let condensed = self.llm.complete(&prompt).await?;
            let condensed = condensed.trim();
            debug!("Condensed question: {}", condensed);
            if condensed.is_empty() {
                question.to_string()
            } else {
                condensed.to_string()
            }
        };

        let source_documents = self.retriever.retrieve(&standalone).await?;
        info!("Answering with {} context documents", source_documents.len());

        let context = source_documents
            .iter()
            .map(|doc| doc.page_content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = self.prompts.render_qa(&context, &standalone);
        let answer = self.llm.complete(&prompt).await?;

        Ok(AnswerResult {
            answer: answer.trim().to_string(),
            source_documents,
        })
    }
}
