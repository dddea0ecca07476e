use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::UiConfig;
use crate::services::conversation::{ChatState, CitedSource, SessionSnapshot, TranscriptEntry};

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub question: String,
}

// ===== RESPONSE MODELS =====

/// Transcript entry as sent to the browser. `sources` is omitted when
/// citations are switched off.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptItem {
    Answered {
        id: usize,
        question: String,
        answer: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sources: Option<Vec<CitedSource>>,
        created_at: DateTime<Utc>,
    },
    Failed {
        id: usize,
        question: String,
        error_kind: &'static str,
        message: String,
        created_at: DateTime<Utc>,
    },
}

impl TranscriptItem {
    pub fn from_entry(entry: TranscriptEntry, show_sources: bool) -> Self {
        match entry {
            TranscriptEntry::Answered(record) => TranscriptItem::Answered {
                id: record.id,
                question: record.question,
                answer: record.answer,
                sources: show_sources.then_some(record.sources),
                created_at: record.created_at,
            },
            TranscriptEntry::Failed {
                id,
                question,
                error_kind,
                message,
                created_at,
            } => TranscriptItem::Failed {
                id,
                question,
                error_kind,
                message,
                created_at,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub entry: TranscriptItem,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub state: ChatState,
    pub history_length: usize,
    pub history_capacity: usize,
    pub transcript: Vec<TranscriptItem>,
}

impl SessionResponse {
    pub fn from_snapshot(snapshot: SessionSnapshot, show_sources: bool) -> Self {
        Self {
            session_id: snapshot.session_id,
            state: snapshot.state,
            history_length: snapshot.history_length,
            history_capacity: snapshot.history_capacity,
            transcript: snapshot
                .transcript
                .into_iter()
                .map(|entry| TranscriptItem::from_entry(entry, show_sources))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UiConfigResponse {
    pub header_title: String,
    pub page_title: String,
    pub provider: String,
    pub text_input_prompt: String,
    pub text_input_placeholder: String,
    pub text_input_help: String,
    pub show_doc_sources: bool,
    pub show_sample_questions: bool,
    pub sample_questions: Vec<String>,
}

impl UiConfigResponse {
    pub fn new(ui: &UiConfig, provider_name: &str) -> Self {
        Self {
            header_title: format!("{} and {}", ui.header_title, provider_name),
            page_title: ui.page_title.clone(),
            provider: provider_name.to_string(),
            text_input_prompt: ui.text_input_prompt.clone(),
            text_input_placeholder: ui.text_input_placeholder.clone(),
            text_input_help: ui.text_input_help.clone(),
            show_doc_sources: ui.show_doc_sources,
            show_sample_questions: ui.show_sample_questions,
            sample_questions: if ui.show_sample_questions {
                ui.sample_questions.clone()
            } else {
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::AnswerRecord;
    use serde_json::json;

    fn answered() -> TranscriptEntry {
        TranscriptEntry::Answered(AnswerRecord {
            id: 1,
            question: "q".to_string(),
            answer: "a".to_string(),
            sources: vec![CitedSource {
                locator: "https://a".to_string(),
                title: None,
            }],
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_sources_omitted_when_disabled() {
        let hidden = serde_json::to_value(TranscriptItem::from_entry(answered(), false)).unwrap();
        assert!(hidden.get("sources").is_none());
        assert_eq!(hidden["kind"], json!("answered"));

        let shown = serde_json::to_value(TranscriptItem::from_entry(answered(), true)).unwrap();
        assert_eq!(shown["sources"][0]["locator"], json!("https://a"));
    }

    #[test]
    fn test_header_title_names_provider() {
        let ui = UiConfig::default();
        let response = UiConfigResponse::new(&ui, "Cohere Command");
        assert_eq!(
            response.header_title,
            "A Chatbot powered by Amazon Kendra and Cohere Command"
        );
        assert_eq!(response.sample_questions.len(), 7);
    }
}
