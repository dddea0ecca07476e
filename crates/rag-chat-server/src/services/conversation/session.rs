use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::history::{HistoryWindow, Turn};
use crate::services::chain::AnswerResult;
use crate::services::retriever::SourceDocument;
use crate::utils::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    Idle,
    AwaitingAnswer,
}

/// A cited document, unique by locator within one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitedSource {
    pub locator: String,
    pub title: Option<String>,
}

/// Stored result of an answered turn.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerRecord {
    /// 1-based position in the transcript.
    pub id: usize,
    pub question: String,
    pub answer: String,
    pub sources: Vec<CitedSource>,
    pub created_at: DateTime<Utc>,
}

/// Keep the first occurrence of each locator, in first-seen order.
pub fn dedup_sources(documents: &[SourceDocument]) -> Vec<CitedSource> {
    let mut sources: Vec<CitedSource> = Vec::with_capacity(documents.len());
    for doc in documents {
        if !sources.iter().any(|s| s.locator == doc.source) {
            sources.push(CitedSource {
                locator: doc.source.clone(),
                title: doc.title.clone(),
            });
        }
    }
    sources
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Answered(AnswerRecord),
    Failed {
        id: usize,
        question: String,
        error_kind: &'static str,
        message: String,
        created_at: DateTime<Utc>,
    },
}

/// Ticket for a question that has been accepted and is being answered.
///
/// Carries the history snapshot the adapter must see, and the epoch the
/// session was in when the question was accepted.
#[derive(Debug, Clone)]
pub struct PendingQuestion {
    pub question: String,
    pub history: HistoryWindow,
    epoch: u64,
}

/// Read-only view of a session for the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: ChatState,
    pub history_length: usize,
    pub history_capacity: usize,
    pub transcript: Vec<TranscriptEntry>,
}

/// Per-user conversation state: the context window, the full transcript
/// and the in-flight flag.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    history: HistoryWindow,
    transcript: Vec<TranscriptEntry>,
    state: ChatState,
    /// Bumped on every clear; answers from an older epoch are discarded.
    epoch: u64,
    idle_ttl: Duration,
    last_activity: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>, history_capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            id: id.into(),
            history: HistoryWindow::new(history_capacity),
            transcript: Vec::new(),
            state: ChatState::Idle,
            epoch: 0,
            idle_ttl,
            last_activity: Instant::now(),
        }
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn history(&self) -> &HistoryWindow {
        &self.history
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Accept `question` and move to `AwaitingAnswer`.
    pub fn begin(&mut self, question: &str) -> Result<PendingQuestion, ChatError> {
        self.touch();

        if self.state == ChatState::AwaitingAnswer {
            warn!("Session {} is busy, rejecting question", self.id);
            return Err(ChatError::Busy);
        }

        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::InvalidQuestion(
                "question must not be empty".to_string(),
            ));
        }

        self.state = ChatState::AwaitingAnswer;
        debug!("Session {}: Idle -> AwaitingAnswer", self.id);

        Ok(PendingQuestion {
            question: question.to_string(),
            history: self.history.clone(),
            epoch: self.epoch,
        })
    }

    /// Record the adapter's outcome and return to `Idle`.
    ///
    /// Success appends the turn to the history window and an answer record
    /// to the transcript. Failure appends an error entry and leaves the
    /// window untouched. A pending question from before the last clear
    /// yields `Cancelled` and only releases the session.
    pub fn complete(
        &mut self,
        pending: PendingQuestion,
        outcome: Result<AnswerResult, ChatError>,
    ) -> Result<TranscriptEntry, ChatError> {
        self.touch();

        if pending.epoch != self.epoch {
            warn!(
                "Session {} was cleared while answering, discarding late result",
                self.id
            );
            self.state = ChatState::Idle;
            return Err(ChatError::Cancelled(
                "the conversation was cleared before the answer arrived".to_string(),
            ));
        }

        self.state = ChatState::Idle;
        debug!("Session {}: AwaitingAnswer -> Idle", self.id);

        let id = self.transcript.len() + 1;
        match outcome {
            Ok(result) => {
                self.history
                    .push(Turn::new(pending.question.clone(), result.answer.clone()));

                let entry = TranscriptEntry::Answered(AnswerRecord {
                    id,
                    question: pending.question,
                    answer: result.answer,
                    sources: dedup_sources(&result.source_documents),
                    created_at: Utc::now(),
                });
                self.transcript.push(entry.clone());
                Ok(entry)
            }
            Err(err) => {
                self.transcript.push(TranscriptEntry::Failed {
                    id,
                    question: pending.question,
                    error_kind: err.kind(),
                    message: err.to_string(),
                    created_at: Utc::now(),
                });
                Err(err)
            }
        }
    }

    /// Return to `Idle` without recording anything, when the answering task
    /// itself died.
    pub fn abandon(&mut self, pending: &PendingQuestion) {
        debug!(
            "Session {}: abandoning question from epoch {}",
            self.id, pending.epoch
        );
        self.state = ChatState::Idle;
    }

    /// Drop transcript and history; any in-flight answer becomes stale.
    ///
    /// The state is left alone. A session that is still waiting on a stale
    /// answer stays `AwaitingAnswer` until that call returns, so at most one
    /// provider call runs per session.
    pub fn clear(&mut self) {
        self.touch();
        self.history.clear();
        self.transcript.clear();
        self.epoch += 1;
        debug!("Session {} cleared (epoch {})", self.id, self.epoch);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            state: self.state,
            history_length: self.history.len(),
            history_capacity: self.history.capacity(),
            transcript: self.transcript.clone(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.state == ChatState::Idle && self.last_activity.elapsed() > self.idle_ttl
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
