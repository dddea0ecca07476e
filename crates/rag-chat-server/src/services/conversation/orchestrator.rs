use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::session::{SessionSnapshot, TranscriptEntry};
use super::store::SessionStore;
use crate::services::providers::{ChainHandle, ProviderAdapter};
use crate::utils::error::ChatError;

/// Routes each question through the active provider and folds the result
/// back into the session.
#[derive(Clone)]
pub struct ChatOrchestrator {
    adapter: Arc<dyn ProviderAdapter>,
    chain: ChainHandle,
    sessions: SessionStore,
}

impl ChatOrchestrator {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, chain: ChainHandle, sessions: SessionStore) -> Self {
        Self {
            adapter,
            chain,
            sessions,
        }
    }

    /// Reuse `session_id` when given, otherwise start a fresh session.
    pub fn open_session(&self, session_id: Option<&str>) -> String {
        let id = match session_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        self.sessions.get_or_create(&id);
        id
    }

    /// Answer `question` in `session_id`.
    ///
    /// The provider call runs on its own task and records its outcome
    /// there, so a caller that goes away mid-answer cannot leave the
    /// session stuck in `AwaitingAnswer`.
    pub async fn submit(
        &self,
        session_id: &str,
        question: &str,
    ) -> Result<TranscriptEntry, ChatError> {
        let session = self.sessions.get_or_create(session_id);
        let pending = session.lock().begin(question)?;

        info!("Session {}: answering {:?}", session_id, pending.question);

        let adapter = self.adapter.clone();
        let chain = self.chain.clone();
        let task_session = session.clone();
        let task_pending = pending.clone();

        let task = tokio::spawn(async move {
            let call = async {
                adapter
                    .answer(&chain, &task_pending.question, &task_pending.history)
                    .await
            };
            let outcome = AssertUnwindSafe(call)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(ChatError::Provider("provider call panicked".to_string()))
                });

            if let Err(err) = &outcome {
                error!("Provider call failed: {}", err);
            }

            task_session.lock().complete(task_pending, outcome)
        });

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                error!("Answer task for session {} aborted: {}", session_id, join_err);
                session.lock().abandon(&pending);
                Err(ChatError::Provider(format!("answer task aborted: {}", join_err)))
            }
        }
    }

    /// Reset transcript and history and return the emptied session.
    ///
    /// Idempotent, and an unknown id simply yields a fresh empty session.
    pub fn clear(&self, session_id: &str) -> SessionSnapshot {
        let session = self.sessions.get_or_create(session_id);
        let mut session = session.lock();
        session.clear();
        info!("Session {} cleared", session_id);
        session.snapshot()
    }

    pub fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, ChatError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| ChatError::SessionNotFound(session_id.to_string()))?;
        let snapshot = session.lock().snapshot();
        Ok(snapshot)
    }

    pub fn cleanup_expired_sessions(&self) -> usize {
        let removed = self.sessions.cleanup_expired();
        if removed > 0 {
            warn!("{} idle sessions expired", removed);
        }
        removed
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::services::chain::{AnswerResult, ConversationalRetrievalChain, PromptTemplates};
    use crate::services::conversation::{ChatState, HistoryWindow};
    use crate::services::llm::MockLlmClient;
    use crate::services::providers::{MockProviderAdapter, Provider};
    use crate::services::retriever::{MockRetriever, SourceDocument};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn chain() -> ChainHandle {
        ChainHandle::new(
            Provider::OpenAi,
            ConversationalRetrievalChain::new(
                Arc::new(MockLlmClient::new()),
                Arc::new(MockRetriever::new()),
                PromptTemplates::default(),
            ),
        )
    }

    fn orchestrator(adapter: impl ProviderAdapter + 'static, k: usize) -> ChatOrchestrator {
        ChatOrchestrator::new(
            Arc::new(adapter),
            chain(),
            SessionStore::new(k, Duration::from_secs(3600)),
        )
    }

    fn ok(question: &str) -> Result<AnswerResult, ChatError> {
        Ok(AnswerResult {
            answer: format!("answer to {}", question),
            source_documents: vec![
                SourceDocument::new("c", "https://a"),
                SourceDocument::new("c", "https://a"),
            ],
        })
    }

    /// Mock adapter that records the history questions it was called with.
    fn recording_adapter(
        fail_on: Option<&'static str>,
    ) -> (MockProviderAdapter, Arc<Mutex<Vec<Vec<String>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        let mut adapter = MockProviderAdapter::new();
        adapter
            .expect_answer()
            .returning(move |_, question, history: &HistoryWindow| {
                log.lock()
                    .push(history.iter().map(|t| t.question().to_string()).collect());
                if Some(question) == fail_on {
                    Err(ChatError::Provider("upstream timeout".to_string()))
                } else {
                    ok(question)
                }
            });
        (adapter, seen)
    }

    #[tokio::test]
    async fn test_six_questions_keep_last_five_turns() {
        let (adapter, seen) = recording_adapter(None);
        let orch = orchestrator(adapter, 5);
        let id = orch.open_session(None);

        for i in 1..=6 {
            orch.submit(&id, &format!("q{}", i)).await.unwrap();
        }

        let snapshot = orch.snapshot(&id).unwrap();
        assert_eq!(snapshot.transcript.len(), 6);
        assert_eq!(snapshot.history_length, 5);
        assert_eq!(snapshot.state, ChatState::Idle);

        // The sixth call saw turns 1-5; afterwards the window holds 2-6
        assert_eq!(seen.lock()[5], vec!["q1", "q2", "q3", "q4", "q5"]);
    }

    #[tokio::test]
    async fn test_failed_turn_is_recorded_and_history_untouched() {
        let (adapter, seen) = recording_adapter(Some("q3"));
        let orch = orchestrator(adapter, 5);
        let id = orch.open_session(Some("fixed-id"));
        assert_eq!(id, "fixed-id");

        orch.submit(&id, "q1").await.unwrap();
        orch.submit(&id, "q2").await.unwrap();
        let failed = orch.submit(&id, "q3").await;
        assert!(matches!(failed, Err(ChatError::Provider(_))));
        orch.submit(&id, "q4").await.unwrap();

        let snapshot = orch.snapshot(&id).unwrap();
        assert_eq!(snapshot.transcript.len(), 4);
        assert!(matches!(
            &snapshot.transcript[2],
            TranscriptEntry::Failed { id: 3, .. }
        ));
        assert_eq!(seen.lock()[3], vec!["q1", "q2"]);
        assert_eq!(snapshot.history_length, 3);
    }

    #[tokio::test]
    async fn test_zero_history_always_sends_empty_window() {
        let (adapter, seen) = recording_adapter(None);
        let orch = orchestrator(adapter, 0);
        let id = orch.open_session(None);

        for q in ["q1", "q2", "q3"] {
            orch.submit(&id, q).await.unwrap();
        }

        assert!(seen.lock().iter().all(Vec::is_empty));
        assert_eq!(orch.snapshot(&id).unwrap().history_length, 0);
    }

    #[tokio::test]
    async fn test_clear_twice_equals_once() {
        let (adapter, _) = recording_adapter(None);
        let orch = orchestrator(adapter, 5);
        let id = orch.open_session(None);
        orch.submit(&id, "q1").await.unwrap();

        let once = orch.clear(&id);
        let twice = orch.clear(&id);

        assert!(once.transcript.is_empty());
        assert_eq!(once.history_length, 0);
        assert_eq!(twice.transcript.len(), once.transcript.len());
        assert_eq!(twice.history_length, once.history_length);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let orch = orchestrator(MockProviderAdapter::new(), 5);
        assert!(matches!(orch.snapshot("nope"), Err(ChatError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_clear_on_fresh_session_is_empty() {
        let orch = orchestrator(MockProviderAdapter::new(), 5);

        let cleared = orch.clear("fresh-tab");
        assert_eq!(cleared.session_id, "fresh-tab");
        assert!(cleared.transcript.is_empty());
        assert_eq!(cleared.state, ChatState::Idle);

        assert!(orch.snapshot("fresh-tab").unwrap().transcript.is_empty());
    }

    #[tokio::test]
    async fn test_blank_question_never_reaches_adapter() {
        let mut adapter = MockProviderAdapter::new();
        adapter.expect_answer().never();
        let orch = orchestrator(adapter, 5);
        let id = orch.open_session(None);

        let result = orch.submit(&id, " \n ").await;
        assert!(matches!(result, Err(ChatError::InvalidQuestion(_))));
    }

    /// Blocks in `answer` until released.
    struct GatedAdapter {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ProviderAdapter for GatedAdapter {
        fn initialize(&self, _settings: &Settings) -> Result<ChainHandle, ChatError> {
            Ok(chain())
        }

        async fn answer(
            &self,
            _chain: &ChainHandle,
            question: &str,
            _history: &HistoryWindow,
        ) -> Result<AnswerResult, ChatError> {
            self.started.notify_one();
            self.release.notified().await;
            ok(question)
        }
    }

    fn gated() -> (Arc<ChatOrchestrator>, Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let orch = orchestrator(
            GatedAdapter {
                started: started.clone(),
                release: release.clone(),
            },
            5,
        );
        (Arc::new(orch), started, release)
    }

    #[tokio::test]
    async fn test_second_question_while_awaiting_is_busy() {
        let (orch, started, release) = gated();
        let id = orch.open_session(None);

        let first = {
            let orch = orch.clone();
            let id = id.clone();
            tokio::spawn(async move { orch.submit(&id, "q1").await })
        };
        started.notified().await;

        assert!(matches!(orch.submit(&id, "q2").await, Err(ChatError::Busy)));
        assert_eq!(orch.snapshot(&id).unwrap().state, ChatState::AwaitingAnswer);

        release.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(orch.snapshot(&id).unwrap().transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_during_flight_discards_late_answer() {
        let (orch, started, release) = gated();
        let id = orch.open_session(None);

        let first = {
            let orch = orch.clone();
            let id = id.clone();
            tokio::spawn(async move { orch.submit(&id, "q1").await })
        };
        started.notified().await;

        let cleared = orch.clear(&id);
        assert!(cleared.transcript.is_empty());
        assert_eq!(cleared.state, ChatState::AwaitingAnswer);

        release.notify_one();

        assert!(matches!(first.await.unwrap(), Err(ChatError::Cancelled(_))));
        let snapshot = orch.snapshot(&id).unwrap();
        assert!(snapshot.transcript.is_empty());
        assert_eq!(snapshot.history_length, 0);
        assert_eq!(snapshot.state, ChatState::Idle);
    }

    /// Blocks in `answer` until released and tracks how many calls overlap.
    struct CountingAdapter {
        started: Arc<Notify>,
        release: Arc<Notify>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProviderAdapter for CountingAdapter {
        fn initialize(&self, _settings: &Settings) -> Result<ChainHandle, ChatError> {
            Ok(chain())
        }

        async fn answer(
            &self,
            _chain: &ChainHandle,
            question: &str,
            _history: &HistoryWindow,
        ) -> Result<AnswerResult, ChatError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ok(question)
        }
    }

    #[tokio::test]
    async fn test_clear_then_submit_never_overlaps_provider_calls() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let orch = Arc::new(orchestrator(
            CountingAdapter {
                started: started.clone(),
                release: release.clone(),
                in_flight: in_flight.clone(),
                peak: peak.clone(),
            },
            5,
        ));

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.submit("s", "q1").await })
        };
        started.notified().await;

        orch.clear("s");
        assert!(matches!(orch.submit("s", "q2").await, Err(ChatError::Busy)));
        assert_eq!(in_flight.load(Ordering::SeqCst), 1);

        release.notify_one();
        assert!(matches!(first.await.unwrap(), Err(ChatError::Cancelled(_))));

        // Once the stale call is gone the session takes questions again
        release.notify_one();
        orch.submit("s", "q2").await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(orch.snapshot("s").unwrap().transcript.len(), 1);
    }

    struct PanickingAdapter;

    #[async_trait]
    impl ProviderAdapter for PanickingAdapter {
        fn initialize(&self, _settings: &Settings) -> Result<ChainHandle, ChatError> {
            Ok(chain())
        }

        async fn answer(
            &self,
            _chain: &ChainHandle,
            _question: &str,
            _history: &HistoryWindow,
        ) -> Result<AnswerResult, ChatError> {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn test_panicking_provider_is_a_failed_turn() {
        let orch = orchestrator(PanickingAdapter, 5);
        let id = orch.open_session(None);

        assert!(matches!(orch.submit(&id, "q1").await, Err(ChatError::Provider(_))));

        let snapshot = orch.snapshot(&id).unwrap();
        assert_eq!(snapshot.state, ChatState::Idle);
        assert_eq!(snapshot.transcript.len(), 1);
    }
}
