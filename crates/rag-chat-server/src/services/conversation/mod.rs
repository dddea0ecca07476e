//! Conversation state management:
//! - bounded history window sent as context
//! - per-session transcript and in-flight state
//! - session registry (DashMap) with idle expiry
//! - orchestration of provider calls

mod history;
pub mod orchestrator;
pub mod session;
mod store;

pub use history::{HistoryWindow, Turn};
pub use orchestrator::ChatOrchestrator;
pub use session::{
    dedup_sources, AnswerRecord, ChatState, CitedSource, Session, SessionSnapshot,
    TranscriptEntry,
};
pub use store::SessionStore;
