use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures produced by the chat core (settings, providers, sessions).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    /// Missing mandatory parameter or unrecognized provider. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Upstream LLM or search-index call failed.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Upstream answered but the payload lacks the expected answer field.
    #[error("Malformed result: {0}")]
    MalformedResult(String),

    #[error("A question is already being answered for this session")]
    Busy,

    #[error("Question cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl ChatError {
    /// Errors that fail a single turn and are recorded in the transcript.
    pub fn is_turn_failure(&self) -> bool {
        matches!(self, ChatError::Provider(_) | ChatError::MalformedResult(_))
    }

    /// Stable identifier shown to the browser next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Configuration(_) => "configuration_error",
            ChatError::Provider(_) => "provider_error",
            ChatError::MalformedResult(_) => "malformed_result",
            ChatError::Busy => "busy",
            ChatError::Cancelled(_) => "cancelled",
            ChatError::InvalidQuestion(_) => "invalid_question",
            ChatError::SessionNotFound(_) => "session_not_found",
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let message = err.to_string();
        match err {
            ChatError::Busy | ChatError::Cancelled(_) => ApiError::Conflict(message),
            ChatError::InvalidQuestion(_) => ApiError::BadRequest(message),
            ChatError::SessionNotFound(_) => ApiError::NotFound(message),
            ChatError::Provider(_) | ChatError::MalformedResult(_) => ApiError::Upstream(message),
            ChatError::Configuration(_) => ApiError::InternalError(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::NotFound(msg) => {
                tracing::warn!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, "NotFound", msg)
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            ApiError::Conflict(msg) => {
                tracing::warn!("Conflict: {}", msg);
                (StatusCode::CONFLICT, "Conflict", msg)
            }
            ApiError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, "UpstreamError", msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_failures() {
        assert!(ChatError::Provider("timeout".into()).is_turn_failure());
        assert!(ChatError::MalformedResult("no answer".into()).is_turn_failure());
        assert!(!ChatError::Busy.is_turn_failure());
        assert!(!ChatError::Configuration("x".into()).is_turn_failure());
    }

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (ChatError::Busy, StatusCode::CONFLICT),
            (ChatError::InvalidQuestion("empty".into()), StatusCode::BAD_REQUEST),
            (ChatError::SessionNotFound("abc".into()), StatusCode::NOT_FOUND),
            (ChatError::Provider("down".into()), StatusCode::BAD_GATEWAY),
            (ChatError::MalformedResult("x".into()), StatusCode::BAD_GATEWAY),
            (ChatError::Configuration("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
