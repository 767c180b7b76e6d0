use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend rejected request ({status}): {}", .error.message)]
    Api { status: u16, error: ApiError },
    #[error("invalid backend payload: {0}")]
    InvalidPayload(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Api { error, .. } => error.code,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidPayload(_) | Self::Config(_) => ErrorCode::Validation,
            Self::Transport(_) => ErrorCode::Internal,
        }
    }

    /// Text meant for the person at the keyboard: the backend's own message when there is
    /// one, the full error otherwise.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { error, .. } => error.message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no current candidate: every fetched candidate has a response")]
    NoCurrentCandidate,
    #[error("failed to load candidates: {0}")]
    Fetch(#[source] GatewayError),
    #[error("failed to record response: {0}")]
    Emit(#[source] GatewayError),
}
