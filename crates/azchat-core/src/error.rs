use std::time::Duration;

use thiserror::Error;

/// Everything that can end a chat turn without a result.
///
/// Per-line decode failures are not listed here: the decoder counts and
/// skips them, they never reach the caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server went quiet: no response headers, or no body bytes, within
    /// the configured limit.
    #[error("transport error: no data while {stage} for {after:?}")]
    Stalled { stage: &'static str, after: Duration },

    #[error("chat API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no data received")]
    EmptyResponse,

    #[error("invalid response content: stream produced no text")]
    EmptyContent,

    #[error("turn cancelled")]
    Cancelled,

    #[error("request task ended without a result")]
    TaskEnded,
}

impl ChatError {
    /// Whether another attempt at the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Transport(e) => e.is_connect() || e.is_timeout(),
            ChatError::Stalled { .. } => true,
            ChatError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            ChatError::Transport(e) => e.is_timeout(),
            ChatError::Stalled { .. } => true,
            _ => false,
        }
    }
}
