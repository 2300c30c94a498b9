use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single `generateContent` call.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Gemini API Error: {0}")]
    Transport(String),
    #[error("Gemini API Error: status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Gemini API Error: invalid response from completion service")]
    InvalidResponse,
}

/// Failure of a `sendMessage` call to the Telegram Bot API.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Telegram API Error: {0}")]
    Transport(String),
    #[error("Telegram API Error: status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Telegram API Error: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.without_url().to_string())
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.without_url().to_string())
    }
}
