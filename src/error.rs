//! Error taxonomy for sandbox session calls.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Unexpected response from session pool: {0}")]
    Protocol(String),

    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Session pool returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        SessionError::Transport {
            context: context.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
