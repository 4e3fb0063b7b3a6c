use std::path::PathBuf;
use thiserror::Error;

/// Failures talking to the DocQ&A API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{endpoint} returned status {status}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        /// First bytes of the body, for the log only
        excerpt: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not decode {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not read {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons the conversation state machine declines an ask transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AskError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("a question is already being answered")]
    AlreadyAsking,

    #[error("answer does not belong to the outstanding question")]
    StaleTicket,
}
