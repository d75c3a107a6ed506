//! Error types for the session layer.

use thiserror::Error;

/// Result type for session and pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Session layer error types.
#[derive(Debug, Error)]
pub enum Error {
    /// DNS/TCP/TLS failure or a stream that ended before a status was read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The vendor answered with a status the pipeline does not accept.
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    /// Redirect chain exceeded the configured cap.
    #[error("Too many redirects (limit {limit})")]
    TooManyRedirects { limit: usize },

    /// A structurally valid response lacked a field of the auth chain.
    #[error("Missing field in response: {0}")]
    MissingField(&'static str),

    /// Token exchange succeeded but the bootstrap call does not report a login.
    #[error("Verify login failed after token exchange")]
    VerifyFailed,

    /// The operation requires a refresh token.
    #[error("Not logged in")]
    NotLoggedIn,

    /// Persisted session text is malformed.
    #[error("Invalid session data: {0}")]
    InvalidSession(String),

    /// Response body is not the expected JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL could not be parsed or resolved.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A scheduled task could not be joined.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl Error {
    /// Returns true for errors that leave credentials intact and may succeed
    /// on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Http { .. } | Error::TooManyRedirects { .. }
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidUrl(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Scheduler(format!("Task join error: {}", e))
    }
}
