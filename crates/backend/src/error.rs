use thiserror::Error;

/// Errors surfaced by the backend client and the services built on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Bad credentials or unreachable host while logging in. Needs an operator.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request was rejected again right after reauthenticating.
    #[error("session rejected after reauthentication")]
    Session,

    /// Connection failure or timeout; safe to retry with backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response other than an expired session.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A response did not match the expected record shape.
    #[error("invalid backend payload: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A write-back hit a document already in a different terminal state.
    #[error("record conflict: {0}")]
    Conflict(String),
}

impl BackendError {
    /// Whether the caller may retry the same call after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }

    /// Errors that invalidate the whole tick rather than a single document.
    pub fn aborts_tick(&self) -> bool {
        matches!(
            self,
            BackendError::Auth(_) | BackendError::Session | BackendError::Transport(_)
        )
    }

    /// Whether an operator must intervene before the worker can make progress.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Auth(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}
