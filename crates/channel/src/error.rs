use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel is not `Ready`; the caller should defer the whole tick.
    #[error("channel not ready (state: {state})")]
    NotReady { state: String },

    /// A single send failed; the document stays undelivered.
    #[error("send failed: {0}")]
    Send(String),

    #[error("attachment of {size} bytes exceeds the {max} byte limit")]
    AttachmentTooLarge { size: usize, max: usize },

    /// Authentication was lost for good; an operator has to pair again.
    #[error("channel authentication lost: {0}")]
    AuthLost(String),

    #[error("credential store {0} is held by another adapter")]
    CredentialStoreLocked(PathBuf),

    #[error("credential store error: {0}")]
    CredentialStore(String),

    /// Talking to the underlying session failed.
    #[error("channel transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    pub fn not_ready(state: impl core::fmt::Display) -> Self {
        Self::NotReady {
            state: state.to_string(),
        }
    }

    /// Errors that mean no further sends can succeed in this tick.
    pub fn defers_tick(&self) -> bool {
        matches!(
            self,
            ChannelError::NotReady { .. } | ChannelError::AuthLost(_) | ChannelError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}
