use std::path::PathBuf;

use thiserror::Error;

use billnotify_backend::BackendError;
use billnotify_channel::ChannelError;
use billnotify_core::DomainError;

/// Why a tick ended without processing its batch.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("invalid notifier configuration: {0}")]
    Config(#[from] DomainError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl TickError {
    /// Errors no later tick can recover from; the worker should exit.
    pub fn is_fatal(&self) -> bool {
        match self {
            TickError::Config(_) => true,
            TickError::Backend(err) => err.is_fatal(),
            TickError::Channel(err) => matches!(err, ChannelError::AuthLost(_)),
        }
    }
}

#[derive(Debug, Error)]
#[error("attachment {path}: {source}")]
pub struct AttachmentError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
