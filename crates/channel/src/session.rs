//! The wrapped messaging session and the values exchanged with it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use billnotify_core::Destination;

use crate::attachment::Attachment;
use crate::credentials::StoredCredential;
use crate::error::ChannelError;

/// Time-limited code an operator uses to pair the channel with a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingChallenge {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The stored credential was accepted.
    Resumed,
    /// No usable credential; an operator must pair the device.
    PairingRequired(PairingChallenge),
}

/// Lifecycle events emitted by the session after `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A fresh pairing code (codes rotate while pairing is pending).
    PairingCode(PairingChallenge),
    /// Pairing completed; the credential must be persisted.
    Paired(StoredCredential),
    /// The session reports it can send. Known to be unreliable.
    Ready,
    Disconnected(String),
    /// The remote side revoked the session.
    AuthFailure(String),
}

/// Connection state as reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteState {
    Connected,
    Connecting,
    Disconnected,
    Unpaired,
    #[serde(other)]
    Unknown,
}

/// One outbound notification.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingMessage<'a> {
    pub to: &'a Destination,
    pub text: &'a str,
    pub attachment: Option<&'a Attachment>,
}

/// Proof that the channel accepted a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A stateful messaging session.
///
/// Implementations only move bytes; pairing, readiness and the send
/// precondition are enforced by [`crate::ChannelAdapter`].
#[async_trait]
pub trait ChannelSession: Send + Sync + 'static {
    /// Open the session, resuming from `credential` when one is given.
    async fn connect(
        &self,
        credential: Option<&StoredCredential>,
    ) -> Result<ConnectOutcome, ChannelError>;

    /// Wait for the next lifecycle event. `None` once the session is closed.
    async fn next_event(&self) -> Option<SessionEvent>;

    async fn remote_state(&self) -> Result<RemoteState, ChannelError>;

    /// Read-only call listing at most `limit` chats; used as a liveness check.
    async fn list_chats(&self, limit: usize) -> Result<usize, ChannelError>;

    async fn send(&self, message: OutgoingMessage<'_>) -> Result<Receipt, ChannelError>;
}
