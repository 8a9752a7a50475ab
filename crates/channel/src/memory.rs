//! Loopback session for tests and local development.
//!
//! Accepts everything by default: stored credentials resume, pairing
//! completes immediately and the readiness signal fires. Each behavior can be
//! switched off to reproduce the failure modes of a real session.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;

use crate::credentials::StoredCredential;
use crate::error::ChannelError;
use crate::session::{
    ChannelSession, ConnectOutcome, OutgoingMessage, PairingChallenge, Receipt, RemoteState,
    SessionEvent,
};

/// A message accepted by the loopback session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackMessage {
    pub to: String,
    pub text: String,
    pub attachment_name: Option<String>,
    pub attachment_len: usize,
    pub message_id: String,
}

#[derive(Debug)]
struct Inner {
    accept_credentials: bool,
    auto_pair: bool,
    emit_ready: bool,
    remote_state: RemoteState,
    chats_available: bool,
    fail_sends: u32,
    connects: u32,
    sent: Vec<LoopbackMessage>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

#[derive(Debug)]
pub struct InMemorySession {
    inner: Mutex<Inner>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl Default for InMemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySession {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                accept_credentials: true,
                auto_pair: true,
                emit_ready: true,
                remote_state: RemoteState::Connected,
                chats_available: true,
                fail_sends: 0,
                connects: 0,
                sent: Vec::new(),
                events: Some(tx),
            }),
            events: tokio::sync::Mutex::new(rx),
        }
    }

    /// Never emit the readiness signal, even though sends would work.
    pub fn without_ready_signal(self) -> Self {
        self.update(|i| i.emit_ready = false);
        self
    }

    /// Leave pairing pending until [`SessionEvent::Paired`] is emitted.
    pub fn with_manual_pairing(self) -> Self {
        self.update(|i| i.auto_pair = false);
        self
    }

    /// Reject stored credentials on connect.
    pub fn rejecting_credentials(self) -> Self {
        self.update(|i| i.accept_credentials = false);
        self
    }

    /// Inject a lifecycle event.
    pub fn emit(&self, event: SessionEvent) {
        self.update(|i| {
            if let Some(tx) = &i.events {
                let _ = tx.send(event);
            }
        });
    }

    /// Close the event stream.
    pub fn close(&self) {
        self.update(|i| i.events = None);
    }

    pub fn set_remote_state(&self, state: RemoteState) {
        self.update(|i| i.remote_state = state);
    }

    pub fn set_chats_available(&self, available: bool) {
        self.update(|i| i.chats_available = available);
    }

    /// Fail the next `n` sends with a send error.
    pub fn fail_next_sends(&self, n: u32) {
        self.update(|i| i.fail_sends = n);
    }

    pub fn sent(&self) -> Vec<LoopbackMessage> {
        self.read(|i| i.sent.clone())
    }

    pub fn connects(&self) -> u32 {
        self.read(|i| i.connects)
    }

    fn update(&self, f: impl FnOnce(&mut Inner)) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut inner);
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f(&inner)
    }
}

fn loopback_credential() -> StoredCredential {
    StoredCredential {
        identity: "loopback".to_string(),
        secret: "loopback-secret".to_string(),
        paired_at: Utc::now(),
    }
}

#[async_trait]
impl ChannelSession for InMemorySession {
    async fn connect(
        &self,
        credential: Option<&StoredCredential>,
    ) -> Result<ConnectOutcome, ChannelError> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.connects += 1;
        let emit_ready = inner.emit_ready;
        let send = |event: SessionEvent| {
            if let Some(tx) = &inner.events {
                let _ = tx.send(event);
            }
        };

        if credential.is_some() && inner.accept_credentials {
            if emit_ready {
                send(SessionEvent::Ready);
            }
            return Ok(ConnectOutcome::Resumed);
        }

        let challenge = PairingChallenge {
            code: "LOOP-BACK".to_string(),
            expires_at: Utc::now() + ChronoDuration::minutes(2),
        };
        if inner.auto_pair {
            send(SessionEvent::Paired(loopback_credential()));
            if emit_ready {
                send(SessionEvent::Ready);
            }
        }
        Ok(ConnectOutcome::PairingRequired(challenge))
    }

    async fn next_event(&self) -> Option<SessionEvent> {
        self.events.lock().await.recv().await
    }

    async fn remote_state(&self) -> Result<RemoteState, ChannelError> {
        Ok(self.read(|i| i.remote_state.clone()))
    }

    async fn list_chats(&self, limit: usize) -> Result<usize, ChannelError> {
        if self.read(|i| i.chats_available) {
            Ok(limit.min(1))
        } else {
            Err(ChannelError::Transport("chat listing unavailable".to_string()))
        }
    }

    async fn send(&self, message: OutgoingMessage<'_>) -> Result<Receipt, ChannelError> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.remote_state != RemoteState::Connected {
            return Err(ChannelError::not_ready(format!("{:?}", inner.remote_state)));
        }
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(ChannelError::Send("loopback send rejected".to_string()));
        }

        let message_id = format!("loop-{}", inner.sent.len() + 1);
        inner.sent.push(LoopbackMessage {
            to: message.to.to_string(),
            text: message.text.to_string(),
            attachment_name: message.attachment.map(|a| a.file_name.clone()),
            attachment_len: message.attachment.map_or(0, |a| a.len()),
            message_id: message_id.clone(),
        });
        Ok(Receipt {
            message_id,
            timestamp: Utc::now(),
        })
    }
}
