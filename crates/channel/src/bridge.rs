//! Session served by a local messaging gateway over HTTP.
//!
//! Gateway protocol:
//!
//! | call                              | purpose                                   |
//! |-----------------------------------|-------------------------------------------|
//! | `POST /session/start`             | resume with a credential or start pairing |
//! | `GET /session/state`              | remote connection state                   |
//! | `GET /session/events?after=<seq>` | lifecycle events newer than `seq`         |
//! | `GET /chats?limit=1`              | read-only liveness call                   |
//! | `POST /messages`                  | send text plus optional base64 attachment |
//!
//! The gateway answers `409` on `/messages` when its session cannot send, and
//! `410` on `/session/events` once the session is closed.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::credentials::StoredCredential;
use crate::error::ChannelError;
use crate::session::{
    ChannelSession, ConnectOutcome, OutgoingMessage, PairingChallenge, Receipt, RemoteState,
    SessionEvent,
};

#[derive(Debug, Default)]
struct EventCursor {
    after: u64,
    buffered: VecDeque<SessionEvent>,
    failing: bool,
}

#[derive(Debug)]
pub struct HttpBridgeSession {
    base_url: String,
    http: reqwest::Client,
    poll_interval: Duration,
    cursor: Mutex<EventCursor>,
}

impl HttpBridgeSession {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            poll_interval: Duration::from_secs(1),
            cursor: Mutex::new(EventCursor::default()),
        })
    }

    /// Delay between event polls that returned nothing.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn poll_events(&self, after: u64) -> Result<Option<Vec<WireEvent>>, ChannelError> {
        let resp = self
            .http
            .get(self.url("/session/events"))
            .query(&[("after", after)])
            .send()
            .await?;
        if resp.status() == StatusCode::GONE {
            return Ok(None);
        }
        let resp = check(resp).await?;
        let events = resp
            .json()
            .await
            .map_err(|e| ChannelError::Transport(format!("malformed events: {e}")))?;
        Ok(Some(events))
    }
}

#[async_trait]
impl ChannelSession for HttpBridgeSession {
    async fn connect(
        &self,
        credential: Option<&StoredCredential>,
    ) -> Result<ConnectOutcome, ChannelError> {
        let body = StartRequest {
            credential: credential.map(|c| WireCredential {
                identity: c.identity.clone(),
                secret: c.secret.clone(),
            }),
        };
        let resp = self.http.post(self.url("/session/start")).json(&body).send().await?;
        let resp = check(resp).await?;
        match resp
            .json::<StartResponse>()
            .await
            .map_err(|e| ChannelError::Transport(format!("malformed start response: {e}")))?
        {
            StartResponse::Resumed => Ok(ConnectOutcome::Resumed),
            StartResponse::Pairing { code, expires_at } => {
                Ok(ConnectOutcome::PairingRequired(PairingChallenge { code, expires_at }))
            }
        }
    }

    async fn next_event(&self) -> Option<SessionEvent> {
        loop {
            let after = {
                let mut cursor = self.cursor.lock().await;
                if let Some(event) = cursor.buffered.pop_front() {
                    return Some(event);
                }
                cursor.after
            };

            match self.poll_events(after).await {
                Ok(None) => return None,
                Ok(Some(events)) => {
                    let mut cursor = self.cursor.lock().await;
                    cursor.failing = false;
                    if events.is_empty() {
                        drop(cursor);
                        tokio::time::sleep(self.poll_interval).await;
                        continue;
                    }
                    for event in events {
                        cursor.after = cursor.after.max(event.seq);
                        cursor.buffered.push_back(event.kind.into());
                    }
                }
                Err(err) => {
                    let first_failure = {
                        let mut cursor = self.cursor.lock().await;
                        !std::mem::replace(&mut cursor.failing, true)
                    };
                    debug!(error = %err, "gateway event poll failed");
                    if first_failure {
                        return Some(SessionEvent::Disconnected(format!("gateway unreachable: {err}")));
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn remote_state(&self) -> Result<RemoteState, ChannelError> {
        let resp = self.http.get(self.url("/session/state")).send().await?;
        let resp = check(resp).await?;
        let body: StateResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Transport(format!("malformed state response: {e}")))?;
        Ok(body.state)
    }

    async fn list_chats(&self, limit: usize) -> Result<usize, ChannelError> {
        let resp = self
            .http
            .get(self.url("/chats"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        let resp = check(resp).await?;
        let chats: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| ChannelError::Transport(format!("malformed chat list: {e}")))?;
        Ok(chats.len())
    }

    async fn send(&self, message: OutgoingMessage<'_>) -> Result<Receipt, ChannelError> {
        let body = SendRequest {
            to: message.to.as_str(),
            text: message.text,
            attachment: message.attachment.map(|a| WireAttachment {
                file_name: &a.file_name,
                mime_type: &a.mime_type,
                data: BASE64.encode(&a.bytes),
            }),
        };

        let resp = match self.http.post(self.url("/messages")).json(&body).send().await {
            Ok(resp) => resp,
            // Nothing left the process; safe to treat as a transport outage.
            Err(err) if err.is_connect() => return Err(ChannelError::Transport(err.to_string())),
            // The gateway may or may not have sent it.
            Err(err) => return Err(ChannelError::Send(err.to_string())),
        };

        let status = resp.status();
        if status == StatusCode::CONFLICT {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::not_ready(body));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Send(format!("gateway returned {status}: {body}")));
        }

        let sent: SendResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Send(format!("malformed send response: {e}")))?;
        Ok(Receipt {
            message_id: sent.id,
            timestamp: sent.timestamp,
        })
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ChannelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ChannelError::Transport(format!("gateway returned {status}: {body}")))
}

#[derive(Debug, Serialize)]
struct WireCredential {
    identity: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct StartRequest {
    credential: Option<WireCredential>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum StartResponse {
    Resumed,
    Pairing {
        code: String,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    state: RemoteState,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    seq: u64,
    #[serde(flatten)]
    kind: WireEventKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEventKind {
    PairingCode {
        code: String,
        expires_at: DateTime<Utc>,
    },
    Paired {
        identity: String,
        secret: String,
    },
    Ready,
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    AuthFailure {
        #[serde(default)]
        reason: String,
    },
}

impl From<WireEventKind> for SessionEvent {
    fn from(kind: WireEventKind) -> Self {
        match kind {
            WireEventKind::PairingCode { code, expires_at } => {
                SessionEvent::PairingCode(PairingChallenge { code, expires_at })
            }
            WireEventKind::Paired { identity, secret } => SessionEvent::Paired(StoredCredential {
                identity,
                secret,
                paired_at: Utc::now(),
            }),
            WireEventKind::Ready => SessionEvent::Ready,
            WireEventKind::Disconnected { reason } => SessionEvent::Disconnected(reason),
            WireEventKind::AuthFailure { reason } => SessionEvent::AuthFailure(reason),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireAttachment<'a> {
    file_name: &'a str,
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    text: &'a str,
    attachment: Option<WireAttachment<'a>>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
    timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_flattened_events() {
        let events: Vec<WireEvent> = serde_json::from_str(
            r#"[
                {"seq": 1, "type": "pairing_code", "code": "AB-12", "expires_at": "2030-01-01T00:00:00Z"},
                {"seq": 2, "type": "paired", "identity": "521", "secret": "s"},
                {"seq": 3, "type": "ready"},
                {"seq": 4, "type": "disconnected"}
            ]"#,
        )
        .unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[2].seq, 3);
        let kinds: Vec<SessionEvent> = events.into_iter().map(|e| e.kind.into()).collect();
        assert!(matches!(&kinds[0], SessionEvent::PairingCode(c) if c.code == "AB-12"));
        assert!(matches!(&kinds[1], SessionEvent::Paired(c) if c.identity == "521"));
        assert_eq!(kinds[2], SessionEvent::Ready);
        assert_eq!(kinds[3], SessionEvent::Disconnected(String::new()));
    }

    #[test]
    fn unknown_remote_state_is_tolerated() {
        let s: StateResponse = serde_json::from_str(r#"{"state": "OPENING"}"#).unwrap();
        assert_eq!(s.state, RemoteState::Unknown);
        let s: StateResponse = serde_json::from_str(r#"{"state": "CONNECTED"}"#).unwrap();
        assert_eq!(s.state, RemoteState::Connected);
    }
}
