//! In-memory messaging gateway speaking the HTTP bridge protocol.
//!
//! Defaults: stored credentials resume, pairing completes immediately and the
//! readiness event is emitted. Controls switch each behavior off.

use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};

const EXPIRES_AT: &str = "2099-01-01T00:00:00Z";
const SENT_AT: &str = "2024-01-01T12:00:00Z";

/// A message the gateway accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: String,
    pub text: String,
    pub attachment: Option<SentAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct Inner {
    accept_credentials: bool,
    auto_pair: bool,
    emit_ready: bool,
    remote_state: String,
    chats_fail: bool,
    refuse_sends: bool,
    fail_sends: u32,
    start_calls: u32,
    next_seq: u64,
    events: Vec<Value>,
    closed: bool,
    sent: Vec<SentMessage>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            accept_credentials: true,
            auto_pair: true,
            emit_ready: true,
            remote_state: "CONNECTED".to_string(),
            chats_fail: false,
            refuse_sends: false,
            fail_sends: 0,
            start_calls: 0,
            next_seq: 0,
            events: Vec::new(),
            closed: false,
            sent: Vec::new(),
        }
    }
}

impl Inner {
    fn push(&mut self, mut event: Value) {
        self.next_seq += 1;
        event["seq"] = json!(self.next_seq);
        self.events.push(event);
    }
}

type Shared = Arc<Mutex<Inner>>;

/// A running mock gateway. The server stops when this is dropped.
pub struct MockGateway {
    pub base_url: String,
    state: Shared,
    handle: tokio::task::JoinHandle<()>,
}

impl MockGateway {
    pub async fn spawn() -> Self {
        let state: Shared = Arc::new(Mutex::new(Inner::default()));

        let app = Router::new()
            .route("/session/start", post(start_session))
            .route("/session/state", get(session_state))
            .route("/session/events", get(session_events))
            .route("/chats", get(list_chats))
            .route("/messages", post(send_message))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        }
    }

    /// Never emit the `ready` event.
    pub fn suppress_ready_signal(&self) {
        self.state.lock().unwrap().emit_ready = false;
    }

    /// Leave pairing pending until [`MockGateway::complete_pairing`].
    pub fn require_manual_pairing(&self) {
        self.state.lock().unwrap().auto_pair = false;
    }

    pub fn reject_credentials(&self) {
        self.state.lock().unwrap().accept_credentials = false;
    }

    pub fn complete_pairing(&self, identity: &str, secret: &str) {
        let mut inner = self.state.lock().unwrap();
        inner.push(json!({ "type": "paired", "identity": identity, "secret": secret }));
        if inner.emit_ready {
            inner.push(json!({ "type": "ready" }));
        }
    }

    /// Append a raw event, e.g. `{"type": "disconnected", "reason": "..."}`.
    pub fn push_event(&self, event: Value) {
        self.state.lock().unwrap().push(event);
    }

    /// Answer `410 Gone` on the event stream from now on.
    pub fn close_session(&self) {
        self.state.lock().unwrap().closed = true;
    }

    pub fn set_remote_state(&self, state: &str) {
        self.state.lock().unwrap().remote_state = state.to_string();
    }

    pub fn fail_chat_listing(&self) {
        self.state.lock().unwrap().chats_fail = true;
    }

    /// Answer sends with `409` as if the session could not send.
    pub fn refuse_sends(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_sends = refuse;
    }

    /// Answer the next `n` sends with `500`.
    pub fn fail_next_sends(&self, n: u32) {
        self.state.lock().unwrap().fail_sends = n;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn start_calls(&self) -> u32 {
        self.state.lock().unwrap().start_calls
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Deserialize)]
struct StartBody {
    credential: Option<Value>,
}

async fn start_session(State(state): State<Shared>, Json(body): Json<StartBody>) -> Response {
    let mut inner = state.lock().unwrap();
    inner.start_calls += 1;

    if body.credential.is_some() && inner.accept_credentials {
        if inner.emit_ready {
            inner.push(json!({ "type": "ready" }));
        }
        return Json(json!({ "status": "resumed" })).into_response();
    }

    if inner.auto_pair {
        inner.push(json!({ "type": "paired", "identity": "5215500000000", "secret": "gw-secret" }));
        if inner.emit_ready {
            inner.push(json!({ "type": "ready" }));
        }
    }
    Json(json!({ "status": "pairing", "code": "GW-0001", "expires_at": EXPIRES_AT })).into_response()
}

async fn session_state(State(state): State<Shared>) -> Response {
    let inner = state.lock().unwrap();
    Json(json!({ "state": inner.remote_state })).into_response()
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    after: u64,
}

async fn session_events(State(state): State<Shared>, Query(q): Query<EventsQuery>) -> Response {
    let inner = state.lock().unwrap();
    if inner.closed {
        return StatusCode::GONE.into_response();
    }
    let events: Vec<Value> = inner
        .events
        .iter()
        .filter(|e| e["seq"].as_u64().is_some_and(|seq| seq > q.after))
        .cloned()
        .collect();
    Json(Value::Array(events)).into_response()
}

#[derive(Debug, Deserialize)]
struct ChatsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_chats(State(state): State<Shared>, Query(q): Query<ChatsQuery>) -> Response {
    let inner = state.lock().unwrap();
    if inner.chats_fail {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "chats unavailable" })))
            .into_response();
    }
    let chats: Vec<Value> = (0..q.limit.unwrap_or(1).min(1))
        .map(|i| json!({ "id": format!("chat-{i}") }))
        .collect();
    Json(Value::Array(chats)).into_response()
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    file_name: String,
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    to: String,
    text: String,
    attachment: Option<AttachmentBody>,
}

async fn send_message(State(state): State<Shared>, Json(body): Json<MessageBody>) -> Response {
    let mut inner = state.lock().unwrap();
    if inner.refuse_sends {
        return (StatusCode::CONFLICT, "session not ready").into_response();
    }
    if inner.fail_sends > 0 {
        inner.fail_sends -= 1;
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "send failed" })))
            .into_response();
    }

    let attachment = match body.attachment {
        Some(a) => match BASE64.decode(a.data.as_bytes()) {
            Ok(bytes) => Some(SentAttachment {
                file_name: a.file_name,
                mime_type: a.mime_type,
                bytes,
            }),
            Err(_) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad base64" })))
                    .into_response();
            }
        },
        None => None,
    };

    inner.sent.push(SentMessage {
        to: body.to,
        text: body.text,
        attachment,
    });
    let id = format!("msg-{}", inner.sent.len());
    Json(json!({ "id": id, "timestamp": SENT_AT })).into_response()
}
