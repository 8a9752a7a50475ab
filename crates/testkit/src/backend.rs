//! In-memory backend-of-record speaking the PostgREST-style subset the
//! pipeline uses: login, filtered document listing, customer lookup and
//! conditional PATCH.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};

const UNSET_FILTER: &str = r#"(delivery_status.is.null,delivery_status.in.(unset,N,n,""))"#;

/// Flag values that still count as undelivered.
const UNSET_FLAGS: [&str; 4] = ["unset", "N", "n", ""];

/// One request as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLogEntry {
    pub method: String,
    pub path: String,
    pub token: Option<String>,
    pub status: u16,
}

#[derive(Debug, Default)]
struct Inner {
    username: String,
    password: String,
    valid_tokens: HashSet<String>,
    issued_tokens: u32,
    login_calls: u32,
    reject_next: u32,
    reject_logins: bool,
    patch_calls: u32,
    failing_patches: HashSet<i64>,
    stall: Option<std::time::Duration>,
    documents: BTreeMap<i64, Value>,
    customers: BTreeMap<i64, Value>,
    log: Vec<RequestLogEntry>,
}

type Shared = Arc<Mutex<Inner>>;

/// A running mock backend. The server stops when this is dropped.
pub struct MockBackend {
    pub base_url: String,
    state: Shared,
    handle: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn spawn(username: &str, password: &str) -> Self {
        let state: Shared = Arc::new(Mutex::new(Inner {
            username: username.to_string(),
            password: password.to_string(),
            ..Inner::default()
        }));

        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/documents", get(list_documents).patch(patch_documents))
            .route("/customers", get(list_customers))
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

    pub fn insert_document(&self, doc: Value) {
        let id = doc["id"].as_i64().expect("document needs an integer id");
        self.state.lock().unwrap().documents.insert(id, doc);
    }

    pub fn insert_customer(&self, customer: Value) {
        let id = customer["id"].as_i64().expect("customer needs an integer id");
        self.state.lock().unwrap().customers.insert(id, customer);
    }

    pub fn document(&self, id: i64) -> Option<Value> {
        self.state.lock().unwrap().documents.get(&id).cloned()
    }

    pub fn login_calls(&self) -> u32 {
        self.state.lock().unwrap().login_calls
    }

    pub fn patch_calls(&self) -> u32 {
        self.state.lock().unwrap().patch_calls
    }

    pub fn request_log(&self) -> Vec<RequestLogEntry> {
        self.state.lock().unwrap().log.clone()
    }

    /// Invalidate every issued token, as if sessions timed out server-side.
    pub fn expire_sessions(&self) {
        self.state.lock().unwrap().valid_tokens.clear();
    }

    /// Answer the next `n` authenticated requests with 401 regardless of token.
    pub fn reject_next_requests(&self, n: u32) {
        self.state.lock().unwrap().reject_next = n;
    }

    /// Make every login attempt fail with 401.
    pub fn reject_logins(&self) {
        self.state.lock().unwrap().reject_logins = true;
    }

    /// Delay document listings, to provoke client timeouts.
    pub fn stall_listings(&self, delay: std::time::Duration) {
        self.state.lock().unwrap().stall = Some(delay);
    }

    /// Answer PATCHes for this document with 500.
    pub fn fail_patches_for(&self, id: i64) {
        self.state.lock().unwrap().failing_patches.insert(id);
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A document row with sensible defaults and no delivery state.
pub fn document_json(id: i64, number: &str, customer_id: i64, issue_date: &str) -> Value {
    json!({
        "id": id,
        "number": number,
        "category": "FAC",
        "customer_id": customer_id,
        "total": 1160.0,
        "currency": "MXN",
        "issue_date": issue_date,
        "delivery_status": null,
        "delivery_date": null,
        "delivery_destination": null,
        "delivery_note": null,
    })
}

/// A customer row; `mobile: None` leaves the authoritative field null.
pub fn customer_json(id: i64, name: &str, mobile: Option<&str>) -> Value {
    json!({
        "id": id,
        "name": name,
        "email": format!("customer{id}@example.com"),
        "phone": "5500000000",
        "phone2": null,
        "mobile": mobile,
    })
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

async fn login(State(state): State<Shared>, Json(body): Json<LoginBody>) -> Response {
    let mut inner = state.lock().unwrap();
    inner.login_calls += 1;

    let ok = !inner.reject_logins && body.username == inner.username && body.password == inner.password;
    let status = if ok { StatusCode::OK } else { StatusCode::UNAUTHORIZED };
    inner.log.push(RequestLogEntry {
        method: "POST".to_string(),
        path: "/auth/login".to_string(),
        token: None,
        status: status.as_u16(),
    });

    if !ok {
        return (status, Json(json!({ "error": "invalid_credentials" }))).into_response();
    }

    inner.issued_tokens += 1;
    let token = format!("tok-{}", inner.issued_tokens);
    inner.valid_tokens.insert(token.clone());
    Json(json!({ "token": token })).into_response()
}

/// Check the bearer token and log the request. Returns the 401 response on
/// rejection.
fn authorize(inner: &mut Inner, headers: &HeaderMap, method: &Method, path: &str) -> Result<(), Response> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let rejected = if inner.reject_next > 0 {
        inner.reject_next -= 1;
        true
    } else {
        !token.as_ref().is_some_and(|t| inner.valid_tokens.contains(t))
    };

    let status = if rejected { 401 } else { 200 };
    inner.log.push(RequestLogEntry {
        method: method.to_string(),
        path: path.to_string(),
        token,
        status,
    });

    if rejected {
        Err((StatusCode::UNAUTHORIZED, Json(json!({ "error": "session_expired" }))).into_response())
    } else {
        Ok(())
    }
}

/// The subset of filters the pipeline sends.
#[derive(Debug, Default)]
struct Filter {
    id_eq: Option<i64>,
    id_gt: Option<i64>,
    unset_only: bool,
    issue_date_gte: Option<String>,
    limit: Option<usize>,
}

impl Filter {
    fn parse(params: &[(String, String)]) -> Result<Self, String> {
        let mut f = Filter::default();
        for (key, value) in params {
            match key.as_str() {
                "id" => {
                    if let Some(v) = value.strip_prefix("eq.") {
                        f.id_eq = Some(v.parse().map_err(|_| format!("bad id filter {value}"))?);
                    } else if let Some(v) = value.strip_prefix("gt.") {
                        f.id_gt = Some(v.parse().map_err(|_| format!("bad id filter {value}"))?);
                    } else {
                        return Err(format!("unsupported id filter {value}"));
                    }
                }
                "or" if value == UNSET_FILTER => f.unset_only = true,
                "or" => return Err(format!("unsupported or filter {value}")),
                "issue_date" => {
                    let v = value
                        .strip_prefix("gte.")
                        .ok_or_else(|| format!("unsupported issue_date filter {value}"))?;
                    f.issue_date_gte = Some(v.to_string());
                }
                "limit" => f.limit = Some(value.parse().map_err(|_| format!("bad limit {value}"))?),
                "select" | "order" => {}
                other => return Err(format!("unsupported parameter {other}")),
            }
        }
        Ok(f)
    }

    fn matches(&self, row: &Value) -> bool {
        let id = row["id"].as_i64().unwrap_or_default();
        if self.id_eq.is_some_and(|want| id != want) {
            return false;
        }
        if self.id_gt.is_some_and(|after| id <= after) {
            return false;
        }
        if self.unset_only {
            let status = &row["delivery_status"];
            let unset = status.is_null() || status.as_str().is_some_and(|s| UNSET_FLAGS.contains(&s));
            if !unset {
                return false;
            }
        }
        if let Some(floor) = &self.issue_date_gte {
            match row["issue_date"].as_str() {
                Some(date) if date >= floor.as_str() => {}
                _ => return false,
            }
        }
        true
    }
}

fn bad_request(msg: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
}

async fn list_documents(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let stall = state.lock().unwrap().stall;
    if let Some(delay) = stall {
        tokio::time::sleep(delay).await;
    }

    let mut inner = state.lock().unwrap();
    if let Err(resp) = authorize(&mut inner, &headers, &Method::GET, "/documents") {
        return resp;
    }
    let filter = match Filter::parse(&params) {
        Ok(f) => f,
        Err(msg) => return bad_request(msg),
    };

    let rows: Vec<Value> = inner
        .documents
        .values()
        .filter(|row| filter.matches(row))
        .take(filter.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect();
    Json(Value::Array(rows)).into_response()
}

async fn patch_documents(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
    Json(body): Json<Value>,
) -> Response {
    let mut inner = state.lock().unwrap();
    if let Err(resp) = authorize(&mut inner, &headers, &Method::PATCH, "/documents") {
        return resp;
    }
    inner.patch_calls += 1;

    let filter = match Filter::parse(&params) {
        Ok(f) => f,
        Err(msg) => return bad_request(msg),
    };
    if filter.id_eq.is_none() {
        return bad_request("PATCH requires an id filter".to_string());
    }
    if filter.id_eq.is_some_and(|id| inner.failing_patches.contains(&id)) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "write failed" })))
            .into_response();
    }

    let Some(fields) = body.as_object() else {
        return bad_request("PATCH body must be an object".to_string());
    };

    let mut updated = Vec::new();
    for row in inner.documents.values_mut() {
        if !filter.matches(row) {
            continue;
        }
        if let Some(obj) = row.as_object_mut() {
            for (k, v) in fields {
                obj.insert(k.clone(), v.clone());
            }
        }
        updated.push(row.clone());
    }
    Json(Value::Array(updated)).into_response()
}

async fn list_customers(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let mut inner = state.lock().unwrap();
    if let Err(resp) = authorize(&mut inner, &headers, &Method::GET, "/customers") {
        return resp;
    }
    let filter = match Filter::parse(&params) {
        Ok(f) => f,
        Err(msg) => return bad_request(msg),
    };

    let rows: Vec<Value> = inner
        .customers
        .values()
        .filter(|row| filter.id_eq.is_none_or(|id| row["id"].as_i64() == Some(id)))
        .take(filter.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect();
    Json(Value::Array(rows)).into_response()
}
