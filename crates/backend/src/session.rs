//! Session-managed HTTP access to the backend-of-record.
//!
//! A [`BackendClient`] owns exactly one [`Session`]. When the backend answers
//! 401 the stale token is dropped, the client logs in again and the request
//! is replayed once; a second 401 in a row is reported as
//! [`BackendError::Session`] instead of looping.
//!
//! Concurrent workflows must each build their own client; sessions are never
//! shared between instances.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::BackendError;

const LOGIN_PATH: &str = "/auth/login";

/// Login credentials. The password never appears in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection settings for a [`BackendClient`].
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An authenticated backend session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    established_at: DateTime<Utc>,
}

impl Session {
    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    fn bearer(&self) -> &str {
        &self.token
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("established_at", &self.established_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// A request against the backend, relative to the base URL.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    prefer: Option<&'static str>,
}

impl BackendRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            prefer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Ask the backend to return affected rows (`Prefer: return=representation`).
    pub fn return_representation(mut self) -> Self {
        self.prefer = Some("return=representation");
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A successful (2xx) backend response.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub body: String,
}

impl BackendResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BackendError> {
        serde_json::from_str(&self.body).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

/// HTTP client bound to a single backend session.
#[derive(Debug)]
pub struct BackendClient {
    config: BackendConfig,
    http: reqwest::Client,
    session: Mutex<Option<Session>>,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            http,
            session: Mutex::new(None),
        })
    }

    /// Build a client and log in immediately, so bad credentials surface at
    /// startup instead of on the first tick.
    pub async fn connect(config: BackendConfig) -> Result<Self, BackendError> {
        let client = Self::new(config)?;
        let session = client.authenticate().await?;
        *client.session.lock().await = Some(session);
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Log in with the configured credentials.
    ///
    /// Any failure here is an [`BackendError::Auth`]: either the credentials
    /// are wrong or the host cannot be reached at all.
    pub async fn authenticate(&self) -> Result<Session, BackendError> {
        let url = format!("{}{}", self.config.base_url, LOGIN_PATH);
        let creds = &self.config.credentials;

        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "username": creds.username,
                "password": creds.password,
            }))
            .send()
            .await
            .map_err(|e| BackendError::Auth(format!("backend unreachable: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Auth(format!(
                "credentials rejected for user `{}`",
                creds.username
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Auth(format!("login failed with {status}: {body}")));
        }

        let login: LoginResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Auth(format!("malformed login response: {e}")))?;
        if login.token.is_empty() {
            return Err(BackendError::Auth("login response carried an empty token".to_string()));
        }

        info!(user = %creds.username, "backend session established");
        Ok(Session {
            token: login.token,
            established_at: Utc::now(),
        })
    }

    /// Issue a request, reauthenticating once if the session has expired.
    pub async fn request(&self, req: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let session = self.current_session().await?;
        let (status, body) = self.send_once(req, &session).await?;
        if status != StatusCode::UNAUTHORIZED {
            return into_response(status, body);
        }

        warn!(path = %req.path, "backend session expired; reauthenticating");
        let session = self.reauthenticate(&session).await?;
        let (status, body) = self.send_once(req, &session).await?;
        if status == StatusCode::UNAUTHORIZED {
            self.discard(&session).await;
            warn!(path = %req.path, "request rejected again after reauthentication");
            return Err(BackendError::Session);
        }

        into_response(status, body)
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, req: &BackendRequest) -> Result<T, BackendError> {
        self.request(req).await?.json()
    }

    /// PATCH `body` and decode the returned representation.
    pub async fn patch_json<T: DeserializeOwned>(
        &self,
        req: BackendRequest,
        body: serde_json::Value,
    ) -> Result<T, BackendError> {
        let req = req.json(body).return_representation();
        self.request(&req).await?.json()
    }

    async fn current_session(&self) -> Result<Session, BackendError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Replace `stale` with a fresh session.
    ///
    /// If another call already replaced it, the newer session is reused
    /// instead of logging in twice. The stale token is never handed out again.
    async fn reauthenticate(&self, stale: &Session) -> Result<Session, BackendError> {
        let mut guard = self.session.lock().await;
        if let Some(current) = guard.as_ref() {
            if current != stale {
                return Ok(current.clone());
            }
        }
        *guard = None;
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn discard(&self, session: &Session) {
        let mut guard = self.session.lock().await;
        if guard.as_ref() == Some(session) {
            *guard = None;
        }
    }

    async fn send_once(
        &self,
        req: &BackendRequest,
        session: &Session,
    ) -> Result<(StatusCode, String), BackendError> {
        let url = format!("{}{}", self.config.base_url, req.path);
        let mut builder = self
            .http
            .request(req.method.clone(), &url)
            .bearer_auth(session.bearer());

        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(prefer) = req.prefer {
            builder = builder.header("Prefer", prefer);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(method = %req.method, path = %req.path, status = status.as_u16(), "backend call");
        Ok((status, body))
    }
}

fn into_response(status: StatusCode, body: String) -> Result<BackendResponse, BackendError> {
    if status.is_success() {
        Ok(BackendResponse {
            status: status.as_u16(),
            body,
        })
    } else {
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
