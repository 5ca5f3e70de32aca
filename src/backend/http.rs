//! HTTP client for the hosted auth (GoTrue) and data (PostgREST) APIs.
//!
//! Thin wrapper over `reqwest`. Response decoding lives in pure `parse_*`
//! functions so it can be tested without a network.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;

use super::{AUTH_EVENT_CAPACITY, AuthBackend};
use crate::config::BackendCredentials;
use crate::error::SessionError;
use crate::storage::SessionStorage;
use crate::types::{AuthChange, AuthEvent, AuthOutcome, Identity, ProfileRecord, Session, SignUpData};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;
const PGRST_SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// PostgREST: a single-object request matched zero rows.
pub const CODE_NO_ROWS: &str = "PGRST116";
/// PostgREST: JWT rejected.
pub const CODE_JWT_INVALID: &str = "PGRST301";
/// Postgres `insufficient_privilege` (row-level security).
pub const CODE_INSUFFICIENT_PRIVILEGE: &str = "42501";

// =============================================================================
// CLIENT
// =============================================================================

pub struct HttpBackend {
    http: reqwest::Client,
    credentials: BackendCredentials,
    storage: Arc<dyn SessionStorage>,
    events: broadcast::Sender<AuthChange>,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(credentials: BackendCredentials, storage: Arc<dyn SessionStorage>) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| SessionError::HttpClientBuild(e.to_string()))?;
        let (events, _rx) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Ok(Self { http, credentials, storage, events })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.credentials.url)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.credentials.url)
    }

    fn emit(&self, event: AuthEvent, session: Option<Session>) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(AuthChange::new(event, session));
    }

    async fn post_auth(&self, path: &str, body: &serde_json::Value) -> Result<(u16, String), SessionError> {
        let response = self
            .http
            .post(self.auth_url(path))
            .header("apikey", &self.credentials.anon_key)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, SessionError> {
        let (status, text) = self
            .post_auth(
                "token?grant_type=refresh_token",
                &serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;
        if !is_success(status) {
            return Err(parse_auth_error(status, &text));
        }
        parse_session(&text, now_unix())
    }
}

#[async_trait::async_trait]
impl AuthBackend for HttpBackend {
    async fn get_session(&self) -> Result<Option<Session>, SessionError> {
        let Some(stored) = self.storage.load().await? else {
            return Ok(None);
        };
        if !stored.is_expired(OffsetDateTime::now_utc()) {
            return Ok(Some(stored));
        }

        match self.refresh(&stored.refresh_token).await {
            Ok(session) => {
                self.storage.save(&session).await?;
                // No TokenRefreshed push: the caller resolves the profile for
                // the session it gets back.
                tracing::debug!(user_id = %session.user.id, "session refreshed");
                Ok(Some(session))
            }
            Err(e) if keeps_stored_session(&e) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "stored session could not be refreshed; discarding");
                self.storage.clear().await?;
                Ok(None)
            }
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        let (status, text) = self
            .post_auth(
                "token?grant_type=password",
                &serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        if !is_success(status) {
            return Err(parse_auth_error(status, &text));
        }
        let session = parse_session(&text, now_unix())?;
        self.storage.save(&session).await?;
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        if let Some(session) = self.storage.load().await? {
            let response = self
                .http
                .post(self.auth_url("logout"))
                .header("apikey", &self.credentials.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await?;
            let status = response.status().as_u16();
            if !sign_out_accepted(status) {
                let text = response.text().await.unwrap_or_default();
                return Err(parse_auth_error(status, &text));
            }
        }
        self.storage.clear().await?;
        self.emit(AuthEvent::SignedOut, None);
        Ok(())
    }

    async fn sign_up(&self, email: &str, password: &str, data: &SignUpData) -> Result<AuthOutcome, SessionError> {
        let (status, text) = self
            .post_auth(
                "signup",
                &serde_json::json!({ "email": email, "password": password, "data": data }),
            )
            .await?;
        if !is_success(status) {
            return Err(parse_auth_error(status, &text));
        }
        let outcome = parse_sign_up(&text, now_unix())?;
        if let Some(session) = &outcome.session {
            self.storage.save(session).await?;
            self.emit(AuthEvent::SignedIn, Some(session.clone()));
        }
        Ok(outcome)
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<ProfileRecord, SessionError> {
        let bearer = match self.storage.load().await? {
            Some(session) => session.access_token,
            None => self.credentials.anon_key.clone(),
        };
        let response = self
            .http
            .get(self.rest_url("profiles"))
            .query(&[("id", format!("eq.{user_id}")), ("select", "*".to_string())])
            .header("apikey", &self.credentials.anon_key)
            .header("Accept", PGRST_SINGLE_OBJECT)
            .bearer_auth(bearer)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        parse_profile_response(status, &text)
    }

    async fn clear_local_state(&self) -> Result<(), SessionError> {
        self.storage.clear().await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: Identity,
}

/// GoTrue error bodies come in two generations: `{error, error_description}`
/// and `{code, error_code, msg}`.
#[derive(Deserialize, Default)]
struct AuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Default)]
struct PostgrestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// =============================================================================
// PARSING
// =============================================================================

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// A refresh that never reached the backend says nothing about the token.
pub(crate) fn keeps_stored_session(e: &SessionError) -> bool {
    matches!(e, SessionError::Timeout(_) | SessionError::Network(_))
}

/// 401/403/404 on logout: the server-side session is already gone.
pub(crate) fn sign_out_accepted(status: u16) -> bool {
    is_success(status) || matches!(status, 401 | 403 | 404)
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn session_from_token(token: TokenResponse, now_unix: i64) -> Session {
    let expires_at = token
        .expires_at
        .unwrap_or_else(|| now_unix + token.expires_in.unwrap_or(0));
    Session { access_token: token.access_token, refresh_token: token.refresh_token, expires_at, user: token.user }
}

pub(crate) fn parse_session(json: &str, now_unix: i64) -> Result<Session, SessionError> {
    let token: TokenResponse = serde_json::from_str(json).map_err(|e| SessionError::Parse(e.to_string()))?;
    Ok(session_from_token(token, now_unix))
}

/// Sign-up returns a full token response when email confirmation is off,
/// and the bare user object when it is on.
pub(crate) fn parse_sign_up(json: &str, now_unix: i64) -> Result<AuthOutcome, SessionError> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| SessionError::Parse(e.to_string()))?;
    if value.get("access_token").is_some() {
        let token: TokenResponse = serde_json::from_value(value).map_err(|e| SessionError::Parse(e.to_string()))?;
        let session = session_from_token(token, now_unix);
        return Ok(AuthOutcome { user: session.user.clone(), session: Some(session) });
    }
    let user: Identity = serde_json::from_value(value).map_err(|e| SessionError::Parse(e.to_string()))?;
    Ok(AuthOutcome { user, session: None })
}

pub(crate) fn parse_auth_error(status: u16, body: &str) -> SessionError {
    let parsed: AuthErrorBody = serde_json::from_str(body).unwrap_or_default();
    let invalid_credentials = parsed.error.as_deref() == Some("invalid_grant")
        || parsed.error_code.as_deref() == Some("invalid_credentials");
    if status == 400 && invalid_credentials {
        return SessionError::InvalidCredentials;
    }
    let message = parsed
        .error_description
        .or(parsed.msg)
        .or(parsed.message)
        .or(parsed.error)
        .unwrap_or_else(|| body.to_string());
    SessionError::Api { status, message }
}

pub(crate) fn parse_profile_response(status: u16, body: &str) -> Result<ProfileRecord, SessionError> {
    if is_success(status) {
        return serde_json::from_str(body).map_err(|e| SessionError::Parse(e.to_string()));
    }

    let parsed: PostgrestErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.code.unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| body.to_string());

    if code == CODE_NO_ROWS {
        return Err(SessionError::NotFound { code });
    }
    if code == CODE_INSUFFICIENT_PRIVILEGE || code == CODE_JWT_INVALID || matches!(status, 401 | 403) {
        return Err(SessionError::PolicyDenied { code, message });
    }
    Err(SessionError::Api { status, message })
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
