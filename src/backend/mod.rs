//! Backend: the managed identity and data API this client consumes.
//!
//! ARCHITECTURE
//! ============
//! `AuthBackend` is the seam between the session synchronizer and the
//! network. `HttpBackend` speaks the GoTrue/PostgREST dialect of the hosted
//! backend; tests substitute a scripted mock.

pub mod http;

use tokio::sync::broadcast;

use crate::error::SessionError;
use crate::types::{AuthChange, AuthOutcome, ProfileRecord, Session, SignUpData};

pub use http::HttpBackend;

/// Capacity of the auth-change broadcast channel.
pub const AUTH_EVENT_CAPACITY: usize = 16;

/// Auth API, profile point query, and auth-change push subscription.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    /// Current session, refreshed if it has expired. `None` when signed out.
    async fn get_session(&self) -> Result<Option<Session>, SessionError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, SessionError>;

    async fn sign_out(&self) -> Result<(), SessionError>;

    async fn sign_up(&self, email: &str, password: &str, data: &SignUpData) -> Result<AuthOutcome, SessionError>;

    /// Fetch exactly one `profiles` row by identity id.
    async fn fetch_profile(&self, user_id: &str) -> Result<ProfileRecord, SessionError>;

    /// Drop every piece of locally persisted client state.
    async fn clear_local_state(&self) -> Result<(), SessionError>;

    /// Receive sign-in, sign-out, and token-refresh notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}
