//! Session synchronizer: keeps the session cell in line with backend auth.
//!
//! ARCHITECTURE
//! ============
//! Two writers touch the [`SessionStore`]: `bootstrap()` on startup and the
//! auth-change listener spawned by `start()`. Explicit operations (sign-in,
//! sign-out, forced sign-out, manual profile retry) write too. All writes
//! replace the whole state, so the last one wins; every path converges on
//! what the backend reports.
//!
//! TIMEOUTS
//! ========
//! The bootstrap session fetch is bounded by `Timing::session_timeout`; when
//! it fires, `loading` is forced off with whatever is known. Each profile
//! attempt is bounded by `Timing::profile_timeout`, and retries are bounded
//! by `Timing::profile_max_retries`, so `loading` always settles.
//!
//! A user whose profile row is missing stays signed in with
//! `profile = None`. No fallback profile is synthesized for them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::backend::{AuthBackend, HttpBackend};
use crate::config::{BackendConfig, Mode, Timing};
use crate::demo;
use crate::error::SessionError;
use crate::storage::{FileStorage, MemoryStorage, SessionStorage};
use crate::store::{SessionState, SessionStore};
use crate::types::{AuthChange, AuthOutcome, Identity, ProfileRecord, SignUpData};

pub const MIN_PASSWORD_LEN: usize = 3;

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle to the auth-change listener task. Dropping it stops the listener.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// SYNCHRONIZER
// =============================================================================

enum Driver {
    Demo,
    Live(Arc<dyn AuthBackend>),
}

pub struct SessionSynchronizer {
    driver: Driver,
    store: SessionStore,
    timing: Timing,
    listener: Mutex<Option<Subscription>>,
}

impl SessionSynchronizer {
    /// Synchronizer backed by the static demo accounts.
    #[must_use]
    pub fn demo(timing: Timing) -> Self {
        Self::with_driver(Driver::Demo, timing)
    }

    #[must_use]
    pub fn live(backend: Arc<dyn AuthBackend>, timing: Timing) -> Self {
        Self::with_driver(Driver::Live(backend), timing)
    }

    /// Build from typed config: demo mode, or an HTTP backend with memory or
    /// file session storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: &BackendConfig) -> Result<Self, SessionError> {
        match &config.mode {
            Mode::Demo => {
                tracing::warn!("no backend configured; running in demo mode");
                Ok(Self::demo(config.timing))
            }
            Mode::Live(credentials) => {
                let storage: Arc<dyn SessionStorage> = match &config.session_file {
                    Some(path) => Arc::new(FileStorage::new(path)),
                    None => Arc::new(MemoryStorage::new()),
                };
                let backend = HttpBackend::new(credentials.clone(), storage)?;
                Ok(Self::live(Arc::new(backend), config.timing))
            }
        }
    }

    fn with_driver(driver: Driver, timing: Timing) -> Self {
        Self { driver, store: SessionStore::new(), timing, listener: Mutex::new(None) }
    }

    #[must_use]
    pub fn is_demo(&self) -> bool {
        matches!(self.driver, Driver::Demo)
    }

    /// The session cell, for injection into the presentation layer.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.store.snapshot()
    }

    /// Subscribe to backend auth changes, then bootstrap.
    ///
    /// The listener is registered first so a sign-in that lands while the
    /// bootstrap fetch is in flight is not missed.
    pub async fn start(&self) {
        if let Driver::Live(backend) = &self.driver {
            let subscription = spawn_listener(
                backend.clone(),
                backend.subscribe(),
                self.store.clone(),
                self.timing,
            );
            if let Ok(mut slot) = self.listener.lock() {
                *slot = Some(subscription);
            }
        }
        self.bootstrap().await;
    }

    /// Stop the auth-change listener, if running.
    pub fn shutdown(&self) {
        let subscription = self.listener.lock().ok().and_then(|mut slot| slot.take());
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            tracing::debug!("auth listener stopped");
        }
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .map(|slot| slot.as_ref().is_some_and(Subscription::is_active))
            .unwrap_or(false)
    }

    /// Resolve the initial state from the backend's current session.
    pub async fn bootstrap(&self) {
        let backend = match &self.driver {
            Driver::Demo => {
                self.store.set_logged_out();
                return;
            }
            Driver::Live(backend) => backend.clone(),
        };

        let generation = self.store.generation();
        self.store.mark_loading();
        match tokio::time::timeout(self.timing.session_timeout, backend.get_session()).await {
            Ok(Ok(Some(session))) => {
                tracing::info!(user_id = %session.user.id, "existing session found");
                load_profile(backend.as_ref(), &self.store, &self.timing, session.user, generation).await;
            }
            Ok(Ok(None)) => {
                tracing::info!("no existing session");
                self.store.set_logged_out();
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "session fetch failed");
                self.store.settle();
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timing.session_timeout.as_secs(),
                    "session fetch timed out; settling with current state"
                );
                self.store.settle();
            }
        }
    }

    /// Apply a pushed auth change.
    pub async fn handle_auth_change(&self, change: AuthChange) {
        match &self.driver {
            Driver::Demo => match change.session {
                Some(session) => self.resolve_profile(session.user).await,
                None => self.store.set_logged_out(),
            },
            Driver::Live(backend) => apply_auth_change(backend.as_ref(), &self.store, &self.timing, change).await,
        }
    }

    /// Look up the profile for `user` and publish the result.
    pub async fn resolve_profile(&self, user: Identity) {
        match &self.driver {
            Driver::Demo => {
                let now = OffsetDateTime::now_utc();
                let profile = demo::DEMO_ACCOUNTS
                    .iter()
                    .find(|account| account.id == user.id)
                    .map(|account| account.profile(now));
                self.store.set_authenticated(user, profile);
            }
            Driver::Live(backend) => {
                let generation = self.store.generation();
                load_profile(backend.as_ref(), &self.store, &self.timing, user, generation).await;
            }
        }
    }

    /// Sign in with email and password.
    ///
    /// In demo mode the state is set directly. Otherwise the backend's
    /// sign-in notification drives the state change.
    ///
    /// # Errors
    ///
    /// `Validation` for malformed input (no request sent), `InvalidCredentials`
    /// for a rejected pair, or any backend error.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthOutcome, SessionError> {
        validate_credentials(email, password)?;

        match &self.driver {
            Driver::Demo => {
                let account = demo::authenticate(email, password)?;
                let now = OffsetDateTime::now_utc();
                let user = account.identity(now);
                self.store.set_authenticated(user.clone(), Some(account.profile(now)));
                tracing::info!(user_id = account.id, role = %account.role, "demo sign-in");
                Ok(AuthOutcome { user, session: None })
            }
            Driver::Live(backend) => {
                let session = backend.sign_in_with_password(email.trim(), password).await?;
                tracing::info!(user_id = %session.user.id, "signed in");
                Ok(AuthOutcome { user: session.user.clone(), session: Some(session) })
            }
        }
    }

    /// # Errors
    ///
    /// Returns the backend error; the session state is left untouched.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        if let Driver::Live(backend) = &self.driver {
            backend.sign_out().await?;
        }
        self.store.set_logged_out();
        tracing::info!("signed out");
        Ok(())
    }

    /// Register a new account. Role, department, and phone travel as
    /// registration metadata; the profile row is provisioned by an admin.
    ///
    /// # Errors
    ///
    /// `NotAvailable` in demo mode, `Validation` for malformed input, or any
    /// backend error.
    pub async fn sign_up(&self, email: &str, password: &str, data: &SignUpData) -> Result<AuthOutcome, SessionError> {
        let Driver::Live(backend) = &self.driver else {
            return Err(SessionError::NotAvailable("sign-up is disabled in demo mode".into()));
        };
        validate_credentials(email, password)?;
        let outcome = backend.sign_up(email.trim(), password, data).await?;
        tracing::info!(user_id = %outcome.user.id, role = %data.role, "signed up");
        Ok(outcome)
    }

    /// Recover from a wedged session: best-effort backend sign-out, wipe
    /// local state, and force the logged-out state no matter what failed.
    pub async fn force_sign_out(&self) {
        if let Driver::Live(backend) = &self.driver {
            match tokio::time::timeout(self.timing.session_timeout, backend.sign_out()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "backend sign-out failed during forced sign-out"),
                Err(_) => tracing::warn!("backend sign-out timed out during forced sign-out"),
            }
            if let Err(e) = backend.clear_local_state().await {
                tracing::warn!(error = %e, "clearing local session state failed");
            }
        }
        self.store.set_logged_out();
        tracing::info!("forced sign-out");
    }

    /// Re-run profile resolution for a signed-in user whose profile is missing.
    ///
    /// # Errors
    ///
    /// `NotAvailable` unless the state is `{user, no profile, not loading}`.
    pub async fn retry_profile_load(&self) -> Result<(), SessionError> {
        let state = self.store.snapshot();
        let user = match state {
            SessionState { user: Some(user), profile: None, loading: false } => user,
            _ => return Err(SessionError::NotAvailable("no signed-in user is awaiting a profile".into())),
        };
        tracing::info!(user_id = %user.id, "retrying profile load");
        self.store.mark_loading();
        self.resolve_profile(user).await;
        Ok(())
    }
}

impl Drop for SessionSynchronizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Reject malformed credentials before any request is made.
///
/// # Errors
///
/// [`SessionError::Validation`] naming the problem.
pub fn validate_credentials(email: &str, password: &str) -> Result<(), SessionError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(SessionError::Validation("email and password are required".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SessionError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Delay before retry `attempt` (0-based).
#[must_use]
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.saturating_add(1))
}

async fn apply_auth_change(backend: &dyn AuthBackend, store: &SessionStore, timing: &Timing, change: AuthChange) {
    tracing::debug!(event = ?change.event, "auth change");
    match change.session {
        Some(session) => {
            let generation = store.generation();
            store.mark_loading();
            load_profile(backend, store, timing, session.user, generation).await;
        }
        None => store.set_logged_out(),
    }
}

/// Bounded retry loop around the profile point query. The result is dropped
/// if a sign-out happened after `generation` was read.
async fn load_profile(backend: &dyn AuthBackend, store: &SessionStore, timing: &Timing, user: Identity, generation: u64) {
    let mut attempt: u32 = 0;
    loop {
        let result = match tokio::time::timeout(timing.profile_timeout, backend.fetch_profile(&user.id)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout("profile fetch")),
        };

        match result {
            Ok(profile) => {
                tracing::info!(user_id = %user.id, role = %profile.role, attempt, "profile loaded");
                commit_profile(store, generation, user, Some(profile));
                return;
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(user_id = %user.id, "no profile provisioned for user");
                commit_profile(store, generation, user, None);
                return;
            }
            Err(e) if e.is_transient() && attempt < timing.profile_max_retries => {
                let delay = retry_delay(timing.retry_base_delay, attempt);
                tracing::warn!(
                    user_id = %user.id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "profile fetch failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(user_id = %user.id, attempt, error = %e, "profile fetch failed; giving up");
                commit_profile(store, generation, user, None);
                return;
            }
        }
    }
}

fn commit_profile(store: &SessionStore, generation: u64, user: Identity, profile: Option<ProfileRecord>) {
    let user_id = user.id.clone();
    if !store.set_authenticated_if(generation, user, profile) {
        tracing::info!(user_id = %user_id, "signed out during profile resolution; result discarded");
    }
}

fn spawn_listener(
    backend: Arc<dyn AuthBackend>,
    mut rx: broadcast::Receiver<AuthChange>,
    store: SessionStore,
    timing: Timing,
) -> Subscription {
    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => apply_auth_change(backend.as_ref(), &store, &timing, change).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auth listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    Subscription { task }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
