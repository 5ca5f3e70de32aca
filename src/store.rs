//! Session-state cell for the current client.
//!
//! DESIGN
//! ======
//! `SessionStore` is the single source of truth for "who is logged in". It
//! wraps a `tokio::sync::watch` channel: writers replace the whole state,
//! observers hold a receiver and see the latest value. Concurrent writers
//! (bootstrap, the auth-change listener, explicit operations) are resolved
//! last-write-wins. The store is cloned into whatever presentation layer
//! needs it rather than living in a global.
//!
//! Every sign-out starts a new generation. Profile resolution captures the
//! generation before its first await and commits only if it is unchanged,
//! so a slow lookup can never resurrect a user who has since signed out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::watch;

use crate::types::{Identity, ProfileRecord};

/// `{user, profile, loading}` as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub user: Option<Identity>,
    pub profile: Option<ProfileRecord>,
    pub loading: bool,
}

impl SessionState {
    /// Initial state: nothing known yet, resolution pending.
    #[must_use]
    pub fn unknown() -> Self {
        Self { user: None, profile: None, loading: true }
    }

    #[must_use]
    pub fn logged_out() -> Self {
        Self { user: None, profile: None, loading: false }
    }

    #[must_use]
    pub fn authenticated(user: Identity, profile: Option<ProfileRecord>) -> Self {
        Self { user: Some(user), profile, loading: false }
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        match (self.loading, &self.user, &self.profile) {
            (true, _, _) => SessionStatus::Unknown,
            (false, None, _) => SessionStatus::LoggedOut,
            (false, Some(_), Some(_)) => SessionStatus::Authenticated,
            (false, Some(_), None) => SessionStatus::AuthenticatedNoProfile,
        }
    }

    /// Signed in with a provisioned profile. A user without a profile is
    /// authenticated but must not see protected content.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.user.is_some() && self.profile.is_some()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Lifecycle position derived from [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unknown,
    LoggedOut,
    Authenticated,
    AuthenticatedNoProfile,
}

/// Observer handle. `changed().await` wakes on every write.
pub type SessionObserver = watch::Receiver<SessionState>;

/// Shared, cloneable handle to the session cell.
#[derive(Debug, Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<SessionState>>,
    generation: Arc<AtomicU64>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(SessionState::unknown())
    }

    #[must_use]
    pub fn with_state(state: SessionState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx: Arc::new(tx), generation: Arc::new(AtomicU64::new(0)) }
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> SessionObserver {
        self.tx.subscribe()
    }

    /// Replace the whole state and notify observers.
    pub fn set(&self, state: SessionState) {
        self.tx.send_replace(state);
    }

    /// Current sign-out generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Publish the logged-out state and invalidate in-flight resolutions.
    pub fn set_logged_out(&self) {
        self.tx.send_modify(|state| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *state = SessionState::logged_out();
        });
    }

    pub fn set_authenticated(&self, user: Identity, profile: Option<ProfileRecord>) {
        self.set(SessionState::authenticated(user, profile));
    }

    /// Publish a resolved user only if no sign-out happened since
    /// `generation` was read. Returns whether the state was written.
    pub fn set_authenticated_if(&self, generation: u64, user: Identity, profile: Option<ProfileRecord>) -> bool {
        self.tx.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *state = SessionState::authenticated(user, profile);
            true
        })
    }

    /// Enter the transient `Unknown` state, keeping what is already known.
    pub fn mark_loading(&self) {
        self.tx.send_modify(|state| state.loading = true);
    }

    /// Force `loading=false`, keeping whatever user/profile are present.
    pub fn settle(&self) {
        self.tx.send_if_modified(|state| {
            let was_loading = state.loading;
            state.loading = false;
            was_loading
        });
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
