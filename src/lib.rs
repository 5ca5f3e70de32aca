//! Session and identity layer for the hospital management client.
//!
//! ARCHITECTURE
//! ============
//! A [`sync::SessionSynchronizer`] owns the [`store::SessionStore`] and keeps
//! it consistent with the managed backend's auth state. It talks to the
//! backend through [`backend::AuthBackend`]; when no backend is configured
//! it serves the static [`demo`] accounts instead.
//!
//! Persistence, authentication, and row-level security all live in the
//! backend. This crate only reads profiles and mirrors auth state.

pub mod backend;
pub mod config;
pub mod demo;
pub mod error;
pub mod storage;
pub mod store;
pub mod sync;
pub mod types;

pub use config::{BackendConfig, Mode, Timing};
pub use error::SessionError;
pub use store::{SessionObserver, SessionState, SessionStatus, SessionStore};
pub use sync::{SessionSynchronizer, Subscription};
pub use types::{AuthChange, AuthEvent, AuthOutcome, Identity, ProfileRecord, Session, SignUpData, UserRole};
