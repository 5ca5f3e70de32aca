use super::*;
use crate::store::SessionStatus;
use crate::types::{AuthEvent, ProfileRecord, Session, UserRole};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::macros::datetime;
use tokio::time::Instant;

// =========================================================================
// MockBackend
// =========================================================================

enum Reply<T> {
    Ready(Result<T, SessionError>),
    Hang,
}

struct MockBackend {
    session: Mutex<Option<Reply<Option<Session>>>>,
    profiles: Mutex<VecDeque<Reply<ProfileRecord>>>,
    profile_calls: Mutex<Vec<Instant>>,
    sign_in_calls: AtomicUsize,
    sign_out_result: Mutex<Option<Result<(), SessionError>>>,
    cleared: AtomicBool,
    events: broadcast::Sender<AuthChange>,
}

impl MockBackend {
    fn new() -> Self {
        let (events, _rx) = broadcast::channel(16);
        Self {
            session: Mutex::new(None),
            profiles: Mutex::new(VecDeque::new()),
            profile_calls: Mutex::new(Vec::new()),
            sign_in_calls: AtomicUsize::new(0),
            sign_out_result: Mutex::new(None),
            cleared: AtomicBool::new(false),
            events,
        }
    }

    fn with_session(self, reply: Reply<Option<Session>>) -> Self {
        *self.session.lock().unwrap() = Some(reply);
        self
    }

    fn with_profiles(self, replies: Vec<Reply<ProfileRecord>>) -> Self {
        *self.profiles.lock().unwrap() = replies.into();
        self
    }

    fn with_sign_out(self, result: Result<(), SessionError>) -> Self {
        *self.sign_out_result.lock().unwrap() = Some(result);
        self
    }

    fn profile_call_count(&self) -> usize {
        self.profile_calls.lock().unwrap().len()
    }

    fn push(&self, change: AuthChange) {
        self.events.send(change).unwrap();
    }
}

#[async_trait::async_trait]
impl AuthBackend for MockBackend {
    async fn get_session(&self) -> Result<Option<Session>, SessionError> {
        let reply = self.session.lock().unwrap().take();
        match reply {
            Some(Reply::Ready(result)) => result,
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn sign_in_with_password(&self, email: &str, _password: &str) -> Result<Session, SessionError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        Ok(session(&identity_for(email)))
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        self.sign_out_result.lock().unwrap().take().unwrap_or(Ok(()))
    }

    async fn sign_up(&self, email: &str, _password: &str, _data: &SignUpData) -> Result<AuthOutcome, SessionError> {
        Ok(AuthOutcome { user: identity_for(email), session: None })
    }

    async fn fetch_profile(&self, _user_id: &str) -> Result<ProfileRecord, SessionError> {
        self.profile_calls.lock().unwrap().push(Instant::now());
        let reply = self.profiles.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Ready(result)) => result,
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(SessionError::Network("no scripted reply".into())),
        }
    }

    async fn clear_local_state(&self) -> Result<(), SessionError> {
        self.cleared.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

// =========================================================================
// fixtures
// =========================================================================

fn identity_for(email: &str) -> Identity {
    Identity { id: "user-1".into(), email: email.into(), created_at: datetime!(2024-01-15 10:00 UTC) }
}

fn identity() -> Identity {
    identity_for("doctor@hospital.org")
}

fn session(user: &Identity) -> Session {
    Session { access_token: "a".into(), refresh_token: "r".into(), expires_at: i64::MAX, user: user.clone() }
}

fn profile() -> ProfileRecord {
    ProfileRecord {
        id: "user-1".into(),
        email: "doctor@hospital.org".into(),
        full_name: "Dr. One".into(),
        role: UserRole::Doctor,
        department: Some("Cardiology".into()),
        phone: None,
        created_at: datetime!(2024-01-15 10:00 UTC),
        updated_at: datetime!(2024-01-15 10:00 UTC),
    }
}

fn not_found() -> SessionError {
    SessionError::NotFound { code: "PGRST116".into() }
}

fn policy_denied() -> SessionError {
    SessionError::PolicyDenied { code: "42501".into(), message: "rls".into() }
}

fn live(mock: MockBackend) -> (SessionSynchronizer, Arc<MockBackend>) {
    let mock = Arc::new(mock);
    let sync = SessionSynchronizer::live(mock.clone(), Timing::default());
    (sync, mock)
}

// =========================================================================
// validate_credentials / retry_delay
// =========================================================================

#[test]
fn validation_rejects_empty_email() {
    assert!(matches!(validate_credentials("  ", "secret"), Err(SessionError::Validation(_))));
}

#[test]
fn validation_rejects_empty_password() {
    assert!(matches!(validate_credentials("a@b.c", ""), Err(SessionError::Validation(_))));
}

#[test]
fn validation_rejects_short_password() {
    let err = validate_credentials("a@b.c", "ab").unwrap_err();
    assert_eq!(err.to_string(), "validation failed: password must be at least 3 characters");
}

#[test]
fn validation_accepts_minimum_length() {
    assert!(validate_credentials("a@b.c", "abc").is_ok());
}

#[test]
fn retry_delay_grows_linearly() {
    let base = Duration::from_secs(1);
    assert_eq!(retry_delay(base, 0), Duration::from_secs(1));
    assert_eq!(retry_delay(base, 1), Duration::from_secs(2));
    assert_eq!(retry_delay(base, 2), Duration::from_secs(3));
}

// =========================================================================
// demo mode
// =========================================================================

#[tokio::test]
async fn demo_bootstrap_is_logged_out_immediately() {
    let sync = SessionSynchronizer::demo(Timing::default());
    sync.start().await;
    assert_eq!(sync.state(), SessionState::logged_out());
    assert!(!sync.is_listening());
}

#[tokio::test]
async fn demo_admin_sign_in_sets_state() {
    let sync = SessionSynchronizer::demo(Timing::default());
    sync.bootstrap().await;

    let outcome = sync.sign_in("admin@hospital.com", "pass123").await.unwrap();
    assert_eq!(outcome.user.id, "admin-123");
    assert!(outcome.session.is_none());

    let state = sync.state();
    assert_eq!(state.user.as_ref().map(|u| u.id.as_str()), Some("admin-123"));
    assert_eq!(state.profile.as_ref().map(|p| p.role), Some(UserRole::Admin));
    assert!(!state.loading);
}

#[tokio::test]
async fn demo_wrong_password_does_not_mutate_state() {
    let sync = SessionSynchronizer::demo(Timing::default());
    sync.bootstrap().await;
    let before = sync.state();

    let err = sync.sign_in("admin@hospital.com", "password").await.unwrap_err();
    assert_eq!(err, SessionError::InvalidCredentials);
    assert_eq!(err.to_string(), "Invalid credentials");
    assert_eq!(sync.state(), before);
}

#[tokio::test]
async fn demo_unknown_email_is_invalid_credentials() {
    let sync = SessionSynchronizer::demo(Timing::default());
    sync.bootstrap().await;
    assert_eq!(
        sync.sign_in("nobody@hospital.com", "pass123").await.unwrap_err(),
        SessionError::InvalidCredentials
    );
    assert_eq!(sync.state(), SessionState::logged_out());
}

#[tokio::test]
async fn demo_short_password_is_validation_error() {
    let sync = SessionSynchronizer::demo(Timing::default());
    assert!(matches!(sync.sign_in("admin@hospital.com", "12").await, Err(SessionError::Validation(_))));
}

#[tokio::test]
async fn demo_sign_up_is_not_available() {
    let sync = SessionSynchronizer::demo(Timing::default());
    let data = SignUpData { full_name: "X".into(), role: UserRole::Nurse, department: None, phone: None };
    assert!(matches!(
        sync.sign_up("x@hospital.com", "pass123", &data).await,
        Err(SessionError::NotAvailable(_))
    ));
}

#[tokio::test]
async fn demo_sign_out_is_synchronous_success() {
    let sync = SessionSynchronizer::demo(Timing::default());
    sync.sign_in("nurse@hospital.com", "abc123").await.unwrap();
    sync.sign_out().await.unwrap();
    assert_eq!(sync.state(), SessionState::logged_out());
}

// =========================================================================
// bootstrap
// =========================================================================

#[tokio::test(start_paused = true)]
async fn bootstrap_without_session_is_logged_out() {
    let (sync, mock) = live(MockBackend::new().with_session(Reply::Ready(Ok(None))));
    sync.bootstrap().await;
    assert_eq!(sync.state(), SessionState::logged_out());
    assert_eq!(mock.profile_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_with_session_resolves_profile() {
    let user = identity();
    let (sync, _mock) = live(
        MockBackend::new()
            .with_session(Reply::Ready(Ok(Some(session(&user)))))
            .with_profiles(vec![Reply::Ready(Ok(profile()))]),
    );
    sync.bootstrap().await;
    assert_eq!(sync.state(), SessionState::authenticated(user, Some(profile())));
}

#[tokio::test(start_paused = true)]
async fn bootstrap_hung_session_fetch_settles_after_timeout() {
    let (sync, _mock) = live(MockBackend::new().with_session(Reply::Hang));
    let started = Instant::now();
    sync.bootstrap().await;

    let state = sync.state();
    assert!(!state.loading);
    assert!(state.user.is_none());
    assert!(state.profile.is_none());
    assert_eq!(started.elapsed(), Timing::default().session_timeout);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_timeout_keeps_state_written_meanwhile() {
    let user = identity();
    let (sync, _mock) = live(MockBackend::new().with_session(Reply::Hang));
    sync.store().set(SessionState { user: Some(user.clone()), profile: Some(profile()), loading: true });

    let store = sync.store().clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        store.set(SessionState { user: Some(user), profile: Some(profile()), loading: true });
    });
    sync.bootstrap().await;
    writer.await.unwrap();

    let state = sync.state();
    assert!(!state.loading);
    assert_eq!(state.status(), SessionStatus::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_session_error_settles() {
    let (sync, _mock) =
        live(MockBackend::new().with_session(Reply::Ready(Err(SessionError::Network("down".into())))));
    sync.bootstrap().await;
    assert!(!sync.state().loading);
}

// =========================================================================
// profile resolution
// =========================================================================

#[tokio::test(start_paused = true)]
async fn not_found_profile_leaves_user_without_profile() {
    let (sync, mock) = live(MockBackend::new().with_profiles(vec![Reply::Ready(Err(not_found()))]));
    sync.resolve_profile(identity()).await;

    let state = sync.state();
    assert_eq!(state.user, Some(identity()));
    assert!(state.profile.is_none());
    assert!(!state.loading);
    assert!(!state.is_authorized());
    assert_eq!(mock.profile_call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_retry_with_increasing_delay_then_settle() {
    let (sync, mock) = live(MockBackend::new().with_profiles(vec![
        Reply::Ready(Err(SessionError::Network("reset".into()))),
        Reply::Ready(Err(policy_denied())),
        Reply::Ready(Err(SessionError::Network("reset".into()))),
        Reply::Ready(Ok(profile())),
    ]));
    sync.resolve_profile(identity()).await;

    let calls = mock.profile_calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1 + DEFAULT_RETRIES);
    let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps, vec![Duration::from_secs(1), Duration::from_secs(2)]);

    let state = sync.state();
    assert_eq!(state.status(), SessionStatus::AuthenticatedNoProfile);
    assert!(!state.loading);
}

const DEFAULT_RETRIES: usize = crate::config::DEFAULT_PROFILE_MAX_RETRIES as usize;

#[tokio::test(start_paused = true)]
async fn hung_profile_attempts_time_out_and_retry() {
    let (sync, mock) = live(MockBackend::new().with_profiles(vec![Reply::Hang, Reply::Ready(Ok(profile()))]));
    let started = Instant::now();
    sync.resolve_profile(identity()).await;

    assert_eq!(mock.profile_call_count(), 2);
    assert_eq!(started.elapsed(), Timing::default().profile_timeout + Duration::from_secs(1));
    assert_eq!(sync.state().profile, Some(profile()));
}

#[tokio::test(start_paused = true)]
async fn non_transient_error_is_not_retried() {
    let (sync, mock) = live(MockBackend::new().with_profiles(vec![Reply::Ready(Err(SessionError::Api {
        status: 500,
        message: "boom".into(),
    }))]));
    sync.resolve_profile(identity()).await;
    assert_eq!(mock.profile_call_count(), 1);
    assert_eq!(sync.state().status(), SessionStatus::AuthenticatedNoProfile);
}

#[tokio::test(start_paused = true)]
async fn retry_then_success_publishes_profile() {
    let (sync, mock) = live(
        MockBackend::new().with_profiles(vec![Reply::Ready(Err(policy_denied())), Reply::Ready(Ok(profile()))]),
    );
    sync.resolve_profile(identity()).await;
    assert_eq!(mock.profile_call_count(), 2);
    assert_eq!(sync.state(), SessionState::authenticated(identity(), Some(profile())));
}

// =========================================================================
// sign in / sign out / sign up (live)
// =========================================================================

#[tokio::test]
async fn live_validation_error_skips_backend() {
    let (sync, mock) = live(MockBackend::new());
    assert!(matches!(sync.sign_in("", "secret").await, Err(SessionError::Validation(_))));
    assert!(matches!(sync.sign_in("a@b.c", "").await, Err(SessionError::Validation(_))));
    assert!(matches!(sync.sign_in("a@b.c", "xy").await, Err(SessionError::Validation(_))));
    assert_eq!(mock.sign_in_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn live_sign_in_returns_session_without_touching_state() {
    let (sync, mock) = live(MockBackend::new());
    sync.store().set_logged_out();

    let outcome = sync.sign_in("doctor@hospital.org", "secret").await.unwrap();
    assert!(outcome.session.is_some());
    assert_eq!(mock.sign_in_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sync.state(), SessionState::logged_out());
}

#[tokio::test]
async fn live_sign_out_failure_keeps_state() {
    let (sync, _mock) =
        live(MockBackend::new().with_sign_out(Err(SessionError::Network("offline".into()))));
    sync.store().set_authenticated(identity(), Some(profile()));

    assert!(sync.sign_out().await.is_err());
    assert_eq!(sync.state().status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn live_sign_out_success_logs_out() {
    let (sync, _mock) = live(MockBackend::new());
    sync.store().set_authenticated(identity(), Some(profile()));
    sync.sign_out().await.unwrap();
    assert_eq!(sync.state(), SessionState::logged_out());
}

#[tokio::test]
async fn live_sign_up_delegates() {
    let (sync, _mock) = live(MockBackend::new());
    let data = SignUpData {
        full_name: "New Nurse".into(),
        role: UserRole::Nurse,
        department: Some("ICU".into()),
        phone: None,
    };
    let outcome = sync.sign_up("new@hospital.org", "secret", &data).await.unwrap();
    assert_eq!(outcome.user.email, "new@hospital.org");
}

// =========================================================================
// force_sign_out
// =========================================================================

#[tokio::test(start_paused = true)]
async fn force_sign_out_logs_out_even_when_backend_fails() {
    let (sync, mock) = live(MockBackend::new().with_sign_out(Err(SessionError::Network("offline".into()))));
    sync.store().set_authenticated(identity(), Some(profile()));

    sync.force_sign_out().await;

    assert_eq!(sync.state(), SessionState::logged_out());
    assert!(mock.cleared.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn force_sign_out_wins_over_profile_resolution_in_flight() {
    let (sync, mock) = live(
        MockBackend::new()
            .with_profiles(vec![Reply::Ready(Err(policy_denied())), Reply::Ready(Ok(profile()))])
            .with_sign_out(Err(SessionError::Network("offline".into()))),
    );

    tokio::join!(sync.resolve_profile(identity()), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        sync.force_sign_out().await;
    });

    assert_eq!(mock.profile_call_count(), 2);
    assert_eq!(sync.state(), SessionState::logged_out());
}

#[tokio::test(start_paused = true)]
async fn sign_out_during_bootstrap_discards_the_profile() {
    let (sync, _mock) = live(
        MockBackend::new()
            .with_session(Reply::Ready(Ok(Some(session(&identity())))))
            .with_profiles(vec![Reply::Ready(Err(policy_denied())), Reply::Ready(Ok(profile()))]),
    );

    tokio::join!(sync.bootstrap(), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        sync.sign_out().await.unwrap();
    });

    assert_eq!(sync.state(), SessionState::logged_out());
}

#[tokio::test]
async fn force_sign_out_in_demo_mode() {
    let sync = SessionSynchronizer::demo(Timing::default());
    sync.sign_in("finance@hospital.com", "abc123").await.unwrap();
    sync.force_sign_out().await;
    assert_eq!(sync.state(), SessionState::logged_out());
}

// =========================================================================
// retry_profile_load
// =========================================================================

#[tokio::test(start_paused = true)]
async fn retry_profile_load_requires_user_without_profile() {
    let (sync, mock) = live(MockBackend::new());
    sync.store().set_logged_out();
    assert!(matches!(sync.retry_profile_load().await, Err(SessionError::NotAvailable(_))));

    sync.store().set_authenticated(identity(), Some(profile()));
    assert!(matches!(sync.retry_profile_load().await, Err(SessionError::NotAvailable(_))));
    assert_eq!(mock.profile_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn retry_profile_load_fetches_again() {
    let (sync, mock) = live(MockBackend::new().with_profiles(vec![Reply::Ready(Ok(profile()))]));
    sync.store().set_authenticated(identity(), None);

    sync.retry_profile_load().await.unwrap();

    assert_eq!(mock.profile_call_count(), 1);
    assert_eq!(sync.state(), SessionState::authenticated(identity(), Some(profile())));
}

// =========================================================================
// auth-change listener
// =========================================================================

#[tokio::test]
async fn listener_resolves_profile_on_sign_in_event() {
    let user = identity();
    let (sync, mock) = live(
        MockBackend::new()
            .with_session(Reply::Ready(Ok(None)))
            .with_profiles(vec![Reply::Ready(Ok(profile()))]),
    );
    sync.start().await;
    assert!(sync.is_listening());

    let mut observer = sync.store().subscribe();
    mock.push(AuthChange::new(AuthEvent::SignedIn, Some(session(&user))));
    observer.wait_for(|s| s.profile.is_some() && !s.loading).await.unwrap();

    assert_eq!(sync.state(), SessionState::authenticated(user, Some(profile())));
}

#[tokio::test]
async fn listener_logs_out_on_sign_out_event() {
    let (sync, mock) = live(MockBackend::new().with_session(Reply::Ready(Ok(None))));
    sync.start().await;
    sync.store().set_authenticated(identity(), Some(profile()));

    let mut observer = sync.store().subscribe();
    mock.push(AuthChange::new(AuthEvent::SignedOut, None));
    observer.wait_for(|s| s.user.is_none()).await.unwrap();

    assert_eq!(sync.state(), SessionState::logged_out());
}

#[tokio::test]
async fn shutdown_stops_listener() {
    let (sync, mock) = live(MockBackend::new().with_session(Reply::Ready(Ok(None))));
    sync.start().await;
    sync.shutdown();
    tokio::task::yield_now().await;
    assert!(!sync.is_listening());

    sync.store().set_authenticated(identity(), Some(profile()));
    let _ = mock.events.send(AuthChange::new(AuthEvent::SignedOut, None));
    tokio::task::yield_now().await;
    assert_eq!(sync.state().status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn handle_auth_change_directly() {
    let (sync, _mock) = live(MockBackend::new().with_profiles(vec![Reply::Ready(Err(not_found()))]));
    sync.handle_auth_change(AuthChange::new(AuthEvent::TokenRefreshed, Some(session(&identity()))))
        .await;
    assert_eq!(sync.state().status(), SessionStatus::AuthenticatedNoProfile);

    sync.handle_auth_change(AuthChange::new(AuthEvent::SignedOut, None)).await;
    assert_eq!(sync.state(), SessionState::logged_out());
}

#[tokio::test]
async fn from_config_demo_builds_demo_synchronizer() {
    let sync = SessionSynchronizer::from_config(&BackendConfig::demo()).unwrap();
    assert!(sync.is_demo());
    assert!(sync.state().loading);
}
