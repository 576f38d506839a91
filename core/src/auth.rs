//! Process-wide authentication state.
//!
//! # Design
//! [`AuthState`] is the only writer of the session. It changes it in exactly
//! four places: [`login`](AuthState::login), [`logout`](AuthState::logout),
//! [`validate_session`](AuthState::validate_session) and
//! [`expire_session`](AuthState::expire_session) (the global logout raised
//! when a protected endpoint rejects the token). Every change is broadcast to
//! subscribers in registration order; a subscriber that panics is skipped and
//! the rest are still notified.
//!
//! Callbacks run after the subscriber lock is released, so a callback may
//! subscribe or unsubscribe without deadlocking.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::classify::classify;
use crate::error::{ClassifiedError, ErrorKind, TransportError};
use crate::http::{HttpMethod, HttpRequest, DEFAULT_TIMEOUT};
use crate::session::{AuthSession, SessionCell};
use crate::storage::{SessionStorage, TOKEN_KEY, USER_KEY};
use crate::transport::Transport;
use crate::types::{Credentials, LoginResponse, Registration, User};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const SESSION_PATH: &str = "/auth/me";

pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeReason {
    Login,
    Logout,
    SessionExpired,
    Restored,
}

/// Broadcast payload for every session transition.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    pub authenticated: bool,
    pub user: Option<User>,
    pub reason: AuthChangeReason,
}

impl AuthChange {
    fn signed_in(user: User, reason: AuthChangeReason) -> Self {
        Self {
            authenticated: true,
            user: Some(user),
            reason,
        }
    }

    fn signed_out(reason: AuthChangeReason) -> Self {
        Self {
            authenticated: false,
            user: None,
            reason,
        }
    }
}

/// Navigates the host UI to its login view.
pub trait Redirector: Send + Sync {
    fn redirect_to_login(&self);
}

pub struct NoRedirect;

impl Redirector for NoRedirect {
    fn redirect_to_login(&self) {}
}

type Callback = Arc<dyn Fn(&AuthChange) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

/// Handle returned by [`AuthState::subscribe`]. The callback stays
/// registered for as long as the handle lives; dropping it unsubscribes.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("next_id", &self.next_id)
            .field("len", &self.entries.len())
            .finish()
    }
}

// Releases the single-validation flag even if the validating future is dropped.
struct ValidationGuard<'a>(&'a AtomicBool);

impl Drop for ValidationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AuthState {
    transport: Arc<dyn Transport>,
    session: SessionCell,
    storage: Arc<dyn SessionStorage>,
    subscribers: Arc<Mutex<Subscribers>>,
    validating: AtomicBool,
    redirector: Arc<dyn Redirector>,
    redirect_delay: Duration,
    timeout: Duration,
}

impl AuthState {
    pub fn new(transport: Arc<dyn Transport>, session: SessionCell, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            transport,
            session,
            storage,
            subscribers: Arc::default(),
            validating: AtomicBool::new(false),
            redirector: Arc::new(NoRedirect),
            redirect_delay: DEFAULT_REDIRECT_DELAY,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_redirector(mut self, redirector: Arc<dyn Redirector>) -> Self {
        self.redirector = redirector;
        self
    }

    pub fn with_redirect_delay(mut self, delay: Duration) -> Self {
        self.redirect_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.session.snapshot()
    }

    pub fn user(&self) -> Option<User> {
        self.session.snapshot().map(|session| session.user)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.snapshot().is_some()
    }

    /// Signs in and broadcasts the new session. A failed login leaves any
    /// existing session untouched and never raises a global logout.
    pub async fn login(&self, credentials: &Credentials) -> Result<User, ClassifiedError> {
        let body = serde_json::to_value(credentials)
            .map_err(|err| classify(&TransportError::InvalidRequest(err.to_string()), LOGIN_PATH))?;
        let request = HttpRequest::new(HttpMethod::Post, LOGIN_PATH)
            .with_json(body)
            .with_timeout(self.timeout);

        let response = self.transport.send(&request).await.map_err(|err| {
            let classified = classify(&err, LOGIN_PATH);
            tracing::info!(username = %credentials.username, kind = ?classified.kind(), "login rejected");
            classified
        })?;
        let status = response.status;
        let login: LoginResponse = serde_json::from_value(response.body.into_value()).map_err(|err| {
            let reason = err.to_string();
            classify(&TransportError::Decode { status, reason }, LOGIN_PATH)
        })?;

        let issued_at = Utc::now();
        let expires_at = login
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| issued_at + chrono::Duration::seconds(secs));
        let session = AuthSession {
            token: login.token,
            user: login.user.clone(),
            issued_at,
            expires_at,
        };

        self.persist(&session);
        self.session.replace(session);
        tracing::info!(user_id = login.user.id, role = ?login.user.role, "logged in");
        self.notify(&AuthChange::signed_in(login.user.clone(), AuthChangeReason::Login));
        Ok(login.user)
    }

    /// Creates an account. Does not sign in.
    pub async fn register(&self, registration: &Registration) -> Result<User, ClassifiedError> {
        let body = serde_json::to_value(registration)
            .map_err(|err| classify(&TransportError::InvalidRequest(err.to_string()), REGISTER_PATH))?;
        let request = HttpRequest::new(HttpMethod::Post, REGISTER_PATH)
            .with_json(body)
            .with_timeout(self.timeout);
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|err| classify(&err, REGISTER_PATH))?;
        let status = response.status;
        serde_json::from_value(response.body.into_value()).map_err(|err| {
            let reason = err.to_string();
            classify(&TransportError::Decode { status, reason }, REGISTER_PATH)
        })
    }

    /// Clears the session. With `redirect`, the redirector runs after the
    /// configured delay on a spawned task so a logout issued during teardown
    /// cannot loop back into it.
    pub fn logout(&self, redirect: bool) {
        let previous = self.session.take();
        self.clear_storage();
        tracing::info!(had_session = previous.is_some(), "logged out");
        self.notify(&AuthChange::signed_out(AuthChangeReason::Logout));

        if redirect {
            self.schedule_redirect();
        }
    }

    /// Global logout signal for a token the backend no longer accepts.
    pub fn expire_session(&self) {
        let previous = self.session.take();
        self.clear_storage();
        tracing::warn!(
            user_id = previous.as_ref().map(|session| session.user.id),
            "session rejected by backend"
        );
        self.notify(&AuthChange::signed_out(AuthChangeReason::SessionExpired));
    }

    /// Checks the stored token against the backend.
    ///
    /// Only an auth rejection ends the session; network and server failures
    /// report `false` and keep it. While one validation is in flight, further
    /// calls return `true` without issuing a request.
    pub async fn validate_session(&self) -> bool {
        if self
            .validating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("session validation already in flight");
            return true;
        }
        let _guard = ValidationGuard(&self.validating);

        let Some(session) = self.session.snapshot() else {
            return false;
        };
        if session.is_expired(Utc::now()) {
            tracing::info!(user_id = session.user.id, "session expired locally");
            self.expire_if_current(&session.token);
            return false;
        }

        let request = HttpRequest::get(SESSION_PATH).with_timeout(self.timeout);
        match self.transport.send(&request).await {
            Ok(response) => {
                match serde_json::from_value::<User>(response.body.into_value()) {
                    Ok(user) => {
                        if self.session.refresh_user(&session.token, user.clone()) {
                            self.store_user(&user);
                        }
                    }
                    Err(err) => tracing::debug!(error = %err, "session check returned no user payload"),
                }
                true
            }
            Err(err) => {
                let classified = classify(&err, SESSION_PATH);
                if classified.kind() == ErrorKind::Auth {
                    self.expire_if_current(&session.token);
                } else {
                    tracing::warn!(
                        kind = ?classified.kind(),
                        status = classified.source_status(),
                        "session validation failed, keeping session"
                    );
                }
                false
            }
        }
    }

    /// Rebuilds the session from persisted storage. Returns the restored user.
    pub fn restore(&self) -> Option<User> {
        let token = self.storage.get(TOKEN_KEY)?;
        let Some(raw_user) = self.storage.get(USER_KEY) else {
            self.clear_storage();
            return None;
        };
        let user: User = match serde_json::from_str(&raw_user) {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(error = %err, "stored user is unreadable, discarding session");
                self.clear_storage();
                return None;
            }
        };

        self.session.replace(AuthSession {
            token,
            user: user.clone(),
            issued_at: Utc::now(),
            expires_at: None,
        });
        tracing::debug!(user_id = user.id, "session restored from storage");
        self.notify(&AuthChange::signed_in(user.clone(), AuthChangeReason::Restored));
        Some(user)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AuthChange) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.entries.push((id, Arc::new(callback)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().entries.len()
    }

    fn expire_if_current(&self, token: &str) {
        if self.session.take_if_token(token).is_some() {
            self.clear_storage();
            self.notify(&AuthChange::signed_out(AuthChangeReason::SessionExpired));
        }
    }

    fn notify(&self, change: &AuthChange) {
        let callbacks: Vec<(u64, Callback)> = self.subscribers.lock().entries.clone();
        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                tracing::error!(subscriber = id, "auth subscriber panicked");
            }
        }
    }

    fn schedule_redirect(&self) {
        let redirector = Arc::clone(&self.redirector);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let delay = self.redirect_delay;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    redirector.redirect_to_login();
                });
            }
            Err(_) => redirector.redirect_to_login(),
        }
    }

    fn persist(&self, session: &AuthSession) {
        self.storage.set(TOKEN_KEY, &session.token);
        self.store_user(&session.user);
    }

    fn store_user(&self, user: &User) {
        match serde_json::to_string(user) {
            Ok(raw) => self.storage.set(USER_KEY, &raw),
            Err(err) => tracing::warn!(error = %err, "failed to serialize user for storage"),
        }
    }

    fn clear_storage(&self) {
        self.storage.remove(TOKEN_KEY);
        self.storage.remove(USER_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::test_support::ScriptedTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        storage: Arc<MemoryStorage>,
        auth: AuthState,
        events: Arc<Mutex<Vec<AuthChange>>>,
        _recorder: Subscription,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let storage = Arc::new(MemoryStorage::new());
        let auth = AuthState::new(transport.clone(), SessionCell::new(), storage.clone());
        let events: Arc<Mutex<Vec<AuthChange>>> = Arc::default();
        let sink = Arc::clone(&events);
        let recorder = auth.subscribe(move |change| sink.lock().push(change.clone()));
        Fixture {
            transport,
            storage,
            auth,
            events,
            _recorder: recorder,
        }
    }

    fn admin_json() -> serde_json::Value {
        json!({ "id": 1, "username": "admin", "role": "admin" })
    }

    fn login_ok(transport: &ScriptedTransport) {
        transport.push_json(
            LOGIN_PATH,
            200,
            json!({ "token": "tok-1", "user": admin_json(), "expiresIn": 3600 }),
        );
    }

    async fn logged_in() -> Fixture {
        let fx = fixture();
        login_ok(&fx.transport);
        fx.auth.login(&Credentials::new("admin", "admin123")).await.unwrap();
        fx.events.lock().clear();
        fx
    }

    #[tokio::test]
    async fn login_stores_session_and_notifies() {
        let fx = fixture();
        login_ok(&fx.transport);

        let user = fx.auth.login(&Credentials::new("admin", "admin123")).await.unwrap();

        assert_eq!(user.username, "admin");
        assert!(fx.auth.is_authenticated());
        assert!(fx.auth.session().unwrap().expires_at.is_some());
        assert_eq!(fx.storage.get(TOKEN_KEY).as_deref(), Some("tok-1"));
        let events = fx.events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].authenticated);
        assert_eq!(events[0].reason, AuthChangeReason::Login);
    }

    #[tokio::test]
    async fn rejected_login_leaves_state_alone() {
        let fx = fixture();
        fx.transport
            .push_json(LOGIN_PATH, 401, json!({ "message": "invalid credentials" }));

        let err = fx.auth.login(&Credentials::new("u", "bad")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(!err.triggers_logout());
        assert_eq!(err.message(), "invalid credentials");
        assert!(!fx.auth.is_authenticated());
        assert!(fx.storage.get(TOKEN_KEY).is_none());
        assert!(fx.events.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_relogin_keeps_existing_session() {
        let fx = logged_in().await;
        fx.transport.push_network_error(LOGIN_PATH);

        let err = fx.auth.login(&Credentials::new("admin", "admin123")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(fx.auth.session().unwrap().token, "tok-1");
        assert!(fx.events.lock().is_empty());
    }

    #[tokio::test]
    async fn register_does_not_sign_in() {
        let fx = fixture();
        fx.transport.push_json(
            REGISTER_PATH,
            201,
            json!({ "id": 5, "username": "wanjiru", "role": "farmer" }),
        );
        let user = fx
            .auth
            .register(&Registration {
                username: "wanjiru".to_string(),
                password: "pw".to_string(),
                email: None,
            })
            .await
            .unwrap();
        assert_eq!(user.id, 5);
        assert!(!fx.auth.is_authenticated());
    }

    struct CountingRedirector(AtomicUsize);

    impl Redirector for CountingRedirector {
        fn redirect_to_login(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn logout_clears_and_redirects_after_delay() {
        let redirector = Arc::new(CountingRedirector(AtomicUsize::new(0)));
        let transport = Arc::new(ScriptedTransport::new());
        login_ok(&transport);
        let storage = Arc::new(MemoryStorage::new());
        let auth = AuthState::new(transport, SessionCell::new(), storage.clone()).with_redirector(redirector.clone());
        auth.login(&Credentials::new("admin", "admin123")).await.unwrap();

        auth.logout(true);

        assert!(!auth.is_authenticated());
        assert!(storage.get(USER_KEY).is_none());
        assert_eq!(redirector.0.load(Ordering::SeqCst), 0);
        tokio::time::sleep(DEFAULT_REDIRECT_DELAY + Duration::from_millis(1)).await;
        assert_eq!(redirector.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_honours_configured_delay() {
        let redirector = Arc::new(CountingRedirector(AtomicUsize::new(0)));
        let auth = AuthState::new(
            Arc::new(ScriptedTransport::new()),
            SessionCell::new(),
            Arc::new(MemoryStorage::new()),
        )
        .with_redirector(redirector.clone())
        .with_redirect_delay(Duration::from_millis(500));

        auth.logout(true);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(redirector.0.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(101)).await;
        assert_eq!(redirector.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validation_rejected_expires_session() {
        let fx = logged_in().await;
        fx.transport.push_json(SESSION_PATH, 401, json!({ "message": "invalid or expired token" }));

        assert!(!fx.auth.validate_session().await);

        assert!(!fx.auth.is_authenticated());
        let events = fx.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], AuthChange::signed_out(AuthChangeReason::SessionExpired));
    }

    #[tokio::test]
    async fn transient_validation_failure_keeps_session() {
        let fx = logged_in().await;
        fx.transport.push_status(SESSION_PATH, 503);
        assert!(!fx.auth.validate_session().await);
        fx.transport.push_network_error(SESSION_PATH);
        assert!(!fx.auth.validate_session().await);

        assert!(fx.auth.is_authenticated());
        assert!(fx.events.lock().is_empty());
    }

    #[tokio::test]
    async fn successful_validation_refreshes_user() {
        let fx = logged_in().await;
        fx.transport.push_json(
            SESSION_PATH,
            200,
            json!({ "id": 1, "username": "admin", "email": "new@maize.test", "role": "admin" }),
        );
        assert!(fx.auth.validate_session().await);
        assert_eq!(fx.auth.user().unwrap().email.as_deref(), Some("new@maize.test"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_validation_issues_one_request() {
        let fx = logged_in().await;
        fx.transport.set_delay(SESSION_PATH, Duration::from_millis(200));
        fx.transport.push_json(SESSION_PATH, 200, admin_json());

        let (first, second) = tokio::join!(fx.auth.validate_session(), fx.auth.validate_session());

        assert!(first);
        assert!(second);
        assert_eq!(fx.transport.calls(SESSION_PATH), 1);

        // The guard is released once the first call completes.
        fx.transport.push_json(SESSION_PATH, 200, admin_json());
        assert!(fx.auth.validate_session().await);
        assert_eq!(fx.transport.calls(SESSION_PATH), 2);
    }

    #[tokio::test]
    async fn validation_without_session_skips_request() {
        let fx = fixture();
        assert!(!fx.auth.validate_session().await);
        assert_eq!(fx.transport.calls(SESSION_PATH), 0);
    }

    #[tokio::test]
    async fn locally_expired_session_is_cleared_without_request() {
        let fx = fixture();
        fx.transport.push_json(
            LOGIN_PATH,
            200,
            json!({ "token": "tok-1", "user": admin_json(), "expiresIn": 0 }),
        );
        fx.auth.login(&Credentials::new("admin", "admin123")).await.unwrap();

        assert!(!fx.auth.validate_session().await);
        assert!(!fx.auth.is_authenticated());
        assert_eq!(fx.transport.calls(SESSION_PATH), 0);
    }

    #[test]
    fn subscribers_are_notified_in_order_despite_panics() {
        let fx = fixture();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let first = Arc::clone(&order);
        let _first = fx.auth.subscribe(move |_| first.lock().push("first"));
        let _faulty = fx.auth.subscribe(|_| panic!("subscriber bug"));
        let third = Arc::clone(&order);
        let _third = fx.auth.subscribe(move |_| third.lock().push("third"));

        fx.auth.logout(false);

        assert_eq!(*order.lock(), vec!["first", "third"]);
        assert_eq!(fx.events.lock().len(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_entry() {
        let fx = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let subscription = fx.auth.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fx.auth.subscriber_count(), 2);

        subscription.unsubscribe();
        subscription.unsubscribe();
        fx.auth.logout(false);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(fx.auth.subscriber_count(), 1);
        assert_eq!(fx.events.lock().len(), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let fx = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&hits);
            let _subscription = fx.auth.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(fx.auth.subscriber_count(), 2);
        }

        fx.auth.logout(false);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(fx.auth.subscriber_count(), 1);
    }

    #[test]
    fn subscription_outliving_state_drops_cleanly() {
        let fx = fixture();
        let subscription = fx.auth.subscribe(|_| {});
        drop(fx);
        subscription.unsubscribe();
    }

    #[test]
    fn restore_reads_both_keys() {
        let fx = fixture();
        fx.storage.set(TOKEN_KEY, "persisted");
        fx.storage.set(USER_KEY, &admin_json().to_string());

        let user = fx.auth.restore().unwrap();

        assert_eq!(user.username, "admin");
        assert_eq!(fx.auth.session().unwrap().token, "persisted");
        assert_eq!(fx.events.lock()[0].reason, AuthChangeReason::Restored);
    }

    #[test]
    fn restore_discards_unreadable_user() {
        let fx = fixture();
        fx.storage.set(TOKEN_KEY, "persisted");
        fx.storage.set(USER_KEY, "{broken");

        assert!(fx.auth.restore().is_none());
        assert!(fx.storage.get(TOKEN_KEY).is_none());
        assert!(!fx.auth.is_authenticated());
    }
}
