//! Session state shared between the auth synchronizer and the transport.
//!
//! [`SessionCell`] is the single owner of the current [`AuthSession`]. Only
//! crate code can write it, and in practice only `AuthState` does. Everything
//! else holds a [`SessionReader`] and sees cloned snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::User;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Default, Clone)]
pub struct SessionCell {
    inner: Arc<RwLock<Option<AuthSession>>>,
}

impl SessionCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn snapshot(&self) -> Option<AuthSession> {
        self.inner.read().clone()
    }

    pub(crate) fn replace(&self, session: AuthSession) {
        *self.inner.write() = Some(session);
    }

    /// Clears the session, returning what was there.
    pub(crate) fn take(&self) -> Option<AuthSession> {
        self.inner.write().take()
    }

    /// Clears the session only if it still holds `token`.
    pub(crate) fn take_if_token(&self, token: &str) -> Option<AuthSession> {
        let mut guard = self.inner.write();
        if guard.as_ref().is_some_and(|session| session.token == token) {
            guard.take()
        } else {
            None
        }
    }

    /// Replaces the user of the session holding `token`. Returns false when the
    /// session changed in the meantime.
    pub(crate) fn refresh_user(&self, token: &str, user: User) -> bool {
        match self.inner.write().as_mut() {
            Some(session) if session.token == token => {
                session.user = user;
                true
            }
            _ => false,
        }
    }
}

/// Read-only view of a [`SessionCell`].
#[derive(Debug, Clone)]
pub struct SessionReader {
    inner: Arc<RwLock<Option<AuthSession>>>,
}

impl SessionReader {
    pub fn snapshot(&self) -> Option<AuthSession> {
        self.inner.read().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.read().as_ref().map(|session| session.token.clone())
    }
}
