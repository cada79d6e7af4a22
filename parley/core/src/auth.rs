//! Authenticated Session Access
//!
//! The core never issues sessions itself: an external identity provider
//! authenticates the user and something at the process edge (the daemon
//! handshake, a web framework, a test fixture) exposes the resulting
//! identity through the [`SessionProvider`] trait.
//!
//! Every orchestrator operation resolves the current session first and fails
//! with [`crate::Error::Unauthorized`] before any remote call when none is
//! available.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// The authenticated user's identity as supplied by the identity provider.
///
/// Ephemeral: held for the duration of a session, never persisted by the
/// core. The email is the only attribute the contact fingerprint is derived
/// from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique, case-insensitive email address
    pub email: String,
    /// Display name, when the provider supplies one
    pub name: Option<String>,
}

impl Identity {
    /// Create an identity from an email and optional display name
    pub fn new(email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            email: email.into(),
            name,
        }
    }

    /// Display name with a fallback for anonymous-looking records
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("a user")
    }
}

/// An authenticated session
#[derive(Clone, Debug)]
pub struct AuthSession {
    /// Who the session belongs to
    pub identity: Identity,
    /// When the session stops being valid (None = no expiry enforced here)
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    /// Create a session with no expiry
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            expires_at: None,
        }
    }

    /// Create a session that expires at the given instant
    #[must_use]
    pub fn with_expiry(identity: Identity, expires_at: DateTime<Utc>) -> Self {
        Self {
            identity,
            expires_at: Some(expires_at),
        }
    }

    /// Whether the session has passed its expiry instant
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Source of the current authenticated session.
///
/// Implementations wrap whatever the surrounding process uses for
/// authentication. Returning `None` (or an expired session) makes every
/// orchestrator operation fail with `Unauthorized`.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// The current session, if any
    async fn current_session(&self) -> Option<AuthSession>;
}

/// Session provider holding a single, settable session.
///
/// Used by the daemon (one session per authenticated connection) and by
/// tests. Expired sessions are reported as absent.
#[derive(Default)]
pub struct StaticSessionProvider {
    session: RwLock<Option<AuthSession>>,
}

impl StaticSessionProvider {
    /// Create a provider with no session (all operations unauthorized)
    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Create a provider with a fixed session
    #[must_use]
    pub fn signed_in(session: AuthSession) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }

    /// Replace the current session
    pub fn set_session(&self, session: Option<AuthSession>) {
        *self.session.write() = session;
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self) -> Option<AuthSession> {
        let session = self.session.read().clone()?;
        if session.is_expired() {
            return None;
        }
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn identity() -> Identity {
        Identity::new("alice@example.com", Some("Alice".to_string()))
    }

    #[tokio::test]
    async fn test_signed_out_has_no_session() {
        let provider = StaticSessionProvider::signed_out();
        assert!(provider.current_session().await.is_none());
    }

    #[tokio::test]
    async fn test_signed_in_returns_session() {
        let provider = StaticSessionProvider::signed_in(AuthSession::new(identity()));
        let session = provider.current_session().await.unwrap();
        assert_eq!(session.identity.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_expired_session_is_absent() {
        let expired = AuthSession::with_expiry(identity(), Utc::now() - Duration::hours(1));
        let provider = StaticSessionProvider::signed_in(expired);
        assert!(provider.current_session().await.is_none());
    }

    #[test]
    fn test_display_name_fallback() {
        let anonymous = Identity::new("x@example.com", None);
        assert_eq!(anonymous.display_name(), "a user");
        assert_eq!(identity().display_name(), "Alice");
    }
}
