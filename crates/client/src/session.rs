//! Session provider, the single source of truth for "is someone logged in".

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use toolhub_protocol::User;

/// An authenticated user and the bearer token that proves it
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: User,
    pub token: String,
}

/// Shared handle to the current session (cheap to Clone).
///
/// Consumers either read the current value or subscribe to presence changes.
#[derive(Clone)]
pub struct SessionProvider {
    tx: Arc<watch::Sender<Option<Session>>>,
}

impl Default for SessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|s| s.token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.tx.borrow().as_ref().map(|s| s.user.clone())
    }

    /// Start (or replace) the session.
    pub fn begin(&self, session: Session) {
        info!(
            component = "session",
            event = "session.started",
            user_id = %session.user.id,
        );
        self.tx.send_replace(Some(session));
    }

    /// End the session. Subscribers are only notified if one was active.
    pub fn end(&self) {
        let ended = self.tx.send_if_modified(|current| current.take().is_some());
        if ended {
            info!(component = "session", event = "session.ended");
        }
    }

    /// End the session only if it still holds `token`. Returns whether it
    /// ended.
    pub fn end_if_token(&self, token: &str) -> bool {
        let ended = self.tx.send_if_modified(|current| {
            match current.as_ref().is_some_and(|s| s.token == token) {
                true => current.take().is_some(),
                false => false,
            }
        });
        if ended {
            info!(component = "session", event = "session.ended");
        }
        ended
    }

    /// Replace the user profile of the active session, keeping its token.
    pub fn update_user(&self, user: User) {
        self.tx.send_if_modified(|current| match current {
            Some(session) => {
                session.user = user;
                true
            }
            None => false,
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
pub(crate) fn test_session(token: &str) -> Session {
    Session {
        user: User {
            id: "user-1".to_string(),
            name: "Test User".to_string(),
            email: "test@example.com".to_string(),
            role: Default::default(),
            status: Default::default(),
            favorite_tools: Vec::new(),
            created_at: None,
            updated_at: None,
        },
        token: token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_and_end() {
        let provider = SessionProvider::new();
        assert!(!provider.is_active());

        provider.begin(test_session("t1"));
        assert!(provider.is_active());
        assert_eq!(provider.token().as_deref(), Some("t1"));

        provider.end();
        assert!(provider.current().is_none());
    }

    #[test]
    fn ending_twice_notifies_once() {
        let provider = SessionProvider::new();
        let mut rx = provider.subscribe();
        provider.begin(test_session("t1"));
        rx.borrow_and_update();

        provider.end();
        assert!(rx.has_changed().expect("provider alive"));
        rx.borrow_and_update();

        provider.end();
        assert!(!rx.has_changed().expect("provider alive"));
    }

    #[test]
    fn end_if_token_ignores_other_tokens() {
        let provider = SessionProvider::new();
        assert!(!provider.end_if_token("t1"));

        provider.begin(test_session("t2"));
        assert!(!provider.end_if_token("t1"));
        assert_eq!(provider.token().as_deref(), Some("t2"));

        assert!(provider.end_if_token("t2"));
        assert!(!provider.is_active());
    }

    #[test]
    fn update_user_keeps_token() {
        let provider = SessionProvider::new();
        let mut user = test_session("t1").user;
        user.name = "Renamed".to_string();

        provider.update_user(user.clone());
        assert!(provider.current().is_none());

        provider.begin(test_session("t1"));
        provider.update_user(user);
        let session = provider.current().expect("session");
        assert_eq!(session.user.name, "Renamed");
        assert_eq!(session.token, "t1");
    }
}
