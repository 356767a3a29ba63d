//! Session events published to consumers
//!
//! Consumers subscribe instead of polling storage. Events are broadcast;
//! a slow subscriber that lags behind misses old events rather than blocking
//! the session components.

use tokio::sync::broadcast;

use crate::models::Identity;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user (or the consuming application) logged out
    Explicit,
    /// The refresh token could not be used
    RefreshFailed,
    /// The access token expired and no refresh was possible
    Expired,
    /// Another device invalidated this session
    MultiDevice(String),
    /// The native host rejected the biometric challenge
    BiometricDenied,
}

/// A change in the session visible to consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Login {
        identity: Identity,
        keep_login: bool,
    },
    Logout {
        reason: LogoutReason,
    },
    TokenRefreshed {
        expires_at_ms: Option<u64>,
    },
    AutoLoginFailed {
        reason: String,
        message: Option<String>,
    },
}

/// Broadcast hub for [`SessionEvent`]s
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: SessionEvent) {
        log::debug!("Session event: {event:?}");
        let _ = self.sender.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let events = SessionEvents::default();
        let mut rx = events.subscribe();

        events.emit(SessionEvent::TokenRefreshed {
            expires_at_ms: Some(1),
        });
        events.emit(SessionEvent::Logout {
            reason: LogoutReason::Explicit,
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::TokenRefreshed {
                expires_at_ms: Some(1)
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Logout {
                reason: LogoutReason::Explicit
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers() {
        SessionEvents::default().emit(SessionEvent::Logout {
            reason: LogoutReason::Expired,
        });
    }
}
