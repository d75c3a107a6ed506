//! Session status and the event channel that reports it.
//!
//! A session publishes its status transitions and device list refreshes on a
//! broadcast channel. Hosts subscribe to drive their own status display or
//! discovery; nobody is required to listen.

use serde::Serialize;
use tokio::sync::broadcast;

/// Default channel capacity for session events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No refresh token.
    LoggedOut,
    /// Registration or sign-in is in progress.
    Registering,
    /// Verified and within the renew deadline.
    LoggedIn,
    /// Verified, but the renew deadline has passed.
    RenewalDue,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::LoggedOut => "logged_out",
            SessionStatus::Registering => "registering",
            SessionStatus::LoggedIn => "logged_in",
            SessionStatus::RenewalDue => "renewal_due",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events published by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged { status: SessionStatus },
    DeviceListUpdated { count: usize },
}

/// Broadcast channel for [`SessionEvent`]s.
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns `true` if at least one subscriber got it.
    pub fn publish(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn subscribe(&self) -> SessionEventReceiver {
        SessionEventReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of [`SessionEvents`].
pub struct SessionEventReceiver {
    rx: broadcast::Receiver<SessionEvent>,
}

impl SessionEventReceiver {
    /// Receive the next event. Returns `None` once the session is dropped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Session event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let events = SessionEvents::new();
        assert!(!events.publish(SessionEvent::DeviceListUpdated { count: 1 }));
    }

    #[tokio::test]
    async fn test_subscribe_receives_in_order() {
        let events = SessionEvents::new();
        let mut rx = events.subscribe();
        assert_eq!(events.subscriber_count(), 1);

        events.publish(SessionEvent::StatusChanged {
            status: SessionStatus::Registering,
        });
        events.publish(SessionEvent::StatusChanged {
            status: SessionStatus::LoggedIn,
        });

        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::StatusChanged {
                status: SessionStatus::Registering
            })
        );
        assert_eq!(
            rx.try_recv(),
            Some(SessionEvent::StatusChanged {
                status: SessionStatus::LoggedIn
            })
        );
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&SessionEvent::StatusChanged {
            status: SessionStatus::RenewalDue,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"status_changed","status":"renewal_due"}"#);
    }
}
