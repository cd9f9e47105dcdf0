//! Event system for session notifications.
//!
//! The session is the single listener on its channel. It translates channel
//! events into [`SessionEvent`]s and broadcasts them here, so the supervisor
//! and the router each hold one subscription instead of registering their
//! own channel callbacks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::session::SessionState;

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved between states.
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A line arrived that is not part of a command response.
    Unsolicited(String),
}

impl SessionEvent {
    /// Returns the new state for transition events.
    #[must_use]
    pub const fn entered(&self) -> Option<SessionState> {
        match self {
            Self::StateChanged { to, .. } => Some(*to),
            Self::Unsolicited(_) => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("subscription lagged, {} events skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<SessionEvent>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Waits for an event matching `predicate`.
    ///
    /// Returns `None` if the timeout expires or the dispatcher is gone.
    pub async fn wait_for<F>(&self, mut predicate: F, timeout: Duration) -> Option<SessionEvent>
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                while let Some(event) = subscription.recv().await {
                    if predicate(&event) {
                        return Some(event);
                    }
                }
                None
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch(SessionEvent::Unsolicited("RING".into()));

        let event = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(SessionEvent::Unsolicited("RING".into())));
    }

    #[test]
    fn test_entered() {
        let event = SessionEvent::StateChanged {
            from: SessionState::Ready,
            to: SessionState::Faulted,
        };
        assert_eq!(event.entered(), Some(SessionState::Faulted));
        assert_eq!(SessionEvent::Unsolicited("x".into()).entered(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let dispatcher = EventDispatcher::new(16);
        let result = dispatcher
            .wait_for(|e| e.entered().is_some(), Duration::from_secs(1))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_wait_for_matches() {
        let dispatcher = EventDispatcher::new(16);
        let waiter = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .wait_for(
                        |e| e.entered() == Some(SessionState::Ready),
                        Duration::from_secs(5),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        dispatcher.dispatch(SessionEvent::Unsolicited("noise".into()));
        dispatcher.dispatch(SessionEvent::StateChanged {
            from: SessionState::Initializing,
            to: SessionState::Ready,
        });

        let event = waiter.await.unwrap();
        assert_eq!(event.and_then(|e| e.entered()), Some(SessionState::Ready));
    }
}
