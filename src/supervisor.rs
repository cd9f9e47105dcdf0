//! Reconnection supervision.
//!
//! [`ReconnectSupervisor`] watches session events. When the session is
//! faulted or closed outside an intentional shutdown it runs a fixed-interval
//! loop that reopens and reinitializes the modem until the session is ready
//! again. Consecutive failures are counted; crossing the alert threshold
//! notifies the operator once per outage.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::alert::{AlertNotifier, notify_all};
use crate::queue::stopped;
use crate::session::{ModemSession, SessionState};
use crate::transport::Transport;

/// Default reconnect interval.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of consecutive failures before alerting.
pub const DEFAULT_ALERT_THRESHOLD: u32 = 5;

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Delay between reconnect attempts.
    pub interval: Duration,
    /// Consecutive failures that trigger an alert.
    pub alert_threshold: u32,
    /// Who gets alerted.
    pub alert_recipients: Vec<String>,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            alert_recipients: Vec::new(),
        }
    }
}

/// Keeps a modem session connected.
pub struct ReconnectSupervisor<T> {
    session: Arc<ModemSession<T>>,
    notifier: Arc<dyn AlertNotifier>,
    options: SupervisorOptions,
    failures: AtomicU32,
    alerted: AtomicBool,
    reconnecting: AtomicBool,
}

impl<T: Transport + 'static> ReconnectSupervisor<T> {
    /// Creates a supervisor for `session`.
    #[must_use]
    pub fn new(
        session: Arc<ModemSession<T>>,
        notifier: Arc<dyn AlertNotifier>,
        options: SupervisorOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            notifier,
            options,
            failures: AtomicU32::new(0),
            alerted: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
        })
    }

    /// Consecutive failed ticks since the session was last ready.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Returns true while a reconnect loop is running.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Spawns the supervision task. It stops once `shutdown` turns true or
    /// its sender is dropped.
    ///
    /// Starting a second task is harmless: only one of them reconnects at a
    /// time, the other waits for session events.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.session.subscribe();

        loop {
            if self.needs_reconnect() {
                match self.reconnect(&mut shutdown).await {
                    Reconnect::Finished => continue,
                    Reconnect::Stopped => break,
                    // Another loop owns the reconnect; wait for news below
                    Reconnect::AlreadyRunning => {}
                }
            }

            // Any event is a reason to look at the session again
            tokio::select! {
                biased;
                () = stopped(&mut shutdown) => break,
                event = events.recv() => {
                    if event.is_none() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("supervisor stopped");
    }

    fn needs_reconnect(&self) -> bool {
        matches!(
            self.session.state(),
            SessionState::Faulted | SessionState::Closed
        ) && !self.session.is_closing()
    }

    /// Runs one reconnect loop until the session is ready or shutdown.
    async fn reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> Reconnect {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            tracing::debug!("reconnect loop already running");
            return Reconnect::AlreadyRunning;
        }

        let interval = self.options.interval;
        tracing::info!(
            interval_ms = interval.as_millis(),
            state = %self.session.state(),
            "starting reconnect loop"
        );
        let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                biased;
                () = stopped(shutdown) => break Reconnect::Stopped,
                _ = ticks.tick() => {}
            }

            if self.session.is_closing() {
                tracing::debug!("session closing, reconnect loop stopped");
                break Reconnect::Finished;
            }
            if self.session.state() == SessionState::Ready {
                tracing::info!(failures = self.failure_count(), "modem reconnected");
                self.failures.store(0, Ordering::SeqCst);
                self.alerted.store(false, Ordering::SeqCst);
                break Reconnect::Finished;
            }

            let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= self.options.alert_threshold
                && !self.alerted.swap(true, Ordering::SeqCst)
            {
                let stats = self.session.stats();
                let message = format!(
                    "modem on {} unreachable after {} reconnect attempts (last error: {})",
                    stats.address,
                    failures,
                    stats.last_error.as_deref().unwrap_or("none"),
                );
                notify_all(
                    self.notifier.as_ref(),
                    &self.options.alert_recipients,
                    &message,
                )
                .await;
            }

            tracing::debug!(attempt = failures, "reconnecting modem");
            if let Err(e) = self.session.connect().await {
                tracing::warn!(attempt = failures, error = %e, "reconnect attempt failed");
            }
        };

        self.reconnecting.store(false, Ordering::SeqCst);
        outcome
    }
}

/// How a call to `reconnect` ended.
enum Reconnect {
    /// The session recovered or is being closed on purpose.
    Finished,
    /// Shutdown was requested or its sender is gone.
    Stopped,
    /// Another loop is already reconnecting.
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::RecordingNotifier;
    use crate::protocol::MessageFormat;
    use crate::session::SessionOptions;
    use crate::transport::mock::{MockHandle, MockTransport};

    const INTERVAL: Duration = Duration::from_secs(5);

    async fn supervised() -> (
        Arc<ModemSession<MockTransport>>,
        MockHandle,
        Arc<ReconnectSupervisor<MockTransport>>,
        RecordingNotifier,
    ) {
        let (transport, handle) = MockTransport::new();
        let session = Arc::new(ModemSession::new(
            transport,
            SessionOptions {
                format: MessageFormat::Pdu,
                command_timeout: Duration::from_secs(1),
            },
        ));
        session.connect().await.unwrap();

        let notifier = RecordingNotifier::default();
        let supervisor = ReconnectSupervisor::new(
            Arc::clone(&session),
            Arc::new(notifier.clone()),
            SupervisorOptions {
                interval: INTERVAL,
                alert_threshold: 5,
                alert_recipients: vec!["ops@example.com".into()],
            },
        );
        (session, handle, supervisor, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_fires_once_per_outage() {
        let (session, handle, supervisor, notifier) = supervised().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = supervisor.start(shutdown_rx);

        handle.fail_opens(u32::MAX);
        handle.drop_channel();

        // Ticks at 5s..25s: the fifth failure alerts
        tokio::time::sleep(INTERVAL * 5 + Duration::from_secs(1)).await;
        assert!(supervisor.is_reconnecting());
        assert_eq!(supervisor.failure_count(), 5);
        assert_eq!(notifier.calls().len(), 1);
        assert_eq!(notifier.calls()[0].0, "ops@example.com");

        // Still failing: the counter grows, no second alert
        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(supervisor.failure_count(), 10);
        assert_eq!(notifier.calls().len(), 1);

        // Device comes back: one tick reconnects, the next resets the counter
        handle.fail_opens(0);
        tokio::time::sleep(INTERVAL * 2).await;
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(supervisor.failure_count(), 0);
        assert!(!supervisor.is_reconnecting());

        // A new outage alerts again
        handle.fail_opens(u32::MAX);
        handle.drop_channel();
        tokio::time::sleep(INTERVAL * 5 + Duration::from_secs(1)).await;
        assert_eq!(notifier.calls().len(), 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_transient_loss() {
        let (session, handle, supervisor, notifier) = supervised().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _task = supervisor.start(shutdown_rx);

        handle.drop_channel();
        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(handle.opens(), 2);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(supervisor.failure_count(), 0);
        assert!(notifier.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_intentional_close_is_not_supervised() {
        let (session, handle, supervisor, _notifier) = supervised().await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _task = supervisor.start(shutdown_rx);

        session.close().await.unwrap();
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!supervisor.is_reconnecting());
        assert_eq!(handle.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_does_not_double_reconnect() {
        let (_session, handle, supervisor, notifier) = supervised().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let first = supervisor.start(shutdown_rx.clone());
        let second = supervisor.start(shutdown_rx);

        handle.fail_opens(u32::MAX);
        handle.drop_channel();
        tokio::time::sleep(INTERVAL * 5 + Duration::from_secs(1)).await;

        // One tick per interval, not one per task
        assert_eq!(supervisor.failure_count(), 5);
        assert_eq!(handle.opens(), 6);
        assert_eq!(notifier.calls().len(), 1);

        shutdown_tx.send(true).unwrap();
        first.await.unwrap();
        second.await.unwrap();
        assert!(!supervisor.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_shutdown_sender_stops_supervisor() {
        let (_session, handle, supervisor, _notifier) = supervised().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = supervisor.start(shutdown_rx);

        handle.fail_opens(u32::MAX);
        handle.drop_channel();
        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert!(supervisor.is_reconnecting());

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("supervisor kept running")
            .unwrap();
        assert!(!supervisor.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reconnect_loop() {
        let (_session, handle, supervisor, _notifier) = supervised().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = supervisor.start(shutdown_rx);

        handle.fail_opens(u32::MAX);
        handle.drop_channel();
        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert!(supervisor.is_reconnecting());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert!(!supervisor.is_reconnecting());
        let opens = handle.opens();

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(handle.opens(), opens);
    }
}
