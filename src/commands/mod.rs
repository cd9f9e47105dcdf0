//! AT command transactions.
//!
//! [`CommandTransactor`] writes one command, collects whatever the session
//! listener forwards from the channel, and resolves on the first terminator
//! token, error token, or deadline. Only one transaction may be active at a
//! time; a concurrent call fails with [`Error::TransactorBusy`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::{AtCommand, ResponseMatch, match_response};
use crate::transport::Transport;

/// Default command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the PDU body of a send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Slot through which the session listener feeds the active transaction.
#[derive(Clone, Default)]
pub struct ResponseSlot {
    inner: Arc<Mutex<SlotState>>,
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    active: Option<(u64, mpsc::UnboundedSender<Bytes>)>,
}

impl ResponseSlot {
    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the slot for a new transaction.
    fn acquire(&self) -> Result<(SlotGuard, mpsc::UnboundedReceiver<Bytes>)> {
        let mut state = self.lock();
        if state.active.is_some() {
            return Err(Error::TransactorBusy);
        }
        state.generation += 1;
        let generation = state.generation;
        let (tx, rx) = mpsc::unbounded_channel();
        state.active = Some((generation, tx));
        let guard = SlotGuard {
            slot: self.clone(),
            generation,
        };
        Ok((guard, rx))
    }

    /// Forwards data to the active transaction.
    ///
    /// Returns false if no transaction is waiting.
    pub fn feed(&self, data: &Bytes) -> bool {
        match &self.lock().active {
            Some((_, tx)) => tx.send(data.clone()).is_ok(),
            None => false,
        }
    }

    /// Returns true while a transaction is in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Fails the active transaction with [`Error::ChannelClosed`].
    pub fn abandon(&self) {
        self.lock().active.take();
    }

    fn release(&self, generation: u64) {
        let mut state = self.lock();
        if state.active.as_ref().is_some_and(|(g, _)| *g == generation) {
            state.active = None;
        }
    }
}

/// Releases the slot when the transaction resolves or is dropped.
struct SlotGuard {
    slot: ResponseSlot,
    generation: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.release(self.generation);
    }
}

/// Issues AT commands one at a time.
pub struct CommandTransactor<T> {
    transport: Arc<AsyncMutex<T>>,
    slot: ResponseSlot,
}

impl<T: Transport> CommandTransactor<T> {
    /// Creates a new command transactor.
    #[must_use]
    pub const fn new(transport: Arc<AsyncMutex<T>>, slot: ResponseSlot) -> Self {
        Self { transport, slot }
    }

    /// Returns the slot the channel listener feeds.
    #[must_use]
    pub fn slot(&self) -> ResponseSlot {
        self.slot.clone()
    }

    /// Runs a command using its own terminators, error tokens and timeout.
    pub async fn run(&self, command: &AtCommand) -> Result<String> {
        self.execute(
            command.text(),
            command.to_bytes(),
            command.terminators(),
            command.error_tokens(),
            command.timeout(),
        )
        .await
    }

    /// Writes `payload` and waits for the response.
    ///
    /// Resolves with the accumulated response once a terminator appears,
    /// fails with [`Error::Modem`] on an error token, and with
    /// [`Error::CommandTimeout`] (carrying the partial response) once
    /// `timeout` has elapsed.
    pub async fn execute(
        &self,
        label: &str,
        payload: Bytes,
        terminators: &[&str],
        error_tokens: &[&str],
        timeout: Duration,
    ) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let (_guard, mut rx) = self.slot.acquire()?;

        tracing::debug!(command = label, "sending command");
        {
            let mut transport = self.transport.lock().await;
            transport.write(payload).await?;
        }

        let mut accumulated = Vec::new();
        loop {
            tokio::select! {
                chunk = rx.recv() => {
                    let Some(chunk) = chunk else {
                        tracing::debug!(command = label, "channel closed mid-transaction");
                        return Err(Error::ChannelClosed);
                    };
                    accumulated.extend_from_slice(&chunk);
                    let response = String::from_utf8_lossy(&accumulated);
                    match match_response(&response, terminators, error_tokens) {
                        Some(ResponseMatch::Complete) => {
                            tracing::trace!(
                                command = label,
                                response = %response.escape_debug(),
                                "command complete"
                            );
                            return Ok(response.into_owned());
                        }
                        Some(ResponseMatch::Failed) => {
                            tracing::debug!(
                                command = label,
                                response = %response.escape_debug(),
                                "modem error"
                            );
                            return Err(Error::Modem { raw: response.into_owned() });
                        }
                        None => {}
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    let partial = String::from_utf8_lossy(&accumulated).into_owned();
                    tracing::debug!(
                        command = label,
                        partial = %partial.escape_debug(),
                        "command timed out"
                    );
                    return Err(Error::CommandTimeout {
                        command: label.to_owned(),
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        partial,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Expect;
    use crate::transport::ChannelEvent;
    use crate::transport::mock::{MockHandle, MockTransport, Responder};

    /// Opens a mock channel and pumps its data into the transactor slot.
    async fn setup(responder: Responder) -> (Arc<CommandTransactor<MockTransport>>, MockHandle) {
        let (mut transport, handle) = MockTransport::with_responder(responder);
        let mut events = transport.open().await.unwrap();
        let transactor = Arc::new(CommandTransactor::new(
            Arc::new(AsyncMutex::new(transport)),
            ResponseSlot::default(),
        ));
        let slot = transactor.slot();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ChannelEvent::Data(data) => {
                        slot.feed(&data);
                    }
                    ChannelEvent::Error(_) | ChannelEvent::Closed => slot.abandon(),
                }
            }
        });
        (transactor, handle)
    }

    #[tokio::test]
    async fn test_execute_ok() {
        let (transactor, handle) = setup(Box::new(|_| vec!["\r\nOK\r\n".into()])).await;
        let response = transactor
            .run(&AtCommand::attention(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(response, "\r\nOK\r\n");
        assert_eq!(handle.writes(), vec!["AT\r".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_accumulates_chunks() {
        let (transactor, _handle) = setup(Box::new(|_| {
            vec!["\r\n+CMGS".into(), ": 4\r\n".into(), "\r\nOK\r\n".into()]
        }))
        .await;
        let response = transactor
            .run(&AtCommand::send_body("00", Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(response, "\r\n+CMGS: 4\r\n\r\nOK\r\n");
    }

    #[tokio::test]
    async fn test_execute_modem_error() {
        let (transactor, _handle) =
            setup(Box::new(|_| vec!["\r\n+CMS ERROR: 38\r\n".into()])).await;
        let err = transactor
            .run(&AtCommand::send_body("00", Duration::from_secs(1)))
            .await
            .unwrap_err();
        match err {
            Error::Modem { raw } => assert!(raw.contains("+CMS ERROR: 38")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_not_before_deadline() {
        let (transactor, _handle) = setup(Box::new(|_| vec!["\r\nbusy".into()])).await;
        let timeout = Duration::from_secs(3);
        let started = Instant::now();
        let err = transactor
            .run(&AtCommand::new("AT+CSQ", Expect::Ok, timeout))
            .await
            .unwrap_err();
        assert!(started.elapsed() >= timeout);
        match err {
            Error::CommandTimeout {
                command,
                timeout_ms,
                partial,
            } => {
                assert_eq!(command, "AT+CSQ");
                assert_eq!(timeout_ms, 3000);
                assert_eq!(partial, "\r\nbusy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_execute_is_busy() {
        let (transactor, _handle) = setup(Box::new(|_| Vec::new())).await;
        let first = {
            let transactor = Arc::clone(&transactor);
            tokio::spawn(async move {
                transactor
                    .run(&AtCommand::attention(Duration::from_secs(2)))
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(transactor.slot().is_active());

        let err = transactor
            .run(&AtCommand::attention(Duration::from_secs(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactorBusy));

        assert!(matches!(
            first.await.unwrap(),
            Err(Error::CommandTimeout { .. })
        ));
        assert!(!transactor.slot().is_active());
    }

    #[tokio::test]
    async fn test_channel_close_fails_transaction() {
        let (transactor, handle) = setup(Box::new(|_| Vec::new())).await;
        let pending = {
            let transactor = Arc::clone(&transactor);
            tokio::spawn(async move {
                transactor
                    .run(&AtCommand::attention(Duration::from_secs(30)))
                    .await
            })
        };
        tokio::task::yield_now().await;
        handle.drop_channel();
        assert!(matches!(pending.await.unwrap(), Err(Error::ChannelClosed)));
    }
}
