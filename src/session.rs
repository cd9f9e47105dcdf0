//! Modem session lifecycle.
//!
//! [`ModemSession`] owns one serial channel and the state machine around it:
//!
//! ```text
//! Closed -> Opening -> Initializing -> Ready -> Closing -> Closed
//!              |            |            |
//!              +----------> Faulted <----+        Faulted -> Opening
//! ```
//!
//! The session is the single listener on the channel. Incoming data goes to
//! the active command transaction; lines nobody asked for are republished
//! as [`SessionEvent::Unsolicited`]. A channel error or close while the
//! session is not closing moves it to [`SessionState::Faulted`]; reopening is
//! left to the supervisor.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::commands::{CommandTransactor, DEFAULT_TIMEOUT, ResponseSlot};
use crate::error::{Error, Result};
use crate::event::{EventDispatcher, SessionEvent, Subscription};
use crate::protocol::command::ESCAPE;
use crate::protocol::{AtCommand, LineDecoder, MessageFormat, parse_notification_line};
use crate::transport::{ChannelEvent, SerialTransport, Transport, serial::SerialConfig};

/// Capacity of the session event broadcast.
const EVENT_BUFFER: usize = 256;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Closed,
    Opening,
    Initializing,
    Ready,
    Closing,
    Faulted,
}

impl SessionState {
    /// Returns true if the state machine allows moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Closed | Self::Faulted, Self::Opening)
                | (Self::Opening, Self::Initializing | Self::Faulted)
                | (Self::Initializing, Self::Ready | Self::Faulted)
                | (Self::Ready, Self::Faulted)
                | (
                    Self::Opening | Self::Initializing | Self::Ready | Self::Faulted,
                    Self::Closing
                )
                | (Self::Closing, Self::Closed)
        )
    }

    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Faulted => "faulted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Message format selected during initialization.
    pub format: MessageFormat,
    /// Deadline for each initialization command.
    pub command_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            format: MessageFormat::Pdu,
            command_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Connection history of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Channel address (serial port path).
    pub address: String,
    /// When the channel was last opened successfully.
    pub last_open: Option<SystemTime>,
    /// When the last error was recorded.
    pub last_error_at: Option<SystemTime>,
    /// Description of the last error.
    pub last_error: Option<String>,
}

/// State shared between the session and its channel listener.
struct Shared {
    state: watch::Sender<SessionState>,
    dispatcher: EventDispatcher,
    closing: AtomicBool,
    stats: Mutex<SessionStats>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn stats(&self) -> MutexGuard<'_, SessionStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `to` if the state machine allows it and announces the change.
    fn transition(&self, to: SessionState) -> Result<SessionState> {
        let mut from = to;
        let changed = self.state.send_if_modified(|state| {
            from = *state;
            let allowed = from.can_transition_to(to);
            if allowed {
                *state = to;
            }
            allowed
        });
        if !changed {
            return Err(Error::InvalidTransition { from, to });
        }

        tracing::debug!(%from, %to, "session transition");
        self.dispatcher
            .dispatch(SessionEvent::StateChanged { from, to });
        Ok(from)
    }

    fn fault(&self) {
        if let Err(e) = self.transition(SessionState::Faulted) {
            tracing::debug!("not faulting session: {}", e);
        }
    }

    fn record_error(&self, error: &dyn fmt::Display) {
        let mut stats = self.stats();
        stats.last_error_at = Some(SystemTime::now());
        stats.last_error = Some(error.to_string());
    }

    fn channel_lost(&self, reason: &str) {
        if self.closing.load(Ordering::SeqCst) {
            tracing::debug!(reason, "channel ended during close");
            return;
        }
        tracing::warn!(reason, "modem channel lost");
        self.record_error(&reason);
        self.fault();
    }
}

/// Forwards channel events until the channel ends.
async fn listen(shared: Arc<Shared>, slot: ResponseSlot, mut events: mpsc::Receiver<ChannelEvent>) {
    let mut lines = LineDecoder::new();

    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Data(data) => {
                tracing::trace!(data = %String::from_utf8_lossy(&data).escape_debug(), "received");
                let claimed = slot.feed(&data);
                lines.feed(&data);
                while let Some(line) = lines.next_line() {
                    // New-message indications can interleave with a response
                    let stored = parse_notification_line(&line).is_some_and(|n| n.is_stored());
                    if !claimed || stored {
                        shared.dispatcher.dispatch(SessionEvent::Unsolicited(line));
                    }
                }
            }
            ChannelEvent::Error(reason) => {
                slot.abandon();
                shared.channel_lost(&reason);
                return;
            }
            ChannelEvent::Closed => {
                slot.abandon();
                shared.channel_lost("channel closed");
                return;
            }
        }
    }
}

/// One modem attached over a serial channel.
pub struct ModemSession<T> {
    transport: Arc<AsyncMutex<T>>,
    transactor: CommandTransactor<T>,
    shared: Arc<Shared>,
    options: SessionOptions,
    lifecycle: AsyncMutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ModemSession<SerialTransport> {
    /// Creates a session for a serial port with default settings.
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_serial_config(SerialConfig::new(port), SessionOptions::default())
    }

    /// Creates a session with custom serial configuration.
    #[must_use]
    pub fn with_serial_config(config: SerialConfig, options: SessionOptions) -> Self {
        Self::new(SerialTransport::new(config), options)
    }
}

impl<T: Transport> ModemSession<T> {
    /// Creates a closed session over `transport`.
    pub fn new(transport: T, options: SessionOptions) -> Self {
        let stats = SessionStats {
            address: transport.address().to_owned(),
            ..SessionStats::default()
        };
        let transport = Arc::new(AsyncMutex::new(transport));
        let transactor = CommandTransactor::new(Arc::clone(&transport), ResponseSlot::default());
        let (state, _) = watch::channel(SessionState::Closed);

        Self {
            transport,
            transactor,
            shared: Arc::new(Shared {
                state,
                dispatcher: EventDispatcher::new(EVENT_BUFFER),
                closing: AtomicBool::new(false),
                stats: Mutex::new(stats),
            }),
            options,
            lifecycle: AsyncMutex::new(()),
            listener: Mutex::new(None),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Returns a receiver that observes state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.shared.dispatcher.subscribe()
    }

    /// Returns the dispatcher session events are published on.
    #[must_use]
    pub fn events(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Returns true once [`close`](Self::close) has been requested.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    /// Message format the session initializes the modem with.
    #[must_use]
    pub const fn message_format(&self) -> MessageFormat {
        self.options.format
    }

    /// Returns the connection history.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.shared.stats().clone()
    }

    /// Opens the channel and starts listening on it.
    ///
    /// A no-op when the session is already ready. Leaves the session in
    /// [`SessionState::Initializing`] on success and
    /// [`SessionState::Faulted`] on failure.
    pub async fn open(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            SessionState::Ready => return Ok(()),
            SessionState::Closed | SessionState::Faulted => {}
            from => {
                return Err(Error::InvalidTransition {
                    from,
                    to: SessionState::Opening,
                });
            }
        }

        self.shared.closing.store(false, Ordering::SeqCst);
        self.shared.transition(SessionState::Opening)?;
        self.stop_listener();

        let opened = {
            let mut transport = self.transport.lock().await;
            if transport.is_open() {
                if let Err(e) = transport.close().await {
                    tracing::warn!("failed to release previous channel: {}", e);
                }
            }
            transport.open().await
        };
        let events = match opened {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open modem channel");
                self.shared.record_error(&e);
                self.shared.fault();
                return Err(e);
            }
        };

        self.shared.stats().last_open = Some(SystemTime::now());
        self.shared.transition(SessionState::Initializing)?;
        let task = tokio::spawn(listen(
            Arc::clone(&self.shared),
            self.transactor.slot(),
            events,
        ));
        *self.listener_handle() = Some(task);
        Ok(())
    }

    /// Runs the setup sequence and moves the session to ready.
    ///
    /// Any failing command faults the session and its error is returned.
    pub async fn initialize(&self) -> Result<()> {
        match self.state() {
            SessionState::Ready => return Ok(()),
            SessionState::Initializing => {}
            from => {
                return Err(Error::InvalidTransition {
                    from,
                    to: SessionState::Ready,
                });
            }
        }

        for command in self.init_sequence() {
            if let Err(e) = self.transactor.run(&command).await {
                tracing::warn!(command = command.text(), error = %e, "modem initialization failed");
                self.shared.record_error(&e);
                self.shared.fault();
                return Err(e);
            }
        }

        self.shared.transition(SessionState::Ready)?;
        tracing::info!(
            address = %self.shared.stats().address,
            format = ?self.options.format,
            "modem ready"
        );
        Ok(())
    }

    /// Opens (unless already initializing) and initializes the session.
    pub async fn connect(&self) -> Result<()> {
        if self.state() != SessionState::Initializing {
            self.open().await?;
        }
        self.initialize().await
    }

    fn init_sequence(&self) -> Vec<AtCommand> {
        let timeout = self.options.command_timeout;
        let mut sequence = vec![
            AtCommand::attention(timeout),
            AtCommand::reset(timeout),
            AtCommand::echo_off(timeout),
            AtCommand::message_format(self.options.format, timeout),
        ];
        match self.options.format {
            MessageFormat::Pdu => sequence.push(AtCommand::new_message_indication(timeout)),
            MessageFormat::Text => sequence.push(AtCommand::character_set_ira(timeout)),
        }
        sequence
    }

    /// Sends a command on a ready session.
    ///
    /// The command carries its own terminators, error tokens and deadline.
    pub async fn send_command(&self, command: &AtCommand) -> Result<String> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(Error::SessionNotReady { state });
        }
        self.transactor.run(command).await
    }

    /// Writes ESC so the modem drops a pending `>` prompt.
    ///
    /// Sent outside any transaction; whatever the modem answers is
    /// republished as unsolicited output.
    pub async fn cancel_prompt(&self) -> Result<()> {
        let mut transport = self.transport.lock().await;
        transport.write(Bytes::from_static(ESCAPE.as_bytes())).await
    }

    /// Waits until the session is ready.
    pub async fn wait_until_ready(&self) {
        let mut state = self.watch_state();
        // The sender lives in `self`, so this cannot fail while we are borrowed
        let _ = state.wait_for(|s| *s == SessionState::Ready).await;
    }

    /// Releases the channel and ends in [`SessionState::Closed`].
    ///
    /// Close errors from the channel are logged, not returned.
    pub async fn close(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.shared.closing.store(true, Ordering::SeqCst);
        if self.state() == SessionState::Closed {
            return Ok(());
        }

        self.shared.transition(SessionState::Closing)?;
        self.stop_listener();
        {
            let mut transport = self.transport.lock().await;
            if let Err(e) = transport.close().await {
                tracing::warn!(error = %e, "error while closing modem channel");
            }
        }
        self.shared.transition(SessionState::Closed)?;
        tracing::info!("modem session closed");
        Ok(())
    }

    fn listener_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_listener(&self) {
        if let Some(task) = self.listener_handle().take() {
            task.abort();
        }
        self.transactor.slot().abandon();
    }
}

impl<T> Drop for ModemSession<T> {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = listener.take() {
            task.abort();
        }
    }
}
