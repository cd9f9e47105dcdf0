//! In-memory transport for tests.
//!
//! Replies are produced by a responder closure that sees every write as
//! text. Tests keep a [`MockHandle`] to inspect writes, inject channel
//! events and make opens fail.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::transport::{ChannelEvent, EVENT_CAPACITY, Transport};

pub(crate) type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct MockState {
    open: bool,
    fail_opens: u32,
    opens: u32,
    writes: Vec<String>,
    responder: Responder,
    events: Option<mpsc::Sender<ChannelEvent>>,
}

impl MockState {
    fn lock(state: &Mutex<Self>) -> std::sync::MutexGuard<'_, Self> {
        state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Replies like a cooperative modem: `>` for `AT+CMGS=`, a message
/// reference for a PDU body, `OK` for everything else.
pub(crate) fn modem_responder() -> Responder {
    Box::new(|written: &str| {
        if written.starts_with("AT+CMGS=") {
            vec!["\r\n> ".into()]
        } else if written.ends_with('\x1a') {
            vec!["\r\n+CMGS: 7\r\n\r\nOK\r\n".into()]
        } else {
            vec!["\r\nOK\r\n".into()]
        }
    })
}

pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[derive(Clone)]
pub(crate) struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub(crate) fn new() -> (Self, MockHandle) {
        Self::with_responder(modem_responder())
    }

    pub(crate) fn with_responder(responder: Responder) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            open: false,
            fail_opens: 0,
            opens: 0,
            writes: Vec::new(),
            responder,
            events: None,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }
}

impl MockHandle {
    pub(crate) fn writes(&self) -> Vec<String> {
        MockState::lock(&self.state).writes.clone()
    }

    pub(crate) fn opens(&self) -> u32 {
        MockState::lock(&self.state).opens
    }

    /// Makes the next `count` opens fail.
    pub(crate) fn fail_opens(&self, count: u32) {
        MockState::lock(&self.state).fail_opens = count;
    }

    pub(crate) fn set_responder(&self, responder: Responder) {
        MockState::lock(&self.state).responder = responder;
    }

    /// Pushes unsolicited bytes as if the modem sent them.
    pub(crate) fn push(&self, data: &str) {
        let events = MockState::lock(&self.state).events.clone();
        if let Some(events) = events {
            let _ = events.try_send(ChannelEvent::Data(Bytes::from(data.to_owned())));
        }
    }

    /// Simulates the device disappearing.
    pub(crate) fn drop_channel(&self) {
        let mut state = MockState::lock(&self.state);
        state.open = false;
        if let Some(events) = state.events.take() {
            let _ = events.try_send(ChannelEvent::Closed);
        }
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<ChannelEvent>>> {
        Box::pin(async move {
            let mut state = MockState::lock(&self.state);
            state.opens += 1;
            if state.fail_opens > 0 {
                state.fail_opens -= 1;
                return Err(Error::Open {
                    port: "mock".into(),
                    reason: "device absent".into(),
                });
            }
            let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
            state.events = Some(tx);
            state.open = true;
            Ok(rx)
        })
    }

    fn write(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = MockState::lock(&self.state);
            if !state.open {
                return Err(Error::ChannelClosed);
            }
            let text = String::from_utf8_lossy(&data).into_owned();
            let replies = (state.responder)(&text);
            state.writes.push(text);
            if let Some(events) = state.events.clone() {
                for reply in replies {
                    let _ = events.try_send(ChannelEvent::Data(Bytes::from(reply)));
                }
            }
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = MockState::lock(&self.state);
            state.open = false;
            state.events = None;
            Ok(())
        })
    }

    fn is_open(&self) -> bool {
        MockState::lock(&self.state).open
    }

    fn address(&self) -> &str {
        "mock"
    }
}
