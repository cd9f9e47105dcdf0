//! # smsgate
//!
//! Send SMS through a GSM modem attached to a serial line.
//!
//! The crate drives the modem with AT commands and PDU-mode frames. It
//! keeps the serial session alive, reconnects after faults, and runs
//! every outbound message through a retrying FIFO queue so that only one
//! command transaction is ever in flight on the line.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use smsgate::{ModemSession, QueueOptions, SendQueue};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), smsgate::Error> {
//!     let session = Arc::new(ModemSession::serial("/dev/ttyUSB0"));
//!     session.connect().await?;
//!
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let (queue, consumer) =
//!         SendQueue::start(Arc::clone(&session), QueueOptions::default(), shutdown_rx);
//!
//!     let outcome = queue.enqueue("65123456", "Hello")?.outcome().await;
//!     println!("{}: {}", outcome.success, outcome.message);
//!
//!     let _ = shutdown_tx.send(true);
//!     let _ = consumer.await;
//!     session.close().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - PDU codec, AT commands and response parsing
//! - [`transport`] - Serial channel abstraction and the `tokio-serial` implementation
//! - [`commands`] - One-at-a-time command transactions with deadlines
//! - [`session`] - Modem session state machine
//! - [`supervisor`] - Reconnection with failure alerting
//! - [`queue`] - Retrying FIFO send queue
//! - [`router`] - Incoming message handling and low-balance alerts
//! - [`event`] - Session event broadcast
//! - [`config`] - TOML configuration

pub mod alert;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod queue;
pub mod router;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use alert::{AlertNotifier, LogNotifier};
pub use commands::CommandTransactor;
pub use config::Config;
pub use error::{Error, PduError, Result};
pub use event::{EventDispatcher, SessionEvent, Subscription};
pub use protocol::{AtCommand, MessageFormat, TextEncoding};
pub use queue::{JobTicket, NumberPlan, QueueOptions, SendQueue};
pub use router::{IncomingMessageRouter, RouterOptions};
pub use session::{ModemSession, SessionOptions, SessionState, SessionStats};
pub use supervisor::{ReconnectSupervisor, SupervisorOptions};
pub use transport::{SerialTransport, Transport, serial::list_ports};
pub use types::{
    Destination, InboundMessage, JobStatus, OutboundJob, SendOutcome, SendRequest,
};
