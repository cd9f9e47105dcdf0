//! Transport layer for modem communication.
//!
//! A transport opens the serial channel and hands back a receiver of
//! [`ChannelEvent`]s. The session owns that receiver; it is the only
//! listener for data, errors and close notifications.

#[cfg(test)]
pub(crate) mod mock;
pub mod serial;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::Result;

/// Capacity of the channel event queue.
pub const EVENT_CAPACITY: usize = 256;

/// Events reported by an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Bytes read from the device.
    Data(Bytes),
    /// The channel reported an error; it should be considered unusable.
    Error(String),
    /// The channel was closed by the device or the OS.
    Closed,
}

/// Trait for transport implementations.
pub trait Transport: Send + Sync {
    /// Opens the channel and returns its event stream.
    fn open(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<ChannelEvent>>>;

    /// Writes bytes to the channel.
    fn write(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Releases the channel.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Returns true if the channel is open.
    fn is_open(&self) -> bool;

    /// Human-readable channel address, used in logs and errors.
    fn address(&self) -> &str;
}

pub use serial::SerialTransport;
