//! Serial transport implementation.
//!
//! This module provides serial port communication with GSM modems attached
//! over USB or a UART.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::{ChannelEvent, EVENT_CAPACITY, Transport};

/// Default baud rate for GSM modems.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default connection delay.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before the channel is used.
    pub connection_delay: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }
}

/// Serial transport for modem communication.
///
/// The read half is moved into a background task that forwards everything
/// it reads as [`ChannelEvent`]s.
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<WriteHalf<SerialStream>>,
    read_task: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            read_task: None,
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Runs the read loop, forwarding data until the port fails or closes.
    async fn run_read_loop(mut reader: ReadHalf<SerialStream>, events: mpsc::Sender<ChannelEvent>) {
        let mut buf = [0u8; 1024];

        loop {
            let event = match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("serial port closed");
                    ChannelEvent::Closed
                }
                Ok(n) => {
                    tracing::trace!("received {} bytes", n);
                    ChannelEvent::Data(Bytes::copy_from_slice(&buf[..n]))
                }
                Err(e) => {
                    tracing::error!("serial read error: {}", e);
                    ChannelEvent::Error(e.to_string())
                }
            };

            let done = !matches!(event, ChannelEvent::Data(_));
            if events.send(event).await.is_err() {
                tracing::debug!("channel event receiver dropped");
                return;
            }
            if done {
                return;
            }
        }
    }

    async fn open_stream(&self) -> Result<SerialStream> {
        let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .open_native_async()
            .map_err(|e| Error::Open {
                port: self.config.port.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = tokio_serial::SerialPort::write_data_terminal_ready(&mut stream, true) {
            tracing::warn!("failed to set DTR: {}", e);
        }

        // Wait for device to be ready
        tokio::time::sleep(self.config.connection_delay).await;

        // Drain anything the modem printed before we were listening
        let mut buf = [0u8; 1024];
        let mut total_drained = 0usize;
        let drain_deadline = tokio::time::Instant::now() + Duration::from_millis(200);
        while tokio::time::Instant::now() < drain_deadline {
            match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => total_drained += n,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        if total_drained > 0 {
            tracing::debug!("drained {} stale bytes from buffer", total_drained);
        }

        Ok(stream)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<ChannelEvent>>> {
        Box::pin(async move {
            if self.writer.is_some() {
                return Err(Error::Open {
                    port: self.config.port.clone(),
                    reason: "already open".into(),
                });
            }

            tracing::info!(
                port = %self.config.port,
                baud = self.config.baud_rate,
                "opening serial port"
            );
            let stream = self.open_stream().await?;

            let (reader, writer) = tokio::io::split(stream);
            let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
            self.read_task = Some(tokio::spawn(Self::run_read_loop(reader, tx)));
            self.writer = Some(writer);

            tracing::info!("serial port open");
            Ok(rx)
        })
    }

    fn write(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let writer = self.writer.as_mut().ok_or(Error::ChannelClosed)?;
            tracing::trace!("writing {} bytes", data.len());
            writer.write_all(&data).await.map_err(Error::Io)?;
            writer.flush().await.map_err(Error::Io)?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(task) = self.read_task.take() {
                task.abort();
            }
            if let Some(mut writer) = self.writer.take() {
                tracing::info!("closing serial port");
                writer.shutdown().await.map_err(|e| {
                    Error::Io(io::Error::new(e.kind(), format!("close failed: {e}")))
                })?;
            }
            Ok(())
        })
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn address(&self) -> &str {
        &self.config.port
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
