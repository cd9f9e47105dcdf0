//! Gateway configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) yields a working configuration for `/dev/ttyUSB0`.
//!
//! ```toml
//! [modem]
//! port = "/dev/ttyUSB2"
//! smsc = "99365999996"
//!
//! [router]
//! admin_numbers = "65123456, 65987654"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::protocol::{MessageFormat, TextEncoding};
use crate::queue::{NumberPlan, QueueOptions};
use crate::router::{RouterOptions, parse_admin_numbers};
use crate::session::SessionOptions;
use crate::supervisor::SupervisorOptions;
use crate::transport::serial::SerialConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub modem: ModemConfig,
    pub queue: QueueConfig,
    pub supervisor: SupervisorConfig,
    pub router: RouterConfig,
}

/// `[modem]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    pub port: String,
    pub baud_rate: u32,
    /// SMSC number; empty uses the SIM default.
    pub smsc: String,
    pub message_format: MessageFormat,
    /// Outbound PDU text encoding.
    pub encoding: TextEncoding,
    pub command_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub connection_delay_ms: u64,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            smsc: String::new(),
            message_format: MessageFormat::Pdu,
            encoding: TextEncoding::Ucs2,
            command_timeout_ms: 5_000,
            send_timeout_ms: 30_000,
            connection_delay_ms: 300,
        }
    }
}

/// `[queue]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub send_cooldown_ms: u64,
    pub short_codes: Vec<String>,
    pub country_code: Option<String>,
    pub local_number_digits: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 5_000,
            send_cooldown_ms: 2_000,
            short_codes: vec!["0800".into()],
            country_code: None,
            local_number_digits: 8,
        }
    }
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub reconnect_interval_ms: u64,
    pub alert_threshold: u32,
    pub alert_recipients: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 5_000,
            alert_threshold: 5,
            alert_recipients: Vec::new(),
        }
    }
}

/// `[router]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub service_short_code: String,
    pub low_balance_threshold: f64,
    /// Separated by commas, semicolons or whitespace.
    pub admin_numbers: String,
    pub delete_after_read: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            service_short_code: "0800".into(),
            low_balance_threshold: 10.0,
            admin_numbers: String::new(),
            delete_after_read: true,
        }
    }
}

impl Config {
    /// Parses and validates TOML. Empty input yields the defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(input).map_err(|e| Error::Config {
            message: format!("invalid config TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&input)
    }

    /// Rejects values that would stall the gateway.
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_attempts == 0 {
            return Err(config_error("queue.max_attempts must be at least 1"));
        }
        if self.supervisor.alert_threshold == 0 {
            return Err(config_error(
                "supervisor.alert_threshold must be at least 1",
            ));
        }
        if self.supervisor.reconnect_interval_ms == 0 {
            return Err(config_error(
                "supervisor.reconnect_interval_ms must be positive",
            ));
        }
        if self.modem.port.trim().is_empty() {
            return Err(config_error("modem.port must not be empty"));
        }
        Ok(())
    }

    #[must_use]
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig::new(self.modem.port.clone())
            .baud_rate(self.modem.baud_rate)
            .connection_delay(Duration::from_millis(self.modem.connection_delay_ms))
    }

    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            format: self.modem.message_format,
            command_timeout: Duration::from_millis(self.modem.command_timeout_ms),
        }
    }

    #[must_use]
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            smsc: self.modem.smsc.clone(),
            encoding: self.modem.encoding,
            max_attempts: self.queue.max_attempts,
            retry_backoff: Duration::from_millis(self.queue.retry_backoff_ms),
            send_cooldown: Duration::from_millis(self.queue.send_cooldown_ms),
            command_timeout: Duration::from_millis(self.modem.command_timeout_ms),
            send_timeout: Duration::from_millis(self.modem.send_timeout_ms),
            delete_after_read: self.router.delete_after_read,
            numbering: NumberPlan {
                short_codes: self.queue.short_codes.clone(),
                country_code: self.queue.country_code.clone(),
                local_number_digits: self.queue.local_number_digits,
            },
        }
    }

    #[must_use]
    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            interval: Duration::from_millis(self.supervisor.reconnect_interval_ms),
            alert_threshold: self.supervisor.alert_threshold,
            alert_recipients: self.supervisor.alert_recipients.clone(),
        }
    }

    /// Router settings. Low-balance alerts go to the supervisor's recipients.
    #[must_use]
    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            service_short_code: self.router.service_short_code.clone(),
            low_balance_threshold: self.router.low_balance_threshold,
            admin_numbers: parse_admin_numbers(&self.router.admin_numbers),
            alert_recipients: self.supervisor.alert_recipients.clone(),
        }
    }
}

fn config_error(message: &str) -> Error {
    Error::Config {
        message: message.to_owned(),
    }
}
