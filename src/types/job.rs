//! Outbound SMS jobs and their results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of an outbound job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its first or next attempt.
    #[default]
    Pending,
    /// An attempt is on the wire.
    InFlight,
    /// The modem accepted the message.
    Sent,
    /// All attempts failed, or the input was invalid.
    Failed,
}

impl JobStatus {
    /// Returns true for `Sent` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// One queued SMS send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundJob {
    /// Phone number or short code, as given by the caller.
    pub destination: String,
    /// Message text.
    pub payload: String,
    /// Attempts made so far.
    pub attempts: u32,
    /// Attempt limit; never below one.
    pub max_attempts: u32,
    /// Current status.
    pub status: JobStatus,
}

impl OutboundJob {
    /// Creates a pending job.
    #[must_use]
    pub fn new(
        destination: impl Into<String>,
        payload: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            destination: destination.into(),
            payload: payload.into(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
            status: JobStatus::Pending,
        }
    }

    /// Marks the job in flight and returns the attempt number.
    pub fn begin_attempt(&mut self) -> u32 {
        debug_assert!(self.attempts < self.max_attempts);
        self.attempts += 1;
        self.status = JobStatus::InFlight;
        self.attempts
    }

    /// Gives back an attempt that never reached the modem.
    pub fn retract_attempt(&mut self) {
        self.attempts = self.attempts.saturating_sub(1);
        self.status = JobStatus::Pending;
    }

    /// Returns true if another attempt is allowed.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Records a terminal result.
    pub fn finish(&mut self, sent: bool) {
        self.status = if sent {
            JobStatus::Sent
        } else {
            JobStatus::Failed
        };
    }
}

/// Result reported back to whoever enqueued a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    pub message: String,
}

impl SendOutcome {
    #[must_use]
    pub fn sent(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Destination as it arrives from a work source: a string or a bare number.
///
/// Numbers lose leading zeros, so short codes like `0800` must be sent as
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    Text(String),
    Number(u64),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        match destination {
            Destination::Text(text) => text,
            Destination::Number(number) => number.to_string(),
        }
    }
}

/// A "send this SMS" record from the inbound work source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendRequest {
    pub destination: Destination,
    pub payload: String,
}
