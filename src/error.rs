//! Error types for the smsgate library.

use thiserror::Error;

use crate::session::SessionState;

/// The main error type for smsgate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial channel could not be opened.
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// No terminator was seen before the command deadline.
    ///
    /// `partial` carries whatever the modem sent before the deadline.
    #[error("command {command:?} timed out after {timeout_ms}ms")]
    CommandTimeout {
        command: String,
        timeout_ms: u64,
        partial: String,
    },

    /// The modem answered with an error token.
    #[error("modem error: {raw:?}")]
    Modem { raw: String },

    /// Phone number contains characters other than digits.
    #[error("invalid phone number: {number:?}")]
    InvalidNumber { number: String },

    /// Encoded user data does not fit a single-part SMS.
    #[error("message too long: {octets} octets exceeds maximum {max}")]
    MessageTooLong { octets: usize, max: usize },

    /// Text contains a character the selected encoding cannot carry.
    #[error("character {character:?} cannot be encoded")]
    Unencodable { character: char },

    /// A command was issued while the session was not ready.
    #[error("session not ready (state: {state})")]
    SessionNotReady { state: SessionState },

    /// Another command transaction is still in flight.
    #[error("command transactor busy")]
    TransactorBusy,

    /// The session state machine refused a transition.
    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// The serial channel closed while waiting for a response.
    #[error("channel closed")]
    ChannelClosed,

    /// The send queue consumer is gone.
    #[error("send queue closed")]
    QueueClosed,

    /// PDU decoding error.
    #[error("PDU error: {0}")]
    Pdu(#[from] PduError),

    /// Configuration could not be loaded.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Returns true for input validation failures, which retrying cannot fix.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidNumber { .. } | Self::MessageTooLong { .. } | Self::Unencodable { .. }
        )
    }

    /// Short description that is safe to hand to an external caller.
    ///
    /// Never includes raw modem output.
    #[must_use]
    pub const fn summary(&self) -> &'static str {
        match self {
            Self::Serial(_) | Self::Io(_) | Self::Open { .. } | Self::ChannelClosed => {
                "modem connection unavailable"
            }
            Self::CommandTimeout { .. } => "modem did not respond in time",
            Self::Modem { .. } => "modem rejected the message",
            Self::InvalidNumber { .. } => "invalid destination number",
            Self::MessageTooLong { .. } => "message too long",
            Self::Unencodable { .. } => "message contains unsupported characters",
            Self::SessionNotReady { .. } | Self::InvalidTransition { .. } => "modem not ready",
            Self::TransactorBusy => "modem busy",
            Self::QueueClosed => "send queue stopped",
            Self::Pdu(_) => "malformed PDU",
            Self::Config { .. } => "configuration error",
        }
    }
}

/// PDU decoding errors.
#[derive(Debug, Error)]
pub enum PduError {
    /// Input is not valid hexadecimal.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// PDU ended before a field could be read.
    #[error("PDU truncated: need {needed} octets at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The first octet does not describe an SMS-DELIVER.
    #[error("not an SMS-DELIVER (first octet 0x{0:02x})")]
    NotDeliver(u8),

    /// Data coding scheme is not supported.
    #[error("unsupported data coding scheme 0x{0:02x}")]
    UnsupportedCoding(u8),
}

/// Result type alias for smsgate operations.
pub type Result<T> = std::result::Result<T, Error>;
