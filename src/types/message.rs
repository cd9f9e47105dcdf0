//! Message types for received SMS.

use crate::protocol::DeliverPdu;

/// An SMS read from the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Originating address (digits, `+`-prefixed digits, or an alphanumeric name).
    pub sender: String,
    /// Decoded message text.
    pub text: String,
    /// Service-centre timestamp (`yy/MM/dd,hh:mm:ss`), when the modem reported one.
    pub timestamp: Option<String>,
}

impl From<DeliverPdu> for InboundMessage {
    fn from(pdu: DeliverPdu) -> Self {
        Self {
            sender: pdu.sender,
            text: pdu.text,
            timestamp: Some(pdu.timestamp),
        }
    }
}
