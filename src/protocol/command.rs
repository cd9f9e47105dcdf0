//! AT command definitions and response matching.
//!
//! Every command carries a closed [`Expect`] pattern naming the tokens that
//! end its transaction. Matching is plain substring search over the
//! accumulated response, so it is deterministic for a given byte stream.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Carriage return ending an ordinary AT command line.
pub const LINE_TERMINATOR: &str = "\r";

/// Ctrl-Z ending the PDU body of `AT+CMGS`.
pub const CTRL_Z: &str = "\x1a";

/// Escape, abandoning a pending `>` prompt without sending.
pub const ESCAPE: &str = "\x1b";

/// Final result code for success.
pub const TOKEN_OK: &str = "\r\nOK\r\n";

/// Prompt asking for the message body after `AT+CMGS=<len>`.
pub const TOKEN_PROMPT: &str = ">";

/// Generic failure result code.
pub const TOKEN_ERROR: &str = "\r\nERROR\r\n";

/// Message service failure prefix.
pub const TOKEN_CMS_ERROR: &str = "+CMS ERROR:";

/// Equipment failure prefix.
pub const TOKEN_CME_ERROR: &str = "+CME ERROR:";

/// Error tokens recognized for every command.
pub const ERROR_TOKENS: &[&str] = &[TOKEN_ERROR, TOKEN_CMS_ERROR, TOKEN_CME_ERROR];

/// Message format selected during initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// PDU mode (`AT+CMGF=0`).
    #[default]
    Pdu,
    /// Text mode (`AT+CMGF=1`).
    Text,
}

/// Response pattern that ends a transaction successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Final `OK`.
    Ok,
    /// The `>` body prompt.
    Prompt,
}

impl Expect {
    /// Terminator tokens for this pattern.
    #[must_use]
    pub const fn terminators(self) -> &'static [&'static str] {
        match self {
            Self::Ok => &[TOKEN_OK],
            Self::Prompt => &[TOKEN_PROMPT],
        }
    }
}

/// A single AT command with its expected response and deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtCommand {
    text: String,
    ending: &'static str,
    expect: Expect,
    timeout: Duration,
}

impl AtCommand {
    /// Creates a command line terminated with a carriage return.
    #[must_use]
    pub fn new(text: impl Into<String>, expect: Expect, timeout: Duration) -> Self {
        Self {
            text: text.into(),
            ending: LINE_TERMINATOR,
            expect,
            timeout,
        }
    }

    /// Communication check.
    #[must_use]
    pub fn attention(timeout: Duration) -> Self {
        Self::new("AT", Expect::Ok, timeout)
    }

    /// Resets the modem to its stored profile.
    #[must_use]
    pub fn reset(timeout: Duration) -> Self {
        Self::new("ATZ", Expect::Ok, timeout)
    }

    /// Disables command echo.
    #[must_use]
    pub fn echo_off(timeout: Duration) -> Self {
        Self::new("ATE0", Expect::Ok, timeout)
    }

    /// Selects PDU or text message format.
    #[must_use]
    pub fn message_format(format: MessageFormat, timeout: Duration) -> Self {
        let mode = match format {
            MessageFormat::Pdu => 0,
            MessageFormat::Text => 1,
        };
        Self::new(format!("AT+CMGF={mode}"), Expect::Ok, timeout)
    }

    /// Selects the IRA (ASCII) character set for text-mode payloads.
    #[must_use]
    pub fn character_set_ira(timeout: Duration) -> Self {
        Self::new("AT+CSCS=\"IRA\"", Expect::Ok, timeout)
    }

    /// Stores incoming messages and announces them with `+CMTI`.
    #[must_use]
    pub fn new_message_indication(timeout: Duration) -> Self {
        Self::new("AT+CNMI=2,1,0,0,0", Expect::Ok, timeout)
    }

    /// Starts a PDU send, announcing `length` octets after the SMSC block.
    #[must_use]
    pub fn send_length(length: usize, timeout: Duration) -> Self {
        Self::new(format!("AT+CMGS={length}"), Expect::Prompt, timeout)
    }

    /// Sends the PDU body, terminated with Ctrl-Z.
    #[must_use]
    pub fn send_body(pdu: &str, timeout: Duration) -> Self {
        Self {
            text: pdu.to_owned(),
            ending: CTRL_Z,
            expect: Expect::Ok,
            timeout,
        }
    }

    /// Starts a text-mode send to `number`.
    #[must_use]
    pub fn send_address(number: &str, timeout: Duration) -> Self {
        Self::new(format!("AT+CMGS=\"{number}\""), Expect::Prompt, timeout)
    }

    /// Reads the message stored at `index`.
    #[must_use]
    pub fn read_message(index: u32, timeout: Duration) -> Self {
        Self::new(format!("AT+CMGR={index}"), Expect::Ok, timeout)
    }

    /// Deletes the message stored at `index`.
    #[must_use]
    pub fn delete_message(index: u32, timeout: Duration) -> Self {
        Self::new(format!("AT+CMGD={index}"), Expect::Ok, timeout)
    }

    /// Command text without its line ending.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Expected response pattern.
    #[must_use]
    pub const fn expect(&self) -> Expect {
        self.expect
    }

    /// Tokens that resolve the transaction successfully.
    #[must_use]
    pub const fn terminators(&self) -> &'static [&'static str] {
        self.expect.terminators()
    }

    /// Tokens that resolve the transaction with a modem error.
    #[must_use]
    pub const fn error_tokens(&self) -> &'static [&'static str] {
        ERROR_TOKENS
    }

    /// Transaction deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Bytes written to the channel.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(format!("{}{}", self.text, self.ending))
    }
}

/// Outcome of matching an accumulated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMatch {
    /// A terminator token was found.
    Complete,
    /// An error token was found.
    Failed,
}

/// Matches an accumulated response against terminator and error tokens.
///
/// The earliest match wins. An error token only counts once the line
/// carrying it is complete, so `+CMS ERROR: 38` is reported whole rather
/// than cut at the colon.
#[must_use]
pub fn match_response(
    response: &str,
    terminators: &[&str],
    error_tokens: &[&str],
) -> Option<ResponseMatch> {
    let terminator = terminators
        .iter()
        .filter_map(|token| response.find(token))
        .min();
    let error = error_tokens
        .iter()
        .filter_map(|token| {
            let start = response.find(token)?;
            response[start..].contains('\n').then_some(start)
        })
        .min();

    match (terminator, error) {
        (Some(t), Some(e)) if e < t => Some(ResponseMatch::Failed),
        (Some(_), _) => Some(ResponseMatch::Complete),
        (None, Some(_)) => Some(ResponseMatch::Failed),
        (None, None) => None,
    }
}
