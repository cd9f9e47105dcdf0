//! Protocol definitions for GSM modem communication.
//!
//! This module contains the low-level protocol types including:
//! - AT command definitions and response matching
//! - SMS PDU encoding/decoding
//! - Notification and response parsing
//! - Line splitting of modem output

pub mod command;
pub mod line;
pub mod notification;
pub mod pdu;
pub mod response;

pub use command::{AtCommand, ERROR_TOKENS, Expect, MessageFormat, ResponseMatch, match_response};
pub use line::LineDecoder;
pub use notification::{BodyHeader, Notification, parse_notification_line};
pub use pdu::{
    DeliverPdu, SubmitPdu, TextEncoding, build_submit_pdu, build_submit_pdu_with,
    decode_deliver_pdu, decode_semi_octets, decode_ucs2, encode_phone_number, encode_text,
    gsm7_single_part,
};
pub use response::{ReadResponse, parse_read_response, parse_send_reference};
