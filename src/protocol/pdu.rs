//! SMS PDU encoding and decoding (3GPP TS 23.040).
//!
//! Outbound messages are single-part SMS-SUBMIT frames. The layout built by
//! [`build_submit_pdu`] is:
//!
//! ```text
//! ┌──────────┬───────┬──────┬────┬──────────────────┬─────┬─────┬────┬─────┬──────────┐
//! │ SMSC len │ SMSC  │ 0x11 │ MR │ DA len/TOA/digits│ PID │ DCS │ VP │ UDL │   UD     │
//! │ 1 octet  │ n     │ 1    │ 1  │ 2 + ceil(d/2)    │ 1   │ 1   │ 1  │ 1   │ ≤ 140    │
//! └──────────┴───────┴──────┴────┴──────────────────┴─────┴─────┴────┴─────┴──────────┘
//! ```
//!
//! `AT+CMGS` expects the octet count that follows the SMSC block.

use serde::Deserialize;

use crate::error::{Error, PduError, Result};

/// Maximum user data octets in a single-part SMS.
pub const MAX_USER_DATA_OCTETS: usize = 140;

/// Maximum GSM 7-bit characters (septets) in a single-part SMS.
pub const MAX_GSM7_SEPTETS: usize = 160;

/// Filler nibble appended to odd-length digit strings.
const FILLER: char = 'F';

/// Type of address: international number, ISDN numbering plan.
const TOA_INTERNATIONAL: u8 = 0x91;

/// Type of address: unknown type, ISDN numbering plan.
const TOA_UNKNOWN: u8 = 0x81;

/// SMS-SUBMIT with a relative validity period field.
const SUBMIT_FIRST_OCTET: u8 = 0x11;

/// Message reference; the modem assigns the real one.
const MESSAGE_REFERENCE: u8 = 0x00;

/// Plain short message protocol identifier.
const PROTOCOL_ID: u8 = 0x00;

/// Relative validity period of four days.
const VALIDITY_PERIOD: u8 = 0xAA;

/// Data coding scheme: GSM 7-bit default alphabet.
pub const DCS_GSM7: u8 = 0x00;

/// Data coding scheme: 8-bit data.
pub const DCS_8BIT: u8 = 0x04;

/// Data coding scheme: UCS-2.
pub const DCS_UCS2: u8 = 0x08;

/// GSM escape character introducing the extension table.
const GSM7_ESCAPE: u8 = 0x1B;

/// GSM 03.38 basic character set. Slot 0x1B is the escape placeholder.
const GSM7_BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å', //
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1b}', 'Æ', 'æ', 'ß', 'É', //
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?', //
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§', //
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', //
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à', //
];

/// GSM 03.38 extension table, reached through [`GSM7_ESCAPE`].
const GSM7_EXTENSION: [(u8, char); 10] = [
    (0x0A, '\u{0c}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

/// Text encoding used for outbound user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// GSM 7-bit default alphabet (up to 160 characters).
    Gsm7,
    /// UCS-2 (up to 70 characters).
    #[default]
    Ucs2,
}

/// Encodes a phone number into semi-octets.
///
/// A leading `+` is stripped, odd digit counts are padded with `F`, and each
/// digit pair is swapped: `"12345"` becomes `"2143F5"`.
pub fn encode_phone_number(number: &str) -> Result<String> {
    let digits = number.strip_prefix('+').unwrap_or(number);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidNumber {
            number: number.to_owned(),
        });
    }

    let mut padded: Vec<char> = digits.chars().collect();
    if padded.len() % 2 == 1 {
        padded.push(FILLER);
    }

    Ok(padded
        .chunks_exact(2)
        .flat_map(|pair| [pair[1], pair[0]])
        .collect())
}

/// Decodes a semi-octet hex string back into digits, dropping filler nibbles.
#[must_use]
pub fn decode_semi_octets(encoded: &str) -> String {
    let chars: Vec<char> = encoded.chars().collect();
    chars
        .chunks(2)
        .flat_map(|pair| match pair {
            [first, second] => [Some(*second), Some(*first)],
            [single] => [Some(*single), None],
            _ => [None, None],
        })
        .flatten()
        .filter(|c| !c.eq_ignore_ascii_case(&FILLER))
        .collect()
}

/// Decodes semi-octet bytes as found in address fields.
fn decode_semi_octet_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        for nibble in [byte & 0x0F, byte >> 4] {
            match nibble {
                0..=9 => out.push(char::from(b'0' + nibble)),
                0x0A => out.push('*'),
                0x0B => out.push('#'),
                0x0C..=0x0E => out.push(char::from(b'a' + nibble - 0x0C)),
                _ => {}
            }
        }
    }
    out
}

/// Encodes text as UCS-2: big-endian 16-bit code units, uppercase hex.
#[must_use]
pub fn encode_text(text: &str) -> String {
    hex::encode_upper(ucs2_bytes(text))
}

fn ucs2_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_be_bytes).collect()
}

/// Decodes big-endian UCS-2 bytes. A trailing odd byte is ignored.
#[must_use]
pub fn decode_ucs2(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Maps text to GSM 7-bit septets.
///
/// Returns `None` if any character is outside the default alphabet and its
/// extension table.
#[must_use]
pub fn encode_gsm7(text: &str) -> Option<Vec<u8>> {
    let mut septets = Vec::with_capacity(text.len());
    for c in text.chars() {
        if let Some(pos) = GSM7_BASIC.iter().position(|&b| b == c) {
            if pos == usize::from(GSM7_ESCAPE) {
                return None;
            }
            septets.push(pos as u8);
        } else if let Some((code, _)) = GSM7_EXTENSION.iter().find(|(_, ext)| *ext == c) {
            septets.push(GSM7_ESCAPE);
            septets.push(*code);
        } else {
            return None;
        }
    }
    Some(septets)
}

/// Maps text to septets for a single-part message.
///
/// Fails with [`Error::Unencodable`] naming the first character outside the
/// alphabet, or [`Error::MessageTooLong`] past 160 septets.
pub fn gsm7_single_part(text: &str) -> Result<Vec<u8>> {
    let Some(septets) = encode_gsm7(text) else {
        let character = text
            .chars()
            .find(|c| encode_gsm7(c.encode_utf8(&mut [0; 4])).is_none())
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        return Err(Error::Unencodable { character });
    };
    if septets.len() > MAX_GSM7_SEPTETS {
        return Err(Error::MessageTooLong {
            octets: (septets.len() * 7).div_ceil(8),
            max: MAX_USER_DATA_OCTETS,
        });
    }
    Ok(septets)
}

/// Maps GSM 7-bit septets back to text.
#[must_use]
pub fn decode_gsm7(septets: &[u8]) -> String {
    let mut out = String::with_capacity(septets.len());
    let mut iter = septets.iter().copied();
    while let Some(septet) = iter.next() {
        if septet == GSM7_ESCAPE {
            let Some(code) = iter.next() else { break };
            let ext = GSM7_EXTENSION
                .iter()
                .find(|(c, _)| *c == code)
                .map_or(' ', |(_, ch)| *ch);
            out.push(ext);
        } else {
            out.push(GSM7_BASIC[usize::from(septet & 0x7F)]);
        }
    }
    out
}

/// Packs septets into octets, least significant bits first.
#[must_use]
pub fn pack_septets(septets: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((septets.len() * 7).div_ceil(8));
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &septet in septets {
        acc |= u32::from(septet & 0x7F) << bits;
        bits += 7;
        while bits >= 8 {
            out.push((acc & 0xFF) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push((acc & 0xFF) as u8);
    }
    out
}

/// Unpacks `count` septets, skipping `skip_bits` leading fill bits.
#[must_use]
pub fn unpack_septets(data: &[u8], count: usize, skip_bits: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let bit = skip_bits + i * 7;
        let index = bit / 8;
        let shift = bit % 8;
        let Some(&low) = data.get(index) else { break };
        let mut value = u16::from(low) >> shift;
        if shift > 1 {
            if let Some(&high) = data.get(index + 1) {
                value |= u16::from(high) << (8 - shift);
            }
        }
        out.push((value & 0x7F) as u8);
    }
    out
}

/// Encoded SMS-SUBMIT frame ready for `AT+CMGS`.
///
/// Built once per outbound job and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPdu {
    smsc: Vec<u8>,
    destination_digits: u8,
    destination_type: u8,
    destination: Vec<u8>,
    data_coding: u8,
    user_data_length: u8,
    user_data: Vec<u8>,
    pdu: String,
    command_length: usize,
}

impl SubmitPdu {
    /// Full PDU as uppercase hex, SMSC block included.
    #[must_use]
    pub fn pdu(&self) -> &str {
        &self.pdu
    }

    /// Octet count excluding the SMSC length byte and SMSC address.
    #[must_use]
    pub const fn command_length(&self) -> usize {
        self.command_length
    }

    /// SMSC address octets (type of address followed by semi-octets).
    #[must_use]
    pub fn smsc(&self) -> &[u8] {
        &self.smsc
    }

    /// Destination length field: the number of digits.
    #[must_use]
    pub const fn destination_length(&self) -> u8 {
        self.destination_digits
    }

    /// Destination type of address.
    #[must_use]
    pub const fn destination_type(&self) -> u8 {
        self.destination_type
    }

    /// Destination semi-octets.
    #[must_use]
    pub fn destination(&self) -> &[u8] {
        &self.destination
    }

    /// Data coding scheme octet.
    #[must_use]
    pub const fn data_coding(&self) -> u8 {
        self.data_coding
    }

    /// User data length (octets for UCS-2, septets for GSM 7-bit).
    #[must_use]
    pub const fn user_data_length(&self) -> u8 {
        self.user_data_length
    }

    /// User data as uppercase hex.
    #[must_use]
    pub fn user_data_hex(&self) -> String {
        hex::encode_upper(&self.user_data)
    }
}

/// Builds a UCS-2 SMS-SUBMIT PDU.
///
/// An empty `smsc_number` emits `00`, telling the modem to use the SMSC
/// stored on the SIM.
pub fn build_submit_pdu(
    smsc_number: &str,
    destination_number: &str,
    text: &str,
) -> Result<SubmitPdu> {
    build_submit_pdu_with(smsc_number, destination_number, text, TextEncoding::Ucs2)
}

/// Builds an SMS-SUBMIT PDU with the given text encoding.
pub fn build_submit_pdu_with(
    smsc_number: &str,
    destination_number: &str,
    text: &str,
    encoding: TextEncoding,
) -> Result<SubmitPdu> {
    let (data_coding, user_data_length, user_data) = match encoding {
        TextEncoding::Ucs2 => {
            let data = ucs2_bytes(text);
            if data.len() > MAX_USER_DATA_OCTETS {
                return Err(Error::MessageTooLong {
                    octets: data.len(),
                    max: MAX_USER_DATA_OCTETS,
                });
            }
            (DCS_UCS2, data.len() as u8, data)
        }
        TextEncoding::Gsm7 => {
            let septets = gsm7_single_part(text)?;
            (DCS_GSM7, septets.len() as u8, pack_septets(&septets))
        }
    };

    let smsc = if smsc_number.is_empty() {
        Vec::new()
    } else {
        let mut block = vec![TOA_INTERNATIONAL];
        block.extend(semi_octet_bytes(smsc_number)?);
        block
    };

    let digits = destination_number
        .strip_prefix('+')
        .unwrap_or(destination_number);
    let destination = semi_octet_bytes(destination_number)?;
    let destination_type = if destination_number.starts_with('+') {
        TOA_INTERNATIONAL
    } else {
        TOA_UNKNOWN
    };
    let destination_digits = u8::try_from(digits.len()).map_err(|_| Error::InvalidNumber {
        number: destination_number.to_owned(),
    })?;

    let mut tpdu = Vec::with_capacity(8 + destination.len() + user_data.len());
    tpdu.push(SUBMIT_FIRST_OCTET);
    tpdu.push(MESSAGE_REFERENCE);
    tpdu.push(destination_digits);
    tpdu.push(destination_type);
    tpdu.extend_from_slice(&destination);
    tpdu.push(PROTOCOL_ID);
    tpdu.push(data_coding);
    tpdu.push(VALIDITY_PERIOD);
    tpdu.push(user_data_length);
    tpdu.extend_from_slice(&user_data);

    let mut frame = Vec::with_capacity(1 + smsc.len() + tpdu.len());
    frame.push(smsc.len() as u8);
    frame.extend_from_slice(&smsc);
    frame.extend_from_slice(&tpdu);

    Ok(SubmitPdu {
        command_length: frame.len() - 1 - smsc.len(),
        pdu: hex::encode_upper(&frame),
        smsc,
        destination_digits,
        destination_type,
        destination,
        data_coding,
        user_data_length,
        user_data,
    })
}

fn semi_octet_bytes(number: &str) -> Result<Vec<u8>> {
    let encoded = encode_phone_number(number)?;
    hex::decode(&encoded).map_err(|_| Error::InvalidNumber {
        number: number.to_owned(),
    })
}

/// Decoded SMS-DELIVER frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverPdu {
    /// Service centre that delivered the message.
    pub smsc: String,
    /// Originating address (digits, `+` prefixed when international).
    pub sender: String,
    /// Service centre timestamp as `yy/MM/dd,hh:mm:ss`.
    pub timestamp: String,
    /// Decoded message text.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alphabet {
    Gsm7,
    EightBit,
    Ucs2,
}

impl Alphabet {
    const fn from_dcs(dcs: u8) -> Option<Self> {
        match dcs & 0xF0 {
            0x00..=0x30 => match (dcs >> 2) & 0x03 {
                0 => Some(Self::Gsm7),
                1 => Some(Self::EightBit),
                2 => Some(Self::Ucs2),
                _ => None,
            },
            0xC0 | 0xD0 => Some(Self::Gsm7),
            0xE0 => Some(Self::Ucs2),
            0xF0 => Some(if dcs & 0x04 == 0 {
                Self::Gsm7
            } else {
                Self::EightBit
            }),
            _ => None,
        }
    }
}

/// Bounds-checked reader over PDU octets.
struct OctetReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> OctetReader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], PduError> {
        let end = self.offset + n;
        if end > self.data.len() {
            return Err(PduError::Truncated {
                offset: self.offset,
                needed: n,
                available: self.data.len() - self.offset,
            });
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> std::result::Result<u8, PduError> {
        Ok(self.take(1)?[0])
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }
}

fn format_address(toa: u8, digits: &[u8], digit_count: usize) -> String {
    match toa & 0x70 {
        0x50 => decode_gsm7(&unpack_septets(digits, digit_count * 4 / 7, 0)),
        0x10 => format!("+{}", decode_semi_octet_bytes(digits)),
        _ => decode_semi_octet_bytes(digits),
    }
}

fn format_timestamp(scts: &[u8]) -> String {
    let field = |i: usize| decode_semi_octet_bytes(&scts[i..=i]);
    format!(
        "{}/{}/{},{}:{}:{}",
        field(0),
        field(1),
        field(2),
        field(3),
        field(4),
        field(5)
    )
}

/// Decodes an inbound SMS-DELIVER PDU from its hex form.
pub fn decode_deliver_pdu(pdu_hex: &str) -> std::result::Result<DeliverPdu, PduError> {
    let bytes = hex::decode(pdu_hex.trim())?;
    let mut reader = OctetReader::new(&bytes);

    let smsc_len = usize::from(reader.u8()?);
    let smsc_block = reader.take(smsc_len)?;
    let smsc = match smsc_block.split_first() {
        Some((&toa, digits)) => format_address(toa, digits, digits.len() * 2),
        None => String::new(),
    };

    let first = reader.u8()?;
    if first & 0x03 != 0x00 {
        return Err(PduError::NotDeliver(first));
    }
    let has_header = first & 0x40 != 0;

    let sender_digits = usize::from(reader.u8()?);
    let sender_toa = reader.u8()?;
    let sender_octets = reader.take(sender_digits.div_ceil(2))?;
    let sender = format_address(sender_toa, sender_octets, sender_digits);

    let _protocol_id = reader.u8()?;
    let dcs = reader.u8()?;
    let timestamp = format_timestamp(reader.take(7)?);
    let user_data_length = usize::from(reader.u8()?);
    let user_data = reader.rest();

    let alphabet = Alphabet::from_dcs(dcs).ok_or(PduError::UnsupportedCoding(dcs))?;
    let header_octets = if has_header {
        user_data.first().map_or(0, |&len| usize::from(len) + 1)
    } else {
        0
    };

    let text = match alphabet {
        Alphabet::Gsm7 => {
            let header_septets = (header_octets * 8).div_ceil(7);
            let count = user_data_length.saturating_sub(header_septets);
            decode_gsm7(&unpack_septets(user_data, count, header_septets * 7))
        }
        Alphabet::Ucs2 | Alphabet::EightBit => {
            let end = user_data_length.min(user_data.len());
            let body = user_data.get(header_octets..end).unwrap_or_default();
            if alphabet == Alphabet::Ucs2 {
                decode_ucs2(body)
            } else {
                String::from_utf8_lossy(body).into_owned()
            }
        }
    };

    Ok(DeliverPdu {
        smsc,
        sender,
        timestamp,
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_phone_number_odd() {
        assert_eq!(encode_phone_number("12345").unwrap(), "2143F5");
    }

    #[test]
    fn test_encode_phone_number_strips_plus() {
        assert_eq!(encode_phone_number("+99365999996").unwrap(), "9963959999F6");
    }

    #[test]
    fn test_encode_phone_number_rejects_letters() {
        assert!(matches!(
            encode_phone_number("+9936A"),
            Err(Error::InvalidNumber { .. })
        ));
        assert!(matches!(
            encode_phone_number("+"),
            Err(Error::InvalidNumber { .. })
        ));
        assert!(encode_phone_number("65 12").is_err());
    }

    #[test]
    fn test_semi_octet_round_trip() {
        for number in ["0800", "65123456", "+99365123456", "1", "+4915112345678"] {
            let encoded = encode_phone_number(number).unwrap();
            let normalized = number.trim_start_matches('+');
            assert_eq!(decode_semi_octets(&encoded), normalized, "{number}");
        }
    }

    #[test]
    fn test_encode_text_ucs2() {
        assert_eq!(encode_text("Hello"), "00480065006C006C006F");
        assert_eq!(encode_text("Ý"), "00DD");
        assert_eq!(encode_text("Привет"), "041F04400438043204350442");
    }

    #[test]
    fn test_decode_ucs2() {
        let bytes = hex::decode("041F04400438043204350442").unwrap();
        assert_eq!(decode_ucs2(&bytes), "Привет");
    }

    #[test]
    fn test_build_submit_pdu_known_frame() {
        let submit = build_submit_pdu("99365999996", "65123456", "Hello").unwrap();
        assert_eq!(
            submit.pdu(),
            "07919963959999F611000881562143650008AA0A00480065006C006C006F"
        );
        assert_eq!(submit.command_length(), 22);
        assert_eq!(submit.destination_length(), 8);
        assert_eq!(submit.destination_type(), 0x81);
        assert_eq!(submit.user_data_hex(), encode_text("Hello"));
    }

    #[test]
    fn test_command_length_excludes_smsc_block() {
        for text in ["", "a", "Salam!", &"x".repeat(70)] {
            let submit = build_submit_pdu("+99365999996", "+99365123456", text).unwrap();
            let octets = submit.pdu().len() / 2;
            assert_eq!(submit.command_length(), octets - 1 - submit.smsc().len());
            assert_eq!(submit.destination_type(), 0x91);
        }
    }

    #[test]
    fn test_empty_smsc_uses_sim_default() {
        let submit = build_submit_pdu("", "0800", "Hi").unwrap();
        assert!(submit.pdu().starts_with("0011"));
        assert_eq!(submit.command_length(), submit.pdu().len() / 2 - 1);
    }

    #[test]
    fn test_message_too_long() {
        let text = "y".repeat(71);
        let err = build_submit_pdu("99365999996", "65123456", &text).unwrap_err();
        assert!(matches!(
            err,
            Error::MessageTooLong {
                octets: 142,
                max: 140
            }
        ));
    }

    #[test]
    fn test_seventy_ucs2_chars_fit() {
        let text = "ж".repeat(70);
        let submit = build_submit_pdu("99365999996", "65123456", &text).unwrap();
        assert_eq!(submit.user_data_length(), 140);
    }

    #[test]
    fn test_invalid_destination_rejected() {
        let err = build_submit_pdu("99365999996", "65-12", "x").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_gsm7_pack_hellohello() {
        let septets = encode_gsm7("hellohello").unwrap();
        assert_eq!(
            hex::encode_upper(pack_septets(&septets)),
            "E8329BFD4697D9EC37"
        );
    }

    #[test]
    fn test_gsm7_extension_round_trip() {
        let septets = encode_gsm7("5€ [ok]").unwrap();
        assert_eq!(septets.len(), 10);
        let packed = pack_septets(&septets);
        let unpacked = unpack_septets(&packed, septets.len(), 0);
        assert_eq!(decode_gsm7(&unpacked), "5€ [ok]");
    }

    #[test]
    fn test_gsm7_rejects_unmapped() {
        assert!(encode_gsm7("Привет").is_none());
    }

    #[test]
    fn test_build_submit_pdu_gsm7() {
        let submit =
            build_submit_pdu_with("", "+46708251358", "hellohello", TextEncoding::Gsm7).unwrap();
        assert_eq!(
            submit.pdu(),
            "0011000B916407281553F80000AA0AE8329BFD4697D9EC37"
        );
    }

    #[test]
    fn test_gsm7_unencodable_is_validation() {
        let err = build_submit_pdu_with("", "0800", "Salam Ý", TextEncoding::Gsm7).unwrap_err();
        assert!(matches!(err, Error::Unencodable { character: 'Ý' }));
        assert!(err.is_validation());
    }

    #[test]
    fn test_gsm7_limit() {
        let ok = "a".repeat(MAX_GSM7_SEPTETS);
        let fits = build_submit_pdu_with("", "0800", &ok, TextEncoding::Gsm7);
        assert!(fits.is_ok());
        let too_long = "a".repeat(MAX_GSM7_SEPTETS + 1);
        assert!(matches!(
            build_submit_pdu_with("", "0800", &too_long, TextEncoding::Gsm7),
            Err(Error::MessageTooLong { .. })
        ));
    }

    #[test]
    fn test_decode_deliver_gsm7() {
        let pdu = "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37";
        let deliver = decode_deliver_pdu(pdu).unwrap();
        assert_eq!(deliver.smsc, "+27381000015");
        assert_eq!(deliver.sender, "27838890001");
        assert_eq!(deliver.timestamp, "99/03/29,15:16:59");
        assert_eq!(deliver.text, "hellohello");
    }

    #[test]
    fn test_decode_deliver_ucs2_short_code() {
        let pdu = format!(
            "000404818000000862101611203000{:02X}{}",
            "Balans: 5.20 manat".len() * 2,
            encode_text("Balans: 5.20 manat")
        );
        let deliver = decode_deliver_pdu(&pdu).unwrap();
        assert_eq!(deliver.smsc, "");
        assert_eq!(deliver.sender, "0800");
        assert_eq!(deliver.text, "Balans: 5.20 manat");
    }

    #[test]
    fn test_decode_deliver_skips_user_data_header() {
        // UDHI set, 6-octet concatenation header, then UCS-2 "ok"
        let pdu = "0044048180000008621016112030000A050003010201006F006B";
        let deliver = decode_deliver_pdu(pdu).unwrap();
        assert_eq!(deliver.text, "ok");
    }

    #[test]
    fn test_decode_deliver_alphanumeric_sender() {
        let name = pack_septets(&encode_gsm7("TMCELL").unwrap());
        let pdu = format!(
            "00040CD0{}000862101611203000020041",
            hex::encode_upper(&name)
        );
        let deliver = decode_deliver_pdu(&pdu).unwrap();
        assert_eq!(deliver.sender, "TMCELL");
        assert_eq!(deliver.text, "A");
    }

    #[test]
    fn test_decode_deliver_rejects_truncated() {
        assert!(matches!(
            decode_deliver_pdu("000404818000"),
            Err(PduError::Truncated { .. })
        ));
        assert!(matches!(
            decode_deliver_pdu("zz"),
            Err(PduError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_decode_rejects_submit() {
        let submit = build_submit_pdu("", "0800", "x").unwrap();
        assert!(matches!(
            decode_deliver_pdu(submit.pdu()),
            Err(PduError::NotDeliver(0x11))
        ));
    }
}
